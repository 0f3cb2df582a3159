//! Logging setup.
//!
//! The library crates log through the `log` facade; the subscriber installed
//! here picks those records up and writes them to stderr so stdout stays
//! reserved for command output.
//!
//! - default: `warn`
//! - `-v`: `info` (pass summaries, restored slots)
//! - `-vv`: `debug` (missing values, collapsed recomputes)
//! - `-vvv`: `trace`
//!
//! `RUST_LOG` overrides the verbosity flags.

use std::io;

use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(verbosity: u8) {
    let filter = build_env_filter(level_for(verbosity));
    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(verbosity >= 2)
        .without_time();

    let result = tracing_subscriber::registry().with(filter).with(layer).try_init();
    if let Err(e) = result {
        eprintln!("warning: logging already initialised: {}", e);
    }
}

/// Build an `EnvFilter` from the given level, respecting `RUST_LOG`.
fn build_env_filter(level: Level) -> EnvFilter {
    let level_str = level.as_str().to_lowercase();

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // External crates stay at warn
        EnvFilter::new(format!(
            "warn,twinstate={level},twinstate_engine={level},twinstate_io={level},twinstate_config={level}",
            level = level_str
        ))
    })
}
