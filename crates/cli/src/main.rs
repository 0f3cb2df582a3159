// twinstate CLI - inspect and edit a dual-scenario field session from the shell

mod exit_codes;
mod logging;
mod workspace;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use twinstate_config::{SessionState, StorageBackend};
use twinstate_engine::catalog::FieldKind;
use twinstate_engine::field_id::{FieldId, Scenario};
use twinstate_engine::format::{format_field, format_value, parse_number, FormatTag};
use twinstate_engine::graph_export::GraphScope;
use twinstate_engine::module::Mode;
use twinstate_engine::session::SessionError;
use twinstate_engine::store::RevertOutcome;
use twinstate_engine::value::{FieldValue, Provenance};

use exit_codes::{
    session_exit_code, standards_exit_code, EXIT_FIELD_READ_ONLY, EXIT_FIELD_UNKNOWN, EXIT_IO, EXIT_PARSE,
    EXIT_SUCCESS, EXIT_USAGE,
};
use workspace::Workspace;

#[derive(Parser)]
#[command(name = "twinstate")]
#[command(about = "Dual-scenario field engine (Target vs Reference), headless")]
#[command(version)]
struct Cli {
    /// Settings file (default: <config dir>/twinstate/settings.json)
    #[arg(long, global = true, env = "TWINSTATE_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for snapshots and session state
    #[arg(long, global = true, env = "TWINSTATE_DATA_DIR", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Override the configured storage backend
    #[arg(long, global = true)]
    backend: Option<BackendArg>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show field values in both scenarios
    #[command(after_help = "\
Examples:
  twinstate show
  twinstate show intensity
  twinstate show --json")]
    Show {
        /// Only this field (base id, e.g. `area`)
        field: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Edit an input field
    #[command(after_help = "\
Examples:
  twinstate edit area 120
  twinstate edit ref_area 90
  twinstate edit rate 0.15 --scenario reference")]
    Edit {
        /// Field id; a `ref_` prefix selects the Reference scenario
        field: String,

        /// New value (number, true/false, or text)
        value: String,

        /// Scenario when the id has no prefix (default: current mode)
        #[arg(long)]
        scenario: Option<ScenarioArg>,

        #[arg(long)]
        json: bool,
    },

    /// Bulk-import a flat id/value file (.json, .csv, .tsv)
    Import {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Export every field (bridged ids) as JSON, or to a .json/.csv/.tsv file
    Export {
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Restore the last imported values, or defaults if nothing was imported
    Revert,

    /// Clear all values and saved state
    Reset,

    /// Show or set the displayed scenario
    Mode { mode: Option<ModeArg> },

    /// Reference standards
    #[command(subcommand)]
    Standard(StandardCommands),

    /// Export the dependency graph as JSON
    #[command(after_help = "\
Examples:
  twinstate graph
  twinstate graph --scope target -o graph.json")]
    Graph {
        /// target, reference, or both
        #[arg(long, default_value = "both")]
        scope: GraphScope,

        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Format a raw value for display
    #[command(after_help = "\
Examples:
  twinstate format 1234.5 --tag currency-2    # $1,234.50
  twinstate format 0.256 --tag percent-1      # 25.6%
  twinstate format N/A --tag number-2         # N/A")]
    Format {
        value: String,

        /// raw, integer, number-N, percent-N, currency-N
        #[arg(long, short = 't', default_value = "raw")]
        tag: String,
    },

    /// Parse a displayed number back to a plain value
    Parse {
        text: String,

        /// Value printed when nothing numeric remains
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        default: f64,
    },

    /// Show resolved settings and file locations
    Config,
}

#[derive(Subcommand)]
enum StandardCommands {
    /// List available standards
    List {
        #[arg(long)]
        json: bool,
    },
    /// Load a standard into the Reference scenario
    Select { name: String },
    /// Show the active standard
    Show,
}

#[derive(Clone, Copy, ValueEnum)]
enum ScenarioArg {
    Target,
    Reference,
}

impl From<ScenarioArg> for Scenario {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::Target => Scenario::Target,
            ScenarioArg::Reference => Scenario::Reference,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Target,
    Reference,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Target => Mode::Target,
            ModeArg::Reference => Mode::Reference,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Sqlite,
    Json,
    Memory,
}

impl From<BackendArg> for StorageBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Sqlite => StorageBackend::Sqlite,
            BackendArg::Json => StorageBackend::Json,
            BackendArg::Memory => StorageBackend::Memory,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Format { value, tag } => cmd_format(&value, &tag),
        Commands::Parse { text, default } => cmd_parse(&text, default),
        command => with_workspace(&cli.config, &cli.data_dir, cli.backend, |ws| match command {
            Commands::Show { field, json } => cmd_show(ws, field.as_deref(), json),
            Commands::Edit {
                field,
                value,
                scenario,
                json,
            } => cmd_edit(ws, &field, &value, scenario.map(Scenario::from), json),
            Commands::Import { file, json } => cmd_import(ws, file, json),
            Commands::Export { output } => cmd_export(ws, output),
            Commands::Revert => cmd_revert(ws),
            Commands::Reset => cmd_reset(ws),
            Commands::Mode { mode } => cmd_mode(ws, mode.map(Mode::from)),
            Commands::Standard(StandardCommands::List { json }) => cmd_standard_list(ws, json),
            Commands::Standard(StandardCommands::Select { name }) => cmd_standard_select(ws, &name),
            Commands::Standard(StandardCommands::Show) => cmd_standard_show(ws),
            Commands::Graph { scope, output } => cmd_graph(ws, scope, output),
            Commands::Config => cmd_config(ws),
            Commands::Format { .. } | Commands::Parse { .. } => Ok(()),
        }),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

/// Open the workspace, run `f`, then save. Nothing is saved when `f` fails.
fn with_workspace(
    config: &Option<PathBuf>,
    data_dir: &Option<PathBuf>,
    backend: Option<BackendArg>,
    f: impl FnOnce(&mut Workspace) -> Result<(), CliError>,
) -> Result<(), CliError> {
    let mut ws = Workspace::open(config.as_deref(), data_dir.as_deref(), backend.map(StorageBackend::from))?;
    f(&mut ws)?;
    ws.close()
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self { code: EXIT_PARSE, message: msg.into(), hint: None }
    }

    pub fn session(err: SessionError) -> Self {
        Self { code: session_exit_code(&err), message: err.to_string(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

fn print_json(value: &serde_json::Value) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::io(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// ============================================================================
// show / edit
// ============================================================================

fn display(value: Option<&FieldValue>, format: FormatTag) -> String {
    match value {
        Some(v) if !v.is_empty() => format_field(v, format),
        _ => "-".to_string(),
    }
}

fn cmd_show(ws: &mut Workspace, field: Option<&str>, as_json: bool) -> Result<(), CliError> {
    let filter = field.map(|f| FieldId::new(f).base());
    let session = &ws.session;

    let mut rows = Vec::new();
    for name in session.module_names() {
        let Some(module) = session.module(name) else { continue };
        for def in module.catalog().defs() {
            if filter.as_ref().is_some_and(|f| f != &def.id) {
                continue;
            }
            rows.push((name, def));
        }
    }
    if let Some(filter) = &filter {
        if rows.is_empty() {
            return Err(CliError {
                code: EXIT_FIELD_UNKNOWN,
                message: format!("no module owns field '{}'", filter),
                hint: None,
            });
        }
    }

    if as_json {
        let mut out = serde_json::Map::new();
        for (name, def) in &rows {
            let entry = json!({
                "kind": if def.kind == FieldKind::Calculated { "calculated" } else { "input" },
                "target": session.value(&def.id, Scenario::Target),
                "reference": session.value(&def.id, Scenario::Reference),
                "provenance": {
                    "target": session.store().provenance(&Scenario::Target.bridge(&def.id)),
                    "reference": session.store().provenance(&Scenario::Reference.bridge(&def.id)),
                },
            });
            let module = out
                .entry(name.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if let serde_json::Value::Object(fields) = module {
                fields.insert(def.id.to_string(), entry);
            }
        }
        return print_json(&serde_json::Value::Object(out));
    }

    let mode = ws.state.mode;
    println!("{:<8} {:<14} {:>14} {:>14}", "module", "field", "target", "reference");
    for (name, def) in rows {
        let marker = |scenario: Scenario| if mode.scenario() == scenario { "*" } else { " " };
        println!(
            "{:<8} {:<14} {:>14}{} {:>13}{}",
            name,
            def.id.as_str(),
            display(session.value(&def.id, Scenario::Target), def.format),
            marker(Scenario::Target),
            display(session.value(&def.id, Scenario::Reference), def.format),
            marker(Scenario::Reference),
        );
    }
    Ok(())
}

fn cmd_edit(
    ws: &mut Workspace,
    field: &str,
    value: &str,
    scenario: Option<Scenario>,
    as_json: bool,
) -> Result<(), CliError> {
    let key = FieldId::new(field);
    let (prefixed, base) = key.split_scenario();
    let scenario = match (prefixed, scenario) {
        (Scenario::Target, Some(s)) => s,
        (Scenario::Target, None) => ws.state.mode.scenario(),
        (p, Some(s)) if p != s => {
            return Err(CliError::args(format!("'{}' is a {} field but --scenario {} was given", field, p, s)));
        }
        (p, _) => p,
    };
    if scenario == Scenario::Actual {
        return Err(CliError::args("actual values can only be imported"));
    }

    let owner = ws
        .session
        .module_names()
        .into_iter()
        .find(|name| ws.session.module(name).is_some_and(|m| m.catalog().contains(&base)))
        .map(str::to_string)
        .ok_or_else(|| CliError {
            code: EXIT_FIELD_UNKNOWN,
            message: format!("no module owns field '{}'", base),
            hint: Some("run `twinstate show` to list fields".to_string()),
        })?;

    let (facade, store) = ws
        .session
        .module_and_store_mut(&owner)
        .ok_or_else(|| CliError::session(SessionError::UnknownModule(owner.clone())))?;
    if facade.catalog().get(&base).is_some_and(|def| def.kind == FieldKind::Calculated) {
        return Err(CliError {
            code: EXIT_FIELD_READ_ONLY,
            message: format!("'{}' is calculated by module {}", base, owner),
            hint: Some("edit one of its inputs instead".to_string()),
        });
    }
    let changed = facade.set_value_in(store, scenario, &base, FieldValue::from_input(value), Provenance::UserModified);
    ws.session.run_pass();

    let store = ws.session.store();
    let stored = scenario.bridge(&base);
    let provenance = store.provenance(&stored);
    let mut calculated = BTreeMap::new();
    if let Some(module) = ws.session.module(&owner) {
        for id in module.catalog().calculated_ids() {
            let value = ws.session.value(id, scenario).cloned().unwrap_or_default();
            let format = module.catalog().get(id).map(|d| d.format).unwrap_or_default();
            calculated.insert(scenario.bridge(id).to_string(), (value, format));
        }
    }

    if as_json {
        let calculated: serde_json::Map<String, serde_json::Value> = calculated
            .into_iter()
            .map(|(id, (value, _))| (id, json!(value)))
            .collect();
        return print_json(&json!({
            "field": stored,
            "scenario": scenario,
            "changed": changed,
            "provenance": provenance,
            "value": ws.session.value(&base, scenario),
            "calculated": calculated,
        }));
    }

    if !changed {
        println!("{} unchanged", stored);
    } else {
        println!("{} = {}", stored, display(ws.session.value(&base, scenario), FormatTag::Raw));
    }
    for (id, (value, format)) in calculated {
        println!("  {} = {}", id, display(Some(&value), format));
    }
    Ok(())
}

// ============================================================================
// import / export / revert / reset
// ============================================================================

fn cmd_import(ws: &mut Workspace, file: PathBuf, as_json: bool) -> Result<(), CliError> {
    if !file.exists() {
        return Err(CliError::io(format!("file not found: {}", file.display())));
    }
    let entries = twinstate_io::read_flat_map(&file).map_err(|e| CliError::parse(format!("{}: {}", file.display(), e)))?;
    let (report, pass) = ws.session.import(&entries);
    ws.state.last_import = Some(file.canonicalize().unwrap_or(file));

    if as_json {
        return print_json(&json!({
            "applied": report.applied,
            "unchanged": report.unchanged,
            "notifications": pass.notifications,
        }));
    }
    println!("imported {} fields ({} unchanged)", report.applied, report.unchanged);
    Ok(())
}

fn cmd_export(ws: &mut Workspace, output: Option<PathBuf>) -> Result<(), CliError> {
    let entries = ws.session.export();
    match output {
        Some(path) => {
            twinstate_io::write_flat_map(&entries, &path).map_err(CliError::io)?;
            eprintln!("wrote {} fields to {}", entries.len(), path.display());
            Ok(())
        }
        None => print_json(&json!(entries)),
    }
}

fn cmd_revert(ws: &mut Workspace) -> Result<(), CliError> {
    // The import capture lives in memory, so a new process replays the file.
    if let Some(path) = ws.state.last_import.clone() {
        let entries = twinstate_io::read_flat_map(&path).map_err(|e| {
            CliError::io(format!("{}: {}", path.display(), e))
                .with_hint("the last imported file is no longer readable; run `twinstate reset` to start over")
        })?;
        ws.session.import(&entries);
    }

    let (outcome, _) = ws.session.revert_to_last_import();
    match outcome {
        RevertOutcome::Restored(n) => println!("restored {} fields from last import", n),
        RevertOutcome::NoImport => println!("no import recorded; refreshed defaults"),
    }
    Ok(())
}

fn cmd_reset(ws: &mut Workspace) -> Result<(), CliError> {
    ws.session.reset();
    ws.session.switch_mode(Mode::Target);
    ws.state = SessionState::default();
    println!("reset to defaults");
    Ok(())
}

fn cmd_mode(ws: &mut Workspace, mode: Option<Mode>) -> Result<(), CliError> {
    if let Some(mode) = mode {
        ws.session.switch_mode(mode);
        ws.state.mode = mode;
    }
    println!("{}", ws.state.mode.scenario());
    Ok(())
}

// ============================================================================
// standards
// ============================================================================

fn cmd_standard_list(ws: &mut Workspace, as_json: bool) -> Result<(), CliError> {
    let active = ws.session.store().active_standard();
    if as_json {
        let list: Vec<serde_json::Value> = ws
            .standards
            .standards
            .iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "description": s.description,
                    "fields": s.values.len(),
                    "active": active == Some(s.name.as_str()),
                })
            })
            .collect();
        return print_json(&json!(list));
    }
    for s in &ws.standards.standards {
        let marker = if active == Some(s.name.as_str()) { "*" } else { " " };
        println!("{} {:<12} {}", marker, s.name, s.description);
    }
    Ok(())
}

fn cmd_standard_select(ws: &mut Workspace, name: &str) -> Result<(), CliError> {
    let dataset = ws.standards.dataset(name).map_err(|e| CliError {
        code: standards_exit_code(&e),
        message: e.to_string(),
        hint: Some(format!("available: {}", ws.standards.names().join(", "))),
    })?;
    let canonical = dataset.name().to_string();
    let fields = dataset.len();
    ws.session.select_standard(dataset);
    println!("selected {} ({} reference fields)", canonical, fields);
    ws.state.standard = Some(canonical);
    Ok(())
}

fn cmd_standard_show(ws: &mut Workspace) -> Result<(), CliError> {
    match ws.session.standard() {
        Some(standard) => {
            println!("{}", standard.name());
            for (id, value) in standard.iter() {
                println!("  {:<14} {}", id.as_str(), value.raw_display());
            }
        }
        None => println!("no standard selected"),
    }
    Ok(())
}

// ============================================================================
// graph / format / parse / config
// ============================================================================

fn cmd_graph(ws: &mut Workspace, scope: GraphScope, output: Option<PathBuf>) -> Result<(), CliError> {
    let graph = ws.session.export_graph(scope, &ws.settings.graph_groups);
    match output {
        Some(path) => {
            twinstate_io::json::export_graph(&graph, &path).map_err(CliError::io)?;
            eprintln!(
                "wrote {} nodes, {} edges to {}",
                graph.nodes.len(),
                graph.edges.len(),
                path.display()
            );
            Ok(())
        }
        None => {
            let text = graph.to_json().map_err(|e| CliError::io(e.to_string()))?;
            println!("{}", text);
            Ok(())
        }
    }
}

fn cmd_format(value: &str, tag: &str) -> Result<(), CliError> {
    let tag = FormatTag::parse(tag)
        .ok_or_else(|| CliError::args(format!("unknown format tag '{}'", tag)).with_hint("raw, integer, number-N, percent-N, currency-N"))?;
    println!("{}", format_value(value, tag));
    Ok(())
}

fn cmd_parse(text: &str, default: f64) -> Result<(), CliError> {
    println!("{}", FieldValue::number(parse_number(text, default)).raw_display());
    Ok(())
}

fn cmd_config(ws: &mut Workspace) -> Result<(), CliError> {
    print_json(&json!({
        "settings_file": ws.paths.settings,
        "storage": {
            "backend": ws.settings.storage_backend,
            "path": ws.paths.storage,
        },
        "session_file": ws.paths.state,
        "settings": ws.settings,
    }))
}
