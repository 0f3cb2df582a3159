// User settings
// Loaded from ~/.config/twinstate/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use twinstate_engine::graph_export::GroupRule;
use twinstate_engine::session::Timings;

use crate::error::SettingsError;

/// Where snapshots are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Single SQLite file (default)
    #[default]
    Sqlite,
    /// One JSON file per slot in a directory
    Json,
    /// Nothing survives the process
    Memory,
}

impl StorageBackend {
    /// Default file or directory name under the data dir
    pub fn default_file_name(&self) -> &'static str {
        match self {
            StorageBackend::Sqlite => "snapshots.sqlite",
            StorageBackend::Json => "snapshots",
            StorageBackend::Memory => "",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // Persistence
    #[serde(rename = "persistence.debounceMs")]
    pub persist_debounce_ms: u64,

    #[serde(rename = "persistence.scenarioDebounceMs")]
    pub scenario_debounce_ms: u64,

    // Engine
    #[serde(rename = "engine.recomputeDebounceMs")]
    pub recompute_debounce_ms: u64,

    // Storage
    #[serde(rename = "storage.backend")]
    pub storage_backend: StorageBackend,

    #[serde(rename = "storage.path")]
    pub storage_path: Option<PathBuf>, // None = data dir default

    // Standards
    #[serde(rename = "standards.path")]
    pub standards_path: Option<PathBuf>, // None = built-in catalog

    #[serde(rename = "standards.default")]
    pub default_standard: Option<String>,

    // Graph export
    #[serde(rename = "graph.groups")]
    pub graph_groups: Vec<GroupRule>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            persist_debounce_ms: 1000,
            scenario_debounce_ms: 0,
            recompute_debounce_ms: 50,
            storage_backend: StorageBackend::default(),
            storage_path: None,
            standards_path: None,
            default_standard: None,
            graph_groups: Vec::new(),
        }
    }
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("twinstate");
        config_dir.join("settings.json")
    }

    /// Directory for snapshot storage when no path is configured
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("twinstate")
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Self {
        let path = Self::config_path();

        if !path.exists() {
            let settings = Self::default();
            settings.create_default_file(&path);
            return settings;
        }

        Self::load_from(&path)
    }

    /// Load settings from `path`. Any read or parse failure yields defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("{}: {}, using default settings", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Error reading {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parse settings JSON. Lines starting with `//` are comments.
    pub fn parse(contents: &str) -> Result<Self, SettingsError> {
        let cleaned: String = contents
            .lines()
            .filter(|line| !line.trim().starts_with("//"))
            .collect::<Vec<_>>()
            .join("\n");

        serde_json::from_str(&cleaned).map_err(|e| SettingsError::Parse(e.to_string()))
    }

    /// Save current settings to the default location
    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))?;

        fs::write(path, json).map_err(|e| SettingsError::Io(e.to_string()))
    }

    /// Debounce windows for a session
    pub fn timings(&self) -> Timings {
        Timings {
            persist: Duration::from_millis(self.persist_debounce_ms),
            recompute: Duration::from_millis(self.recompute_debounce_ms),
            scenario: Duration::from_millis(self.scenario_debounce_ms),
        }
    }

    /// Effective snapshot location for the configured backend
    pub fn resolved_storage_path(&self) -> PathBuf {
        self.storage_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join(self.storage_backend.default_file_name()))
    }

    /// Create default settings file with comments
    fn create_default_file(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!("Error creating config directory: {}", e);
                return;
            }
        }

        let default_config = r#"{
    // Snapshot writes are debounced; a burst of edits is saved once
    "persistence.debounceMs": 1000,
    // Per-module scenario snapshots (0 = save on every edit)
    "persistence.scenarioDebounceMs": 0,

    // Window collapsing repeated recompute requests
    "engine.recomputeDebounceMs": 50,

    // Storage options: "sqlite", "json", "memory"
    "storage.backend": "sqlite",
    "storage.path": null,

    // Reference standards (null = built-in catalog)
    "standards.path": null,
    "standards.default": null,

    // Graph export groups by row number, e.g.
    // { "start": 10, "end": 29, "label": "Climate" }
    "graph.groups": []
}
"#;

        if let Err(e) = fs::write(path, default_config) {
            log::warn!("Error writing default settings.json: {}", e);
        }
    }

    /// Get the config file path for display/opening
    pub fn config_path_display() -> String {
        Self::config_path().to_string_lossy().to_string()
    }
}
