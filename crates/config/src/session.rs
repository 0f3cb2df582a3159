// Remembered session state
// Stored at ~/.config/twinstate/session.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use twinstate_engine::module::Mode;

use crate::error::SettingsError;

/// What the last run left selected. Values live in the snapshot store; this
/// only remembers the choices around them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub version: u32,
    pub mode: Mode,
    pub standard: Option<String>,
    pub last_import: Option<PathBuf>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            version: 1,
            mode: Mode::Target,
            standard: None,
            last_import: None,
        }
    }
}

impl SessionState {
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("twinstate")
            .join("session.json")
    }

    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Missing or unreadable state is a fresh session.
    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        self.save_to(&Self::path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| SettingsError::Io(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| SettingsError::Parse(e.to_string()))?;
        fs::write(path, json).map_err(|e| SettingsError::Io(e.to_string()))
    }
}
