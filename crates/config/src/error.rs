// Configuration errors

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    Io(String),
    Parse(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "settings I/O error: {}", msg),
            Self::Parse(msg) => write!(f, "invalid settings: {}", msg),
        }
    }
}

impl std::error::Error for SettingsError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StandardsError {
    Io(String),
    Parse(String),
    /// Two standards share a name.
    Duplicate(String),
    Unknown(String),
}

impl fmt::Display for StandardsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "could not read standards: {}", msg),
            Self::Parse(msg) => write!(f, "invalid standards catalog: {}", msg),
            Self::Duplicate(name) => write!(f, "standard '{}' is defined twice", name),
            Self::Unknown(name) => write!(f, "no standard named '{}'", name),
        }
    }
}

impl std::error::Error for StandardsError {}
