//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Scripts rely on them, so codes are never renumbered.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain     | Description                              |
//! |---------|------------|------------------------------------------|
//! | 0       | Universal  | Success                                  |
//! | 1       | Universal  | General error (unspecified)              |
//! | 2       | Universal  | CLI usage error (bad args, missing file) |
//! | 3-9     | files      | Import/export file codes                 |
//! | 20-29   | standards  | Reference standards catalog codes        |
//! | 30-39   | fields     | Field edit codes                         |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant command's error handling

use twinstate_config::StandardsError;
use twinstate_engine::session::SessionError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Files (3-9)
// =============================================================================

/// File could not be read or written.
pub const EXIT_IO: u8 = 3;

/// File was read but its contents could not be parsed.
pub const EXIT_PARSE: u8 = 4;

// =============================================================================
// Standards (20-29)
// =============================================================================

/// No standard with the requested name.
pub const EXIT_STANDARD_UNKNOWN: u8 = 20;

/// Standards catalog missing, unreadable or malformed.
pub const EXIT_STANDARD_CATALOG: u8 = 21;

// =============================================================================
// Fields (30-39)
// =============================================================================

/// No registered module owns the field.
pub const EXIT_FIELD_UNKNOWN: u8 = 30;

/// Field is calculated and cannot be edited.
pub const EXIT_FIELD_READ_ONLY: u8 = 31;

/// Map a StandardsError to its exit code.
pub fn standards_exit_code(err: &StandardsError) -> u8 {
    match err {
        StandardsError::Unknown(_) => EXIT_STANDARD_UNKNOWN,
        StandardsError::Io(_) | StandardsError::Parse(_) | StandardsError::Duplicate(_) => EXIT_STANDARD_CATALOG,
    }
}

/// Map a SessionError to its exit code.
pub fn session_exit_code(err: &SessionError) -> u8 {
    match err {
        SessionError::UnknownModule(_) => EXIT_FIELD_UNKNOWN,
        SessionError::DuplicateModule(_) => EXIT_ERROR,
    }
}
