// Configuration loading

pub mod error;
pub mod session;
pub mod settings;
pub mod standards;

pub use error::{SettingsError, StandardsError};
pub use session::SessionState;
pub use settings::{Settings, StorageBackend};
pub use standards::{EditPolicyTable, StandardsCatalog};
