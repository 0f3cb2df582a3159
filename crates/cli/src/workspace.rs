// Session setup shared by every command: settings, storage, standards,
// the sample modules and the persisted mode/standard selection.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use twinstate_config::{SessionState, Settings, StandardsCatalog, StorageBackend};
use twinstate_engine::persist::{MemoryBackend, PersistError, PersistenceAdapter, SnapshotBackend};
use twinstate_engine::sample::sample_modules;
use twinstate_engine::session::Session;
use twinstate_engine::store::FieldStore;
use twinstate_io::{JsonDirBackend, SqliteBackend};

use crate::exit_codes::standards_exit_code;
use crate::CliError;

/// Where a workspace keeps its files, after flags and settings are applied.
#[derive(Debug, Clone)]
pub struct Paths {
    pub settings: PathBuf,
    pub storage: PathBuf,
    pub state: PathBuf,
}

impl Paths {
    pub fn resolve(settings_path: Option<&Path>, data_dir: Option<&Path>, settings: &Settings) -> Self {
        let settings_file = settings_path.map(Path::to_path_buf).unwrap_or_else(Settings::config_path);
        match data_dir {
            Some(dir) => Self {
                settings: settings_file,
                storage: settings
                    .storage_path
                    .clone()
                    .unwrap_or_else(|| dir.join(settings.storage_backend.default_file_name())),
                state: dir.join("session.json"),
            },
            None => Self {
                settings: settings_file,
                storage: settings.resolved_storage_path(),
                state: SessionState::path(),
            },
        }
    }
}

pub fn open_backend(kind: StorageBackend, path: &Path) -> Result<Rc<dyn SnapshotBackend>, PersistError> {
    Ok(match kind {
        StorageBackend::Sqlite => Rc::new(SqliteBackend::open(path)?),
        StorageBackend::Json => Rc::new(JsonDirBackend::open(path)?),
        StorageBackend::Memory => Rc::new(MemoryBackend::new()),
    })
}

pub struct Workspace {
    pub settings: Settings,
    pub standards: StandardsCatalog,
    pub state: SessionState,
    pub paths: Paths,
    pub session: Session,
}

impl Workspace {
    /// Load settings, open storage and rebuild the session from it.
    pub fn open(
        settings_path: Option<&Path>,
        data_dir: Option<&Path>,
        backend_override: Option<StorageBackend>,
    ) -> Result<Self, CliError> {
        let mut settings = match settings_path {
            Some(path) if path.exists() => Settings::load_from(path),
            Some(_) => Settings::default(),
            None => Settings::load(),
        };
        if let Some(kind) = backend_override {
            settings.storage_backend = kind;
        }
        let paths = Paths::resolve(settings_path, data_dir, &settings);
        let state = SessionState::load_from(&paths.state);

        let standards = StandardsCatalog::load_or_builtin(settings.standards_path.as_deref()).map_err(|e| {
            CliError {
                code: standards_exit_code(&e),
                message: e.to_string(),
                hint: Some("check \"standards.path\" in settings".to_string()),
            }
        })?;

        // Storage problems never block startup.
        let backend = match open_backend(settings.storage_backend, &paths.storage) {
            Ok(backend) => backend,
            Err(e) => {
                log::warn!("{}: {}; nothing will be saved this run", paths.storage.display(), e);
                Rc::new(MemoryBackend::new())
            }
        };

        let mut store = FieldStore::new();
        store.set_edit_policy(standards.edit_policy());
        let mut session = Session::with_persistence(store, PersistenceAdapter::new(backend), settings.timings());

        let standard_name = state.standard.clone().or_else(|| settings.default_standard.clone());
        if let Some(name) = standard_name {
            let dataset = standards.dataset(&name).map_err(|e| CliError {
                code: standards_exit_code(&e),
                message: e.to_string(),
                hint: Some(format!("available: {}", standards.names().join(", "))),
            })?;
            session.preload_standard(dataset);
        }

        for module in sample_modules() {
            session.register_module(module).map_err(CliError::session)?;
        }
        session.restore();
        session.switch_mode(state.mode);

        Ok(Self {
            settings,
            standards,
            state,
            paths,
            session,
        })
    }

    /// Write pending snapshots and the session state file.
    pub fn close(mut self) -> Result<(), CliError> {
        let saves = self.session.flush();
        log::debug!("flushed {} snapshot slots", saves);
        self.state
            .save_to(&self.paths.state)
            .map_err(|e| CliError::io(format!("{}: {}", self.paths.state.display(), e)))
    }
}
