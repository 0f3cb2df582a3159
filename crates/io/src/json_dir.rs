// Snapshot storage as one JSON file per slot

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use twinstate_engine::persist::{PersistError, SlotKey, Snapshot, SnapshotBackend};

/// Directory backend. Slot `module.energy.target` lives in
/// `<dir>/module.energy.target.json`.
#[derive(Debug, Clone)]
pub struct JsonDirBackend {
    dir: PathBuf,
}

impl JsonDirBackend {
    pub fn open(dir: &Path) -> Result<Self, PersistError> {
        fs::create_dir_all(dir).map_err(|e| PersistError::Unavailable(format!("{}: {}", dir.display(), e)))?;
        Ok(Self { dir: dir.to_path_buf() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, slot: &SlotKey) -> PathBuf {
        self.dir.join(format!("{}.json", slot.storage_key()))
    }
}

impl SnapshotBackend for JsonDirBackend {
    fn load(&self, slot: &SlotKey) -> Result<Option<Snapshot>, PersistError> {
        let file = match File::open(self.slot_path(slot)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::Io(e.to_string())),
        };
        serde_json::from_reader(BufReader::new(file))
            .map(Some)
            .map_err(|e| PersistError::Corrupt {
                slot: slot.storage_key(),
                message: e.to_string(),
            })
    }

    fn save(&self, slot: &SlotKey, snapshot: &Snapshot) -> Result<(), PersistError> {
        let path = self.slot_path(slot);
        let tmp = path.with_extension("json.tmp");

        let file = File::create(&tmp).map_err(|e| PersistError::Io(e.to_string()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, snapshot).map_err(|e| PersistError::Io(e.to_string()))?;
        writer.flush().map_err(|e| PersistError::Io(e.to_string()))?;
        drop(writer);

        fs::rename(&tmp, &path).map_err(|e| PersistError::Io(e.to_string()))
    }

    fn remove(&self, slot: &SlotKey) -> Result<(), PersistError> {
        match fs::remove_file(self.slot_path(slot)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PersistError::Io(e.to_string())),
        }
    }

    fn clear(&self) -> Result<(), PersistError> {
        for slot in self.slots()? {
            self.remove(&slot)?;
        }
        Ok(())
    }

    fn slots(&self) -> Result<Vec<SlotKey>, PersistError> {
        let entries = fs::read_dir(&self.dir).map_err(|e| PersistError::Io(e.to_string()))?;

        let mut slots = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| PersistError::Io(e.to_string()))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match SlotKey::parse(stem) {
                Some(slot) => slots.push(slot),
                None => log::debug!("skipping {}: not a snapshot slot", path.display()),
            }
        }
        slots.sort();
        Ok(slots)
    }
}
