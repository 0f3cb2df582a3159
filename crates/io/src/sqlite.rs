// Snapshot storage in a single SQLite file

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use twinstate_engine::field_id::FieldId;
use twinstate_engine::persist::{PersistError, SlotKey, Snapshot, SnapshotBackend};
use twinstate_engine::value::{Field, FieldValue, Provenance};

use crate::SNAPSHOT_FORMAT_VERSION;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS fields (
    slot TEXT NOT NULL,
    field_id TEXT NOT NULL,
    value_json TEXT NOT NULL,    -- FieldValue as JSON (null, number, string, bool)
    provenance TEXT NOT NULL,    -- snake_case provenance name
    PRIMARY KEY (slot, field_id)
);

CREATE TABLE IF NOT EXISTS slots (
    slot TEXT PRIMARY KEY,
    saved_at TEXT NOT NULL       -- RFC 3339
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

fn io_err(e: rusqlite::Error) -> PersistError {
    PersistError::Io(e.to_string())
}

fn provenance_name(provenance: Provenance) -> Result<String, PersistError> {
    match serde_json::to_value(provenance) {
        Ok(serde_json::Value::String(name)) => Ok(name),
        Ok(other) => Err(PersistError::Io(format!("unexpected provenance encoding: {}", other))),
        Err(e) => Err(PersistError::Io(e.to_string())),
    }
}

pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open (or create) a snapshot database at `path`.
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| PersistError::Unavailable(e.to_string()))?;
            }
        }
        let conn = Connection::open(path).map_err(|e| PersistError::Unavailable(e.to_string()))?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, PersistError> {
        let conn = Connection::open_in_memory().map_err(|e| PersistError::Unavailable(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, PersistError> {
        conn.execute_batch(SCHEMA).map_err(io_err)?;

        let version: Option<String> = conn
            .query_row("SELECT value FROM meta WHERE key = 'format_version'", [], |row| row.get(0))
            .optional()
            .map_err(io_err)?;

        let parsed = version.as_deref().map(str::parse::<u32>);
        match parsed {
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('format_version', ?1)",
                    params![SNAPSHOT_FORMAT_VERSION.to_string()],
                )
                .map_err(io_err)?;
            }
            Some(Ok(v)) if v <= SNAPSHOT_FORMAT_VERSION => {}
            Some(_) => {
                return Err(PersistError::Unavailable(format!(
                    "snapshot database written by a newer version (format {})",
                    version.as_deref().unwrap_or("?")
                )));
            }
        }

        Ok(Self { conn })
    }

    /// When a slot was last saved (RFC 3339), if ever.
    pub fn saved_at(&self, slot: &SlotKey) -> Result<Option<String>, PersistError> {
        self.conn
            .query_row(
                "SELECT saved_at FROM slots WHERE slot = ?1",
                params![slot.storage_key()],
                |row| row.get(0),
            )
            .optional()
            .map_err(io_err)
    }
}

impl SnapshotBackend for SqliteBackend {
    fn load(&self, slot: &SlotKey) -> Result<Option<Snapshot>, PersistError> {
        let key = slot.storage_key();
        if self.saved_at(slot)?.is_none() {
            return Ok(None);
        }

        let mut stmt = self
            .conn
            .prepare("SELECT field_id, value_json, provenance FROM fields WHERE slot = ?1")
            .map_err(io_err)?;
        let rows = stmt
            .query_map(params![key], |row| {
                let id: String = row.get(0)?;
                let value_json: String = row.get(1)?;
                let provenance: String = row.get(2)?;
                Ok((id, value_json, provenance))
            })
            .map_err(io_err)?;

        let corrupt = |message: String| PersistError::Corrupt {
            slot: key.clone(),
            message,
        };

        let mut snapshot = Snapshot::new();
        for row in rows {
            let (id, value_json, provenance) = row.map_err(io_err)?;
            let value: FieldValue =
                serde_json::from_str(&value_json).map_err(|e| corrupt(format!("{}: {}", id, e)))?;
            let provenance: Provenance = serde_json::from_value(serde_json::Value::String(provenance))
                .map_err(|e| corrupt(format!("{}: {}", id, e)))?;
            snapshot.insert(FieldId::new(id), Field::new(value, provenance));
        }
        Ok(Some(snapshot))
    }

    fn save(&self, slot: &SlotKey, snapshot: &Snapshot) -> Result<(), PersistError> {
        let key = slot.storage_key();

        self.conn.execute("BEGIN TRANSACTION", []).map_err(io_err)?;
        let result: Result<(), PersistError> = (|| {
            self.conn
                .execute("DELETE FROM fields WHERE slot = ?1", params![key])
                .map_err(io_err)?;
            {
                let mut stmt = self
                    .conn
                    .prepare("INSERT INTO fields (slot, field_id, value_json, provenance) VALUES (?1, ?2, ?3, ?4)")
                    .map_err(io_err)?;
                for (id, field) in snapshot {
                    let value_json =
                        serde_json::to_string(&field.value).map_err(|e| PersistError::Io(e.to_string()))?;
                    stmt.execute(params![key, id.as_str(), value_json, provenance_name(field.provenance)?])
                        .map_err(io_err)?;
                }
            }
            self.conn
                .execute(
                    "INSERT OR REPLACE INTO slots (slot, saved_at) VALUES (?1, ?2)",
                    params![key, chrono::Utc::now().to_rfc3339()],
                )
                .map_err(io_err)?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.conn.execute("COMMIT", []).map_err(io_err)?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute("ROLLBACK", []) {
                    log::warn!("rollback of slot {} failed: {}", key, rollback);
                }
                Err(e)
            }
        }
    }

    fn remove(&self, slot: &SlotKey) -> Result<(), PersistError> {
        let key = slot.storage_key();
        self.conn
            .execute("DELETE FROM fields WHERE slot = ?1", params![key])
            .map_err(io_err)?;
        self.conn
            .execute("DELETE FROM slots WHERE slot = ?1", params![key])
            .map_err(io_err)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistError> {
        self.conn
            .execute_batch("DELETE FROM fields; DELETE FROM slots;")
            .map_err(io_err)
    }

    fn slots(&self) -> Result<Vec<SlotKey>, PersistError> {
        let mut stmt = self
            .conn
            .prepare("SELECT slot FROM slots ORDER BY slot")
            .map_err(io_err)?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(io_err)?;

        let mut slots = Vec::new();
        for key in keys {
            let key = key.map_err(io_err)?;
            match SlotKey::parse(&key) {
                Some(slot) => slots.push(slot),
                None => log::warn!("ignoring unrecognised snapshot slot '{}'", key),
            }
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use twinstate_engine::field_id::Scenario;

    fn sample_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert(
            FieldId::new("area"),
            Field::new(FieldValue::number(120.5), Provenance::UserModified),
        );
        snapshot.insert(
            FieldId::new("ref_rate"),
            Field::new(FieldValue::number(0.09), Provenance::Overridden),
        );
        snapshot.insert(
            FieldId::new("label"),
            Field::new(FieldValue::text("north wing"), Provenance::Imported),
        );
        snapshot.insert(FieldId::new("note"), Field::new(FieldValue::Empty, Provenance::Imported));
        snapshot
    }

    #[test]
    fn test_save_and_load_slot() {
        let file = NamedTempFile::new().unwrap();
        let backend = SqliteBackend::open(file.path()).unwrap();
        let snapshot = sample_snapshot();

        backend.save(&SlotKey::Global, &snapshot).unwrap();
        assert_eq!(backend.load(&SlotKey::Global).unwrap(), Some(snapshot));
        assert!(backend.saved_at(&SlotKey::Global).unwrap().is_some());
    }

    #[test]
    fn test_reopen_preserves_slots() {
        let file = NamedTempFile::new().unwrap();
        let slot = SlotKey::module("energy", Scenario::Reference);
        {
            let backend = SqliteBackend::open(file.path()).unwrap();
            backend.save(&slot, &sample_snapshot()).unwrap();
            backend.save(&SlotKey::Global, &Snapshot::new()).unwrap();
        }

        let backend = SqliteBackend::open(file.path()).unwrap();
        assert_eq!(backend.slots().unwrap(), vec![SlotKey::Global, slot.clone()]);
        assert_eq!(backend.load(&slot).unwrap().unwrap().len(), 4);
        // An empty slot that was saved is distinct from one never written.
        assert_eq!(backend.load(&SlotKey::Global).unwrap(), Some(Snapshot::new()));
        assert_eq!(backend.load(&SlotKey::module("cost", Scenario::Target)).unwrap(), None);
    }

    #[test]
    fn test_save_replaces_previous_contents() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.save(&SlotKey::Global, &sample_snapshot()).unwrap();

        let mut smaller = Snapshot::new();
        smaller.insert(FieldId::new("area"), Field::new(FieldValue::number(1.0), Provenance::UserModified));
        backend.save(&SlotKey::Global, &smaller).unwrap();

        assert_eq!(backend.load(&SlotKey::Global).unwrap(), Some(smaller));
    }

    #[test]
    fn test_remove_and_clear() {
        let backend = SqliteBackend::in_memory().unwrap();
        let slot = SlotKey::module("cost", Scenario::Target);
        backend.save(&SlotKey::Global, &sample_snapshot()).unwrap();
        backend.save(&slot, &sample_snapshot()).unwrap();

        backend.remove(&slot).unwrap();
        assert_eq!(backend.slots().unwrap(), vec![SlotKey::Global]);

        backend.clear().unwrap();
        assert!(backend.slots().unwrap().is_empty());
        assert_eq!(backend.load(&SlotKey::Global).unwrap(), None);
    }

    #[test]
    fn test_corrupt_row_reported() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.save(&SlotKey::Global, &Snapshot::new()).unwrap();
        backend
            .conn
            .execute(
                "INSERT INTO fields (slot, field_id, value_json, provenance) VALUES ('global', 'x', '{bad', 'imported')",
                [],
            )
            .unwrap();

        assert!(matches!(
            backend.load(&SlotKey::Global),
            Err(PersistError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_newer_format_rejected() {
        let file = NamedTempFile::new().unwrap();
        {
            let backend = SqliteBackend::open(file.path()).unwrap();
            backend
                .conn
                .execute("UPDATE meta SET value = '99' WHERE key = 'format_version'", [])
                .unwrap();
        }
        assert!(matches!(
            SqliteBackend::open(file.path()),
            Err(PersistError::Unavailable(_))
        ));
    }
}
