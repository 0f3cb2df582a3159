//! Snapshot persistence.
//!
//! Snapshots are flat `id -> {value, provenance}` maps stored per slot:
//!
//! - one global slot holding the user-modified and imported fields of the
//!   shared store (plus Reference overrides),
//! - one slot per module per scenario holding every field that module owns.
//!
//! Durable backends live in `twinstate-io`; `MemoryBackend` here serves
//! tests and the `memory` storage setting.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::field_id::{FieldId, Scenario};
use crate::value::Field;

/// Flat snapshot of one slot.
pub type Snapshot = BTreeMap<FieldId, Field>;

/// Logical storage slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlotKey {
    Global,
    Module { module: String, scenario: Scenario },
}

impl SlotKey {
    pub fn module(module: impl Into<String>, scenario: Scenario) -> Self {
        SlotKey::Module {
            module: module.into(),
            scenario,
        }
    }

    /// Stable string form used as a storage key (`global`, `module.envelope.reference`).
    pub fn storage_key(&self) -> String {
        match self {
            SlotKey::Global => "global".to_string(),
            SlotKey::Module { module, scenario } => format!("module.{}.{}", module, scenario),
        }
    }

    /// Inverse of `storage_key`.
    pub fn parse(key: &str) -> Option<Self> {
        if key == "global" {
            return Some(SlotKey::Global);
        }
        let rest = key.strip_prefix("module.")?;
        let (module, scenario) = rest.rsplit_once('.')?;
        let scenario = match scenario {
            "target" => Scenario::Target,
            "reference" => Scenario::Reference,
            "actual" => Scenario::Actual,
            _ => return None,
        };
        Some(SlotKey::module(module, scenario))
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Persistence failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// Underlying storage read/write failed.
    Io(String),
    /// Stored data could not be decoded.
    Corrupt { slot: String, message: String },
    /// Storage rejected the write for lack of space.
    QuotaExceeded(String),
    /// Storage is disabled or not reachable.
    Unavailable(String),
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "storage error: {msg}"),
            Self::Corrupt { slot, message } => write!(f, "slot '{slot}' is corrupt: {message}"),
            Self::QuotaExceeded(msg) => write!(f, "storage quota exceeded: {msg}"),
            Self::Unavailable(msg) => write!(f, "storage unavailable: {msg}"),
        }
    }
}

impl std::error::Error for PersistError {}

/// Local persistent storage for snapshots.
///
/// Methods take `&self`; implementations use interior mutability so one
/// backend can be shared (`Rc`) by the store and every scenario state.
pub trait SnapshotBackend {
    /// Load a slot. `Ok(None)` when nothing was ever saved there.
    fn load(&self, slot: &SlotKey) -> Result<Option<Snapshot>, PersistError>;

    /// Replace a slot's contents.
    fn save(&self, slot: &SlotKey, snapshot: &Snapshot) -> Result<(), PersistError>;

    /// Delete one slot.
    fn remove(&self, slot: &SlotKey) -> Result<(), PersistError>;

    /// Delete every slot.
    fn clear(&self) -> Result<(), PersistError>;

    /// List the slots that currently hold data.
    fn slots(&self) -> Result<Vec<SlotKey>, PersistError>;
}

/// In-process backend. Stores each slot as its serialized JSON text, the
/// same shape a browser-style key/value store would hold.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    slots: RefCell<BTreeMap<String, String>>,
    failing: Cell<bool>,
    writes: Cell<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (quota/disabled simulation).
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    /// Number of successful `save` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    /// Raw stored text of a slot.
    pub fn raw(&self, slot: &SlotKey) -> Option<String> {
        self.slots.borrow().get(&slot.storage_key()).cloned()
    }

    /// Overwrite a slot's raw text, bypassing serialization.
    pub fn put_raw(&self, slot: &SlotKey, text: impl Into<String>) {
        self.slots.borrow_mut().insert(slot.storage_key(), text.into());
    }

    fn check(&self) -> Result<(), PersistError> {
        if self.failing.get() {
            Err(PersistError::QuotaExceeded("memory backend set to fail".into()))
        } else {
            Ok(())
        }
    }
}

impl SnapshotBackend for MemoryBackend {
    fn load(&self, slot: &SlotKey) -> Result<Option<Snapshot>, PersistError> {
        self.check()?;
        let slots = self.slots.borrow();
        let Some(text) = slots.get(&slot.storage_key()) else {
            return Ok(None);
        };
        serde_json::from_str(text)
            .map(Some)
            .map_err(|e| PersistError::Corrupt {
                slot: slot.storage_key(),
                message: e.to_string(),
            })
    }

    fn save(&self, slot: &SlotKey, snapshot: &Snapshot) -> Result<(), PersistError> {
        self.check()?;
        let text = serde_json::to_string(snapshot).map_err(|e| PersistError::Io(e.to_string()))?;
        self.slots.borrow_mut().insert(slot.storage_key(), text);
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }

    fn remove(&self, slot: &SlotKey) -> Result<(), PersistError> {
        self.check()?;
        self.slots.borrow_mut().remove(&slot.storage_key());
        Ok(())
    }

    fn clear(&self) -> Result<(), PersistError> {
        self.check()?;
        self.slots.borrow_mut().clear();
        Ok(())
    }

    fn slots(&self) -> Result<Vec<SlotKey>, PersistError> {
        self.check()?;
        Ok(self
            .slots
            .borrow()
            .keys()
            .filter_map(|k| SlotKey::parse(k))
            .collect())
    }
}

/// Shared handle to a backend with failure-swallowing semantics.
///
/// Every failure is logged and reported as "nothing persisted"; callers never
/// see an error, so a broken storage layer cannot block initialization or a
/// calculation cascade.
#[derive(Clone)]
pub struct PersistenceAdapter {
    backend: Rc<dyn SnapshotBackend>,
}

impl PersistenceAdapter {
    pub fn new(backend: Rc<dyn SnapshotBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Rc::new(MemoryBackend::new()))
    }

    pub fn backend(&self) -> &Rc<dyn SnapshotBackend> {
        &self.backend
    }

    /// Load a slot, treating any failure as an empty slot.
    pub fn load(&self, slot: &SlotKey) -> Snapshot {
        match self.backend.load(slot) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => Snapshot::new(),
            Err(e) => {
                log::warn!("could not load {}: {}", slot, e);
                Snapshot::new()
            }
        }
    }

    /// Save a slot. Returns false (after logging) on failure.
    pub fn save(&self, slot: &SlotKey, snapshot: &Snapshot) -> bool {
        match self.backend.save(slot, snapshot) {
            Ok(()) => {
                log::debug!("saved {} ({} fields)", slot, snapshot.len());
                true
            }
            Err(e) => {
                log::warn!("could not save {}: {}", slot, e);
                false
            }
        }
    }

    pub fn remove(&self, slot: &SlotKey) -> bool {
        match self.backend.remove(slot) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("could not remove {}: {}", slot, e);
                false
            }
        }
    }

    pub fn clear(&self) -> bool {
        match self.backend.clear() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("could not clear storage: {}", e);
                false
            }
        }
    }
}

impl fmt::Debug for PersistenceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceAdapter").finish_non_exhaustive()
    }
}

/// Owned trailing-edge debouncer.
///
/// `schedule` (re)starts the window; the action becomes due once the window
/// has elapsed with no further `schedule` calls. Time is passed in so
/// callers (and tests) control the clock.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Restart the pending window from `now`.
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    /// Consume the pending action if it is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        if self.is_due(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    /// Consume the pending action regardless of the deadline.
    pub fn take_pending(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FieldValue, Provenance};

    fn snapshot(pairs: &[(&str, f64)]) -> Snapshot {
        pairs
            .iter()
            .map(|(k, v)| {
                (
                    FieldId::new(*k),
                    Field::new(FieldValue::number(*v), Provenance::UserModified),
                )
            })
            .collect()
    }

    #[test]
    fn test_slot_key_roundtrip() {
        let slots = [
            SlotKey::Global,
            SlotKey::module("envelope", Scenario::Target),
            SlotKey::module("heat.gain", Scenario::Reference),
        ];
        for slot in slots {
            assert_eq!(SlotKey::parse(&slot.storage_key()), Some(slot.clone()));
        }
        assert_eq!(SlotKey::parse("module.x.sideways"), None);
        assert_eq!(SlotKey::parse("nonsense"), None);
    }

    #[test]
    fn test_memory_backend_save_load() {
        let backend = MemoryBackend::new();
        let snap = snapshot(&[("d_1", 1.0), ("d_2", 2.5)]);

        backend.save(&SlotKey::Global, &snap).unwrap();
        assert_eq!(backend.load(&SlotKey::Global).unwrap(), Some(snap));
        assert_eq!(backend.load(&SlotKey::module("m", Scenario::Target)).unwrap(), None);
        assert_eq!(backend.slots().unwrap(), vec![SlotKey::Global]);
        assert_eq!(backend.write_count(), 1);
    }

    #[test]
    fn test_adapter_swallows_failures() {
        let backend = Rc::new(MemoryBackend::new());
        let adapter = PersistenceAdapter::new(backend.clone());

        backend.set_failing(true);
        assert!(!adapter.save(&SlotKey::Global, &snapshot(&[("a", 1.0)])));
        assert!(adapter.load(&SlotKey::Global).is_empty());
        assert!(!adapter.clear());
    }

    #[test]
    fn test_adapter_treats_corrupt_slot_as_empty() {
        let backend = Rc::new(MemoryBackend::new());
        backend.put_raw(&SlotKey::Global, "{not json");
        let adapter = PersistenceAdapter::new(backend);

        assert!(adapter.load(&SlotKey::Global).is_empty());
    }

    #[test]
    fn test_debouncer_restarts_on_schedule() {
        let start = Instant::now();
        let mut debounce = Debouncer::new(Duration::from_millis(1000));

        debounce.schedule(start);
        debounce.schedule(start + Duration::from_millis(800));

        assert!(!debounce.take_due(start + Duration::from_millis(1200)));
        assert!(debounce.take_due(start + Duration::from_millis(1800)));
        assert!(!debounce.is_pending());
    }

    #[test]
    fn test_debouncer_zero_window_due_immediately() {
        let now = Instant::now();
        let mut debounce = Debouncer::new(Duration::ZERO);
        debounce.schedule(now);
        assert!(debounce.take_due(now));
    }

    #[test]
    fn test_debouncer_cancel() {
        let now = Instant::now();
        let mut debounce = Debouncer::new(Duration::from_millis(10));
        debounce.schedule(now);
        debounce.cancel();
        assert!(!debounce.take_pending());
    }
}
