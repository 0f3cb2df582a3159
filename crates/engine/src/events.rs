//! Field change notifications.
//!
//! `ListenerBus` is the per-field subscriber registry behind
//! `FieldStore::set_value`. Delivery is synchronous and unordered between
//! siblings. A failing subscriber (error return or panic) is logged and
//! skipped; the remaining subscribers and the surrounding cascade continue.
//!
//! While quarantine is raised nothing is delivered at all.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use rustc_hash::FxHashMap;

use crate::field_id::FieldId;
use crate::value::{FieldValue, Provenance};

/// Why a listener is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A non-computed write landed on the field.
    Write,
    /// An explicit recompute pass reached the field.
    Recalculate,
}

/// Payload delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub field: FieldId,
    pub new_value: FieldValue,
    /// `None` when the field did not exist before this write.
    pub old_value: Option<FieldValue>,
    pub provenance: Provenance,
    pub kind: ChangeKind,
}

/// Error returned by a listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerError {
    pub message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener failed: {}", self.message)
    }
}

impl std::error::Error for ListenerError {}

impl From<String> for ListenerError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for ListenerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Callback type for field listeners.
pub type Listener = Box<dyn FnMut(&FieldChange) -> Result<(), ListenerError>>;

/// Handle returned by `add_listener`, used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Counts from one `notify` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyOutcome {
    pub delivered: usize,
    pub failed: usize,
}

impl NotifyOutcome {
    pub fn merge(&mut self, other: NotifyOutcome) {
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}

/// Per-field subscriber registry with a global quarantine switch.
#[derive(Default)]
pub struct ListenerBus {
    next_id: u64,
    listeners: FxHashMap<FieldId, Vec<(ListenerId, Listener)>>,
    owners: FxHashMap<ListenerId, FieldId>,
    quarantined: bool,
}

impl ListenerBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `callback` to changes of `field`.
    pub fn add_listener(&mut self, field: FieldId, callback: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.owners.insert(id, field.clone());
        self.listeners.entry(field).or_default().push((id, callback));
        id
    }

    /// Unsubscribe. Returns false if the handle was unknown.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let Some(field) = self.owners.remove(&id) else {
            return false;
        };
        if let Some(list) = self.listeners.get_mut(&field) {
            list.retain(|(lid, _)| *lid != id);
            if list.is_empty() {
                self.listeners.remove(&field);
            }
        }
        true
    }

    pub fn listener_count(&self, field: &FieldId) -> usize {
        self.listeners.get(field).map_or(0, |l| l.len())
    }

    pub fn total_listeners(&self) -> usize {
        self.owners.len()
    }

    pub fn set_quarantine(&mut self, active: bool) {
        self.quarantined = active;
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantined
    }

    /// Deliver `change` to every listener of `change.field`.
    ///
    /// Skipped entirely while quarantined.
    pub fn notify(&mut self, change: &FieldChange) -> NotifyOutcome {
        let mut outcome = NotifyOutcome::default();
        if self.quarantined {
            return outcome;
        }
        let Some(list) = self.listeners.get_mut(&change.field) else {
            return outcome;
        };

        for (id, callback) in list.iter_mut() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(change)));
            match result {
                Ok(Ok(())) => outcome.delivered += 1,
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    log::warn!("listener {:?} on {} failed: {}", id, change.field, e);
                }
                Err(_) => {
                    outcome.failed += 1;
                    log::warn!("listener {:?} on {} panicked", id, change.field);
                }
            }
        }

        outcome
    }

    /// Drop every listener.
    pub fn clear(&mut self) {
        self.listeners.clear();
        self.owners.clear();
    }
}

impl fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBus")
            .field("fields", &self.listeners.len())
            .field("listeners", &self.owners.len())
            .field("quarantined", &self.quarantined)
            .finish()
    }
}

/// Simple change collector for testing.
#[derive(Default, Debug)]
pub struct EventCollector {
    events: Vec<FieldChange>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, change: FieldChange) {
        self.events.push(change);
    }

    pub fn events(&self) -> &[FieldChange] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of recorded changes for one field.
    pub fn count_for(&self, field: &str) -> usize {
        self.events.iter().filter(|e| e.field.as_str() == field).count()
    }

    /// Filter to a single change kind.
    pub fn of_kind(&self, kind: ChangeKind) -> Vec<&FieldChange> {
        self.events.iter().filter(|e| e.kind == kind).collect()
    }
}
