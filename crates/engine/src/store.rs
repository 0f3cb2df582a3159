//! The shared field store.
//!
//! `FieldStore` is the single source of truth for every field value in a
//! session. Target values live under plain ids, Reference values under
//! `ref_` ids (see `field_id`). Non-computed writes mark transitive
//! dependents dirty and notify listeners synchronously; computed writes
//! (calculated/derived) do neither, so a calculator writing its outputs never
//! re-triggers itself.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::catalog::StandardDataset;
use crate::dep_graph::{DepGraph, Registration};
use crate::events::{ChangeKind, FieldChange, Listener, ListenerBus, ListenerId, NotifyOutcome};
use crate::field_id::{FieldId, Scenario};
use crate::persist::{Debouncer, PersistenceAdapter, SlotKey, Snapshot};
use crate::policy::{NoIndependentEdits, ReferenceEditPolicy};
use crate::recalc::RecalcReport;
use crate::value::{Field, FieldValue, Provenance};

/// Default debounce window for global snapshot writes.
pub const DEFAULT_PERSIST_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Result of a bulk import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Entries written to the store.
    pub applied: usize,
    /// Entries whose value and provenance were already current.
    pub unchanged: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertOutcome {
    /// This many captured fields were written back.
    Restored(usize),
    /// No import happened since the last reset.
    NoImport,
}

pub struct FieldStore {
    fields: FxHashMap<FieldId, Field>,
    /// Independently edited Reference values, keyed by base id.
    reference_overrides: FxHashMap<FieldId, FieldValue>,
    graph: DepGraph,
    listeners: ListenerBus,
    muted: bool,
    display_scenario: Scenario,
    active_standard: Option<String>,
    policy: Box<dyn ReferenceEditPolicy>,
    persistence: Option<PersistenceAdapter>,
    save_debounce: Debouncer,
    last_import: Option<BTreeMap<FieldId, FieldValue>>,
}

impl Default for FieldStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldStore {
    pub fn new() -> Self {
        Self {
            fields: FxHashMap::default(),
            reference_overrides: FxHashMap::default(),
            graph: DepGraph::new(),
            listeners: ListenerBus::new(),
            muted: false,
            display_scenario: Scenario::Target,
            active_standard: None,
            policy: Box::new(NoIndependentEdits),
            persistence: None,
            save_debounce: Debouncer::new(DEFAULT_PERSIST_DEBOUNCE),
            last_import: None,
        }
    }

    /// Install the policy deciding which Reference edits become overrides.
    pub fn set_edit_policy(&mut self, policy: impl ReferenceEditPolicy + 'static) {
        self.policy = Box::new(policy);
    }

    /// Attach a backend for the global snapshot slot.
    pub fn attach_persistence(&mut self, adapter: PersistenceAdapter, debounce: Duration) {
        self.persistence = Some(adapter);
        self.save_debounce = Debouncer::new(debounce);
    }

    pub fn persistence(&self) -> Option<&PersistenceAdapter> {
        self.persistence.as_ref()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Current value of a store key.
    ///
    /// Reference keys consult the override map first.
    pub fn get_value(&self, id: &FieldId) -> Option<&FieldValue> {
        if id.scenario() == Scenario::Reference {
            if let Some(v) = self.reference_overrides.get(&id.base()) {
                return Some(v);
            }
        }
        self.fields.get(id).map(|f| &f.value)
    }

    /// Value of `id` in an explicit scenario. `id` may be plain or prefixed.
    pub fn get_value_for_scenario(&self, id: &FieldId, scenario: Scenario) -> Option<&FieldValue> {
        self.get_value(&scenario.bridge(id))
    }

    /// Value of `id` resolved through the store's display scenario.
    pub fn get_display_value(&self, id: &FieldId) -> Option<&FieldValue> {
        self.get_value_for_scenario(id, self.display_scenario)
    }

    /// Numeric value for calculation code. Missing or non-numeric values
    /// become `default`; this is never an error.
    pub fn number_for_scenario(&self, id: &FieldId, scenario: Scenario, default: f64) -> f64 {
        match self.get_value_for_scenario(id, scenario).and_then(FieldValue::as_number) {
            Some(n) => n,
            None => {
                log::debug!("{} missing in {}, using {}", id, scenario, default);
                default
            }
        }
    }

    pub fn field(&self, id: &FieldId) -> Option<&Field> {
        self.fields.get(id)
    }

    pub fn provenance(&self, id: &FieldId) -> Option<Provenance> {
        if id.scenario() == Scenario::Reference && self.reference_overrides.contains_key(&id.base()) {
            return Some(Provenance::Overridden);
        }
        self.fields.get(id).map(|f| f.provenance)
    }

    pub fn contains(&self, id: &FieldId) -> bool {
        self.get_value(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Every stored key, sorted.
    pub fn ids(&self) -> Vec<FieldId> {
        let mut ids: Vec<FieldId> = self.fields.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn override_value(&self, base: &FieldId) -> Option<&FieldValue> {
        self.reference_overrides.get(&base.base())
    }

    pub fn override_count(&self) -> usize {
        self.reference_overrides.len()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write a value. Returns false when nothing changed.
    ///
    /// Non-computed writes mark dependents dirty and notify listeners;
    /// user-modified and imported writes schedule a global snapshot save.
    pub fn set_value(&mut self, id: impl Into<FieldId>, value: FieldValue, provenance: Provenance) -> bool {
        let id = id.into();
        let scenario = id.scenario();

        if self.muted && scenario == Scenario::Target && !provenance.is_computed() {
            log::debug!("muted: dropped {:?} write to {}", provenance, id);
            return false;
        }

        if scenario == Scenario::Reference && provenance.is_user_edit() {
            let base = id.base();
            if self
                .policy
                .is_independently_editable(&base, self.active_standard.as_deref())
            {
                return self.set_override(id, base, value);
            }
        }

        let old = self.fields.get(&id).cloned();
        if let Some(old) = &old {
            if old.value == value && old.provenance == provenance {
                return false;
            }
        }

        self.fields.insert(id.clone(), Field::new(value.clone(), provenance));

        if !provenance.is_computed() {
            self.graph.mark_dependents_dirty(&id);
            self.listeners.notify(&FieldChange {
                field: id,
                new_value: value,
                old_value: old.map(|f| f.value),
                provenance,
                kind: ChangeKind::Write,
            });
        }

        if provenance.is_persistable() && self.persistence.is_some() {
            self.save_debounce.schedule(Instant::now());
        }

        true
    }

    fn set_override(&mut self, key: FieldId, base: FieldId, value: FieldValue) -> bool {
        let old = self
            .reference_overrides
            .get(&base)
            .cloned()
            .or_else(|| self.fields.get(&key).map(|f| f.value.clone()));
        if self.reference_overrides.get(&base) == Some(&value) {
            return false;
        }

        log::debug!("override {} = {}", key, value.raw_display());
        self.reference_overrides.insert(base, value.clone());
        self.graph.mark_dependents_dirty(&key);
        self.listeners.notify(&FieldChange {
            field: key,
            new_value: value,
            old_value: old,
            provenance: Provenance::Overridden,
            kind: ChangeKind::Write,
        });

        if self.persistence.is_some() {
            self.save_debounce.schedule(Instant::now());
        }
        true
    }

    /// Drop an independent Reference edit so the standard's value shows again.
    pub fn clear_override(&mut self, base: &FieldId) -> bool {
        let removed = self.reference_overrides.remove(&base.base()).is_some();
        if removed {
            let key = Scenario::Reference.bridge(base);
            self.graph.mark_dependents_dirty(&key);
            if self.persistence.is_some() {
                self.save_debounce.schedule(Instant::now());
            }
        }
        removed
    }

    // =========================================================================
    // Switches
    // =========================================================================

    /// Suppress (or restore) all listener notification. Writes still land;
    /// lifting quarantine does not recompute anything.
    pub fn set_quarantine(&mut self, active: bool) {
        self.listeners.set_quarantine(active);
    }

    pub fn is_quarantined(&self) -> bool {
        self.listeners.is_quarantined()
    }

    /// Block (or allow) non-computed writes to Target keys.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_display_scenario(&mut self, scenario: Scenario) {
        self.display_scenario = scenario;
    }

    pub fn display_scenario(&self) -> Scenario {
        self.display_scenario
    }

    pub fn active_standard(&self) -> Option<&str> {
        self.active_standard.as_deref()
    }

    // =========================================================================
    // Dependencies and listeners
    // =========================================================================

    /// Register `source -> dependent`. A cycle is logged and still stored.
    pub fn register_dependency(&mut self, source: impl Into<FieldId>, dependent: impl Into<FieldId>) -> Registration {
        let registration = self.graph.register_dependency(source.into(), dependent.into());
        if let Registration::AddedWithCycle(report) = &registration {
            log::warn!("{}", report);
        }
        registration
    }

    pub fn graph(&self) -> &DepGraph {
        &self.graph
    }

    pub fn dirty_fields(&self) -> Vec<FieldId> {
        self.graph.dirty_fields()
    }

    pub fn clear_dirty(&mut self, fields: &[FieldId]) {
        self.graph.clear_dirty(fields);
    }

    pub fn add_listener(&mut self, field: impl Into<FieldId>, callback: Listener) -> ListenerId {
        self.listeners.add_listener(field.into(), callback)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove_listener(id)
    }

    pub fn listener_count(&self, field: &FieldId) -> usize {
        self.listeners.listener_count(field)
    }

    /// One explicit pass over the dirty set.
    ///
    /// Walks the calculation order and notifies each field's listeners exactly
    /// once with `ChangeKind::Recalculate`, then clears the dirty set.
    pub fn recalculate(&mut self) -> RecalcReport {
        let started = Instant::now();
        let (order, had_cycles) = self.graph.calculation_order_checked();
        let mut outcome = NotifyOutcome::default();

        for id in &order {
            let value = self.get_value(id).cloned().unwrap_or_default();
            let provenance = self.provenance(id).unwrap_or(Provenance::Default);
            outcome.merge(self.listeners.notify(&FieldChange {
                field: id.clone(),
                new_value: value.clone(),
                old_value: Some(value),
                provenance,
                kind: ChangeKind::Recalculate,
            }));
        }
        self.graph.clear_dirty(&[]);

        let report = RecalcReport {
            duration_ms: started.elapsed().as_millis() as u64,
            order,
            notifications: outcome.delivered,
            listener_failures: outcome.failed,
            had_cycles,
            ..RecalcReport::default()
        };
        log::debug!("{}", report.log_line());
        report
    }

    // =========================================================================
    // Standards
    // =========================================================================

    /// Load a named standard's values under Reference keys with provenance
    /// `Default`. Ids with an independent override keep the override.
    /// Returns the number of fields written.
    pub fn load_reference_standard(&mut self, standard: &StandardDataset) -> usize {
        self.active_standard = Some(standard.name().to_string());
        let mut written = 0;
        for (id, value) in standard.iter() {
            if self.reference_overrides.contains_key(id) {
                continue;
            }
            if self.set_value(Scenario::Reference.bridge(id), value.clone(), Provenance::Default) {
                written += 1;
            }
        }
        log::info!("loaded standard {} ({} fields)", standard.name(), written);
        written
    }

    // =========================================================================
    // Import / export
    // =========================================================================

    /// Apply a flat id -> text map as imported values under quarantine.
    ///
    /// The prior quarantine state is restored afterwards. Nothing is
    /// recomputed; the caller runs exactly one pass.
    pub fn import(&mut self, entries: &BTreeMap<String, String>) -> ImportReport {
        let was_quarantined = self.is_quarantined();
        self.set_quarantine(true);

        let mut report = ImportReport::default();
        let mut captured = BTreeMap::new();
        for (key, text) in entries {
            let id = FieldId::new(key.trim());
            let value = FieldValue::from_input(text);
            captured.insert(id.clone(), value.clone());
            if self.set_value(id, value, Provenance::Imported) {
                report.applied += 1;
            } else {
                report.unchanged += 1;
            }
        }
        self.last_import = Some(captured);

        self.set_quarantine(was_quarantined);
        log::info!("imported {} fields ({} unchanged)", report.applied, report.unchanged);
        report
    }

    /// Every field under its bridged key, as display text. Overrides win
    /// over the stored Reference value.
    pub fn export(&self) -> BTreeMap<String, String> {
        let mut out: BTreeMap<String, String> = self
            .fields
            .iter()
            .map(|(id, f)| (id.to_string(), f.value.raw_display()))
            .collect();
        for (base, value) in &self.reference_overrides {
            out.insert(Scenario::Reference.bridge(base).to_string(), value.raw_display());
        }
        out
    }

    pub fn has_import(&self) -> bool {
        self.last_import.is_some()
    }

    /// Write the values captured at the last import back, each under its own
    /// key, under quarantine. The caller runs one pass afterwards.
    pub fn revert_to_last_import(&mut self) -> RevertOutcome {
        let Some(captured) = self.last_import.clone() else {
            return RevertOutcome::NoImport;
        };

        let was_quarantined = self.is_quarantined();
        self.set_quarantine(true);
        for (id, value) in &captured {
            self.set_value(id.clone(), value.clone(), Provenance::Imported);
        }
        self.set_quarantine(was_quarantined);

        RevertOutcome::Restored(captured.len())
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Persistable fields plus Reference overrides (as `Overridden`).
    pub fn global_snapshot(&self) -> Snapshot {
        let mut snapshot: Snapshot = self
            .fields
            .iter()
            .filter(|(_, f)| f.provenance.is_persistable())
            .map(|(id, f)| (id.clone(), f.clone()))
            .collect();
        for (base, value) in &self.reference_overrides {
            snapshot.insert(
                Scenario::Reference.bridge(base),
                Field::new(value.clone(), Provenance::Overridden),
            );
        }
        snapshot
    }

    /// Restore the global slot from the attached backend, under quarantine.
    /// Returns the number of fields restored.
    pub fn load_persisted(&mut self) -> usize {
        let Some(adapter) = &self.persistence else {
            return 0;
        };
        let snapshot = adapter.load(&SlotKey::Global);

        for (id, field) in &snapshot {
            if field.provenance == Provenance::Overridden && id.scenario() == Scenario::Reference {
                self.reference_overrides.insert(id.base(), field.value.clone());
            } else {
                self.fields.insert(id.clone(), field.clone());
            }
            self.graph.mark_dependents_dirty(id);
        }

        if !snapshot.is_empty() {
            log::info!("restored {} fields from {}", snapshot.len(), SlotKey::Global);
        }
        snapshot.len()
    }

    /// Save the global slot if its debounce window has elapsed.
    pub fn poll(&mut self, now: Instant) -> bool {
        if self.save_debounce.take_due(now) {
            self.save_now()
        } else {
            false
        }
    }

    /// Save the global slot now if a save is pending.
    pub fn flush(&mut self) -> bool {
        if self.save_debounce.take_pending() {
            self.save_now()
        } else {
            false
        }
    }

    pub fn has_pending_save(&self) -> bool {
        self.save_debounce.is_pending()
    }

    fn save_now(&self) -> bool {
        match &self.persistence {
            Some(adapter) => adapter.save(&SlotKey::Global, &self.global_snapshot()),
            None => false,
        }
    }

    /// Clear every value, override, dirty mark, the import capture and all
    /// persisted slots. Dependency edges and listeners stay registered.
    pub fn reset(&mut self) {
        self.fields.clear();
        self.reference_overrides.clear();
        self.graph.clear_dirty(&[]);
        self.last_import = None;
        self.active_standard = None;
        self.save_debounce.cancel();
        if let Some(adapter) = &self.persistence {
            adapter.clear();
        }
        log::info!("store reset");
    }
}

impl fmt::Debug for FieldStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldStore")
            .field("fields", &self.fields.len())
            .field("overrides", &self.reference_overrides.len())
            .field("graph", &self.graph)
            .field("listeners", &self.listeners)
            .field("muted", &self.muted)
            .field("display_scenario", &self.display_scenario)
            .field("active_standard", &self.active_standard)
            .finish_non_exhaustive()
    }
}
