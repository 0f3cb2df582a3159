//! Per-module, per-scenario value state.
//!
//! Each module owns two `ScenarioState`s (Target and Reference). A state is
//! private to its module: other modules only ever see its values after a
//! `ModeFacade` write bridges them into the shared store.

use std::rc::Rc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::catalog::{FieldCatalog, StandardDataset};
use crate::field_id::{FieldId, Scenario};
use crate::persist::{Debouncer, PersistenceAdapter, SlotKey, Snapshot};
use crate::store::FieldStore;
use crate::value::{Field, FieldValue, Provenance};

#[derive(Debug)]
pub struct ScenarioState {
    catalog: Rc<FieldCatalog>,
    scenario: Scenario,
    values: FxHashMap<FieldId, Field>,
    persistence: Option<PersistenceAdapter>,
    save_debounce: Debouncer,
}

impl ScenarioState {
    pub fn new(catalog: Rc<FieldCatalog>, scenario: Scenario) -> Self {
        Self {
            catalog,
            scenario,
            values: FxHashMap::default(),
            persistence: None,
            save_debounce: Debouncer::new(Duration::ZERO),
        }
    }

    /// Persist this state's slot through `adapter`. A zero window saves on
    /// every user edit.
    pub fn attach_persistence(&mut self, adapter: PersistenceAdapter, debounce: Duration) {
        self.persistence = Some(adapter);
        self.save_debounce = Debouncer::new(debounce);
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn slot(&self) -> SlotKey {
        SlotKey::module(self.catalog.module(), self.scenario)
    }

    /// Replace every value with the catalog defaults for this scenario.
    ///
    /// `standard` only matters for the Reference state.
    pub fn set_defaults(&mut self, standard: Option<&StandardDataset>) {
        self.values.clear();
        for (id, value) in self.catalog.defaults_for(self.scenario, standard) {
            self.values.insert(id, Field::new(value, Provenance::Default));
        }
    }

    pub fn get_value(&self, id: &FieldId) -> Option<&FieldValue> {
        self.values.get(&id.base()).map(|f| &f.value)
    }

    pub fn field(&self, id: &FieldId) -> Option<&Field> {
        self.values.get(&id.base())
    }

    /// Write a value. Only direct user edits are persisted.
    pub fn set_value(&mut self, id: &FieldId, value: FieldValue, source: Provenance) -> bool {
        let id = id.base();
        if !self.catalog.contains(&id) {
            log::debug!("{}: {} is not owned by this module", self.slot(), id);
        }
        if let Some(existing) = self.values.get(&id) {
            if existing.value == value && existing.provenance == source {
                return false;
            }
        }
        self.values.insert(id, Field::new(value, source));

        if source.is_user_edit() && self.persistence.is_some() {
            if self.save_debounce.window().is_zero() {
                self.save_now();
            } else {
                self.save_debounce.schedule(Instant::now());
            }
        }
        true
    }

    /// Pull the store's values for `ids` into this state (one direction only).
    ///
    /// Used after a bulk import or a revert. Ids the store has no value for
    /// keep their current state value. Returns the number of values changed.
    pub fn sync_from_global_state<'a, I>(&mut self, store: &FieldStore, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a FieldId>,
    {
        let mut changed = 0;
        for id in ids {
            let key = self.scenario.bridge(id);
            let Some(value) = store.get_value(&key) else {
                continue;
            };
            let provenance = store.provenance(&key).unwrap_or(Provenance::Imported);
            let field = Field::new(value.clone(), provenance);
            if self.values.get(&id.base()) != Some(&field) {
                self.values.insert(id.base(), field);
                changed += 1;
            }
        }
        changed
    }

    /// Restore this state's slot. Unknown ids are ignored; a missing or
    /// unreadable slot restores nothing. Returns the number of values restored.
    pub fn load(&mut self) -> usize {
        let Some(adapter) = &self.persistence else {
            return 0;
        };
        let snapshot = adapter.load(&self.slot());
        let mut restored = 0;
        for (id, field) in snapshot {
            if self.catalog.contains(&id) {
                self.values.insert(id.base(), field);
                restored += 1;
            }
        }
        restored
    }

    /// Every value this state holds.
    pub fn snapshot(&self) -> Snapshot {
        self.values
            .iter()
            .map(|(id, f)| (id.clone(), f.clone()))
            .collect()
    }

    /// Values sorted by id.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldId, &Field)> {
        let mut entries: Vec<_> = self.values.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        self.save_debounce.take_due(now) && self.save_now()
    }

    pub fn flush(&mut self) -> bool {
        self.save_debounce.take_pending() && self.save_now()
    }

    pub fn cancel_pending_save(&mut self) {
        self.save_debounce.cancel();
    }

    fn save_now(&self) -> bool {
        match &self.persistence {
            Some(adapter) => adapter.save(&self.slot(), &self.snapshot()),
            None => false,
        }
    }
}
