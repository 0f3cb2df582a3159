//! Dual-scenario module state.
//!
//! A functional module (envelope, ventilation, ...) is one `ModeFacade`:
//! its `FieldCatalog`, a `Calculator`, and two isolated `ScenarioState`s.
//! The facade routes edits to the active scenario and bridges them into the
//! shared store under the scenario-correct key:
//!
//! ```text
//! Target mode     set d_85   -> target state, store "d_85"
//! Reference mode  set d_85   -> reference state, store "ref_d_85"
//! ```
//!
//! Recompute always runs the calculator for both scenarios, whatever mode
//! is on display.

use std::rc::Rc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::catalog::{FieldCatalog, StandardDataset};
use crate::field_id::{FieldId, Scenario};
use crate::persist::{Debouncer, PersistenceAdapter};
use crate::scenario::ScenarioState;
use crate::store::FieldStore;
use crate::value::{FieldValue, Provenance};

/// Default window collapsing bursts of recompute requests.
pub const DEFAULT_RECOMPUTE_DEBOUNCE: Duration = Duration::from_millis(50);

/// Which scenario a module displays and edits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Target,
    Reference,
}

impl Mode {
    pub fn scenario(self) -> Scenario {
        match self {
            Mode::Target => Scenario::Target,
            Mode::Reference => Scenario::Reference,
        }
    }

    /// The mode that edits `scenario`. Actual values have no module state.
    pub fn for_scenario(scenario: Scenario) -> Option<Mode> {
        match scenario {
            Scenario::Target => Some(Mode::Target),
            Scenario::Reference => Some(Mode::Reference),
            Scenario::Actual => None,
        }
    }
}

/// A module's calculation, run once per scenario.
pub trait Calculator {
    /// Edges `(source, dependent)` between base ids. Registered once per
    /// scenario, so Target and Reference get separate edges.
    fn dependencies(&self) -> Vec<(FieldId, FieldId)> {
        Vec::new()
    }

    /// Compute every calculated field for `ctx.scenario()`.
    fn calculate(&self, ctx: &mut CalcContext<'_>);
}

/// View a calculator gets of one scenario.
///
/// Reads come from the shared store under this scenario's keys, then from
/// the module's own state. Nothing here can read the other scenario.
pub struct CalcContext<'a> {
    scenario: Scenario,
    state: &'a mut ScenarioState,
    store: &'a mut FieldStore,
    writes: usize,
}

impl<'a> CalcContext<'a> {
    pub fn new(state: &'a mut ScenarioState, store: &'a mut FieldStore) -> Self {
        Self {
            scenario: state.scenario(),
            state,
            store,
            writes: 0,
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    pub fn value(&self, id: &str) -> Option<&FieldValue> {
        let id = FieldId::new(id);
        self.store
            .get_value_for_scenario(&id, self.scenario)
            .or_else(|| self.state.get_value(&id))
    }

    /// Numeric input; missing values read as zero.
    pub fn number(&self, id: &str) -> f64 {
        self.number_or(id, 0.0)
    }

    pub fn number_or(&self, id: &str, default: f64) -> f64 {
        match self.value(id).and_then(FieldValue::as_number) {
            Some(n) => n,
            None => {
                log::debug!("{}: {} missing, using {}", self.scenario, id, default);
                default
            }
        }
    }

    /// Write a calculated value to this scenario's state and the store.
    pub fn set_calculated(&mut self, id: &str, value: impl Into<FieldValue>) {
        self.write(id, value.into(), Provenance::Calculated);
    }

    /// Write a by-product of another calculation.
    pub fn set_derived(&mut self, id: &str, value: impl Into<FieldValue>) {
        self.write(id, value.into(), Provenance::Derived);
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    fn write(&mut self, id: &str, value: FieldValue, provenance: Provenance) {
        let id = FieldId::new(id);
        self.state.set_value(&id, value.clone(), provenance);
        if self.store.set_value(self.scenario.bridge(&id), value, provenance) {
            self.writes += 1;
        }
    }
}

/// Collapses bursts of recompute requests into one run.
#[derive(Debug, Clone)]
pub struct RecomputeGuard {
    debounce: Debouncer,
    requests: usize,
}

impl RecomputeGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            debounce: Debouncer::new(window),
            requests: 0,
        }
    }

    pub fn request(&mut self, now: Instant) {
        self.requests += 1;
        self.debounce.schedule(now);
    }

    pub fn is_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    /// If due, consume and return how many requests were collapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<usize> {
        if self.debounce.take_due(now) {
            Some(std::mem::take(&mut self.requests))
        } else {
            None
        }
    }

    pub fn cancel(&mut self) {
        self.debounce.cancel();
        self.requests = 0;
    }
}

/// One functional module: catalog, calculator and both scenario states.
pub struct ModeFacade {
    catalog: Rc<FieldCatalog>,
    calculator: Box<dyn Calculator>,
    target: ScenarioState,
    reference: ScenarioState,
    mode: Mode,
    guard: RecomputeGuard,
    display: FxHashMap<FieldId, FieldValue>,
}

impl ModeFacade {
    pub fn new(catalog: FieldCatalog, calculator: impl Calculator + 'static) -> Self {
        let catalog = Rc::new(catalog);
        Self {
            target: ScenarioState::new(Rc::clone(&catalog), Scenario::Target),
            reference: ScenarioState::new(Rc::clone(&catalog), Scenario::Reference),
            catalog,
            calculator: Box::new(calculator),
            mode: Mode::Target,
            guard: RecomputeGuard::new(DEFAULT_RECOMPUTE_DEBOUNCE),
            display: FxHashMap::default(),
        }
    }

    pub fn module(&self) -> &str {
        self.catalog.module()
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    /// Persist both scenario states through `adapter`.
    pub fn attach_persistence(&mut self, adapter: PersistenceAdapter, debounce: Duration) {
        self.target.attach_persistence(adapter.clone(), debounce);
        self.reference.attach_persistence(adapter, debounce);
    }

    pub fn set_recompute_debounce(&mut self, window: Duration) {
        self.guard = RecomputeGuard::new(window);
    }

    /// Seed both states, restore persisted slots, register the calculator's
    /// dependencies for both scenarios and publish values the store lacks.
    pub fn initialize(&mut self, store: &mut FieldStore, standard: Option<&StandardDataset>) {
        self.target.set_defaults(None);
        self.reference.set_defaults(standard);
        let restored = self.target.load() + self.reference.load();
        if restored > 0 {
            log::info!("{}: restored {} persisted values", self.module(), restored);
        }

        for (source, dependent) in self.calculator.dependencies() {
            for scenario in [Scenario::Target, Scenario::Reference] {
                store.register_dependency(scenario.bridge(&source), scenario.bridge(&dependent));
            }
        }

        for state in [&self.target, &self.reference] {
            for (id, field) in state.iter() {
                let key = state.scenario().bridge(id);
                if !store.contains(&key) {
                    store.set_value(key, field.value.clone(), field.provenance);
                }
            }
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Change the displayed scenario. Never recomputes.
    pub fn switch_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn state(&self, mode: Mode) -> &ScenarioState {
        match mode {
            Mode::Target => &self.target,
            Mode::Reference => &self.reference,
        }
    }

    fn state_mut(&mut self, mode: Mode) -> &mut ScenarioState {
        match mode {
            Mode::Target => &mut self.target,
            Mode::Reference => &mut self.reference,
        }
    }

    /// Value in the active scenario's state.
    pub fn get_value(&self, id: &FieldId) -> Option<&FieldValue> {
        self.state(self.mode).get_value(id)
    }

    /// Write to the active scenario and bridge into the store.
    pub fn set_value(&mut self, store: &mut FieldStore, id: &FieldId, value: FieldValue, source: Provenance) -> bool {
        self.set_value_in(store, self.mode.scenario(), id, value, source)
    }

    /// Write to an explicit scenario and bridge into the store.
    ///
    /// Only Target and Reference have module state; an Actual write is
    /// refused and leaves both the state and the store untouched.
    pub fn set_value_in(
        &mut self,
        store: &mut FieldStore,
        scenario: Scenario,
        id: &FieldId,
        value: FieldValue,
        source: Provenance,
    ) -> bool {
        let Some(mode) = Mode::for_scenario(scenario) else {
            log::warn!("{}: refusing {} write to {}; actual values are import-only", self.module(), scenario, id);
            return false;
        };
        let state_changed = self.state_mut(mode).set_value(id, value.clone(), source);
        let store_changed = store.set_value(scenario.bridge(id), value, source);
        state_changed || store_changed
    }

    /// Refresh the calculated values shown for the current mode.
    ///
    /// A value the store lacks shows the neutral default. It never falls back
    /// to the other scenario.
    pub fn update_calculated_display_values(&mut self, store: &FieldStore) -> usize {
        let scenario = self.mode.scenario();
        self.display.clear();
        for def in self.catalog.defs() {
            if def.kind != crate::catalog::FieldKind::Calculated {
                continue;
            }
            let value = store
                .get_value_for_scenario(&def.id, scenario)
                .cloned()
                .unwrap_or_else(|| def.default.clone());
            self.display.insert(def.id.clone(), value);
        }
        self.display.len()
    }

    /// Calculated value last prepared for display.
    pub fn display_value(&self, id: &FieldId) -> Option<&FieldValue> {
        self.display.get(&id.base())
    }

    /// Run the calculator for both scenarios. Returns the number of store
    /// values that changed.
    pub fn recompute(&mut self, store: &mut FieldStore) -> usize {
        let mut writes = 0;
        for state in [&mut self.target, &mut self.reference] {
            let mut ctx = CalcContext::new(state, store);
            self.calculator.calculate(&mut ctx);
            writes += ctx.writes();
        }
        self.guard.cancel();
        self.update_calculated_display_values(store);
        log::debug!("{}: recomputed, {} writes", self.module(), writes);
        writes
    }

    /// Ask for a recompute; bursts within the debounce window collapse.
    pub fn request_recompute(&mut self, now: Instant) {
        self.guard.request(now);
    }

    pub fn recompute_pending(&self) -> bool {
        self.guard.is_pending()
    }

    /// Consume a recompute request whose window has elapsed.
    pub fn take_recompute_due(&mut self, now: Instant) -> bool {
        match self.guard.take_due(now) {
            Some(collapsed) => {
                if collapsed > 1 {
                    log::debug!("{}: {} recompute requests collapsed", self.module(), collapsed);
                }
                true
            }
            None => false,
        }
    }

    /// Recompute if a request's window has elapsed. Returns the write count.
    pub fn recompute_if_due(&mut self, store: &mut FieldStore, now: Instant) -> Option<usize> {
        if self.take_recompute_due(now) {
            Some(self.recompute(store))
        } else {
            None
        }
    }

    /// Pull every owned field from the store into both states.
    pub fn sync_from_global_state(&mut self, store: &FieldStore) -> usize {
        let ids: Vec<FieldId> = self.catalog.ids().cloned().collect();
        self.target.sync_from_global_state(store, &ids) + self.reference.sync_from_global_state(store, &ids)
    }

    /// Reapply catalog defaults to both states and publish them to the store.
    pub fn refresh_defaults(&mut self, store: &mut FieldStore, standard: Option<&StandardDataset>) {
        self.target.set_defaults(None);
        Self::publish_defaults(&self.target, store);
        self.apply_standard(store, standard);
    }

    /// Reseed only the Reference state from `standard` and publish it.
    /// Target values are left alone.
    pub fn apply_standard(&mut self, store: &mut FieldStore, standard: Option<&StandardDataset>) {
        self.reference.set_defaults(standard);
        Self::publish_defaults(&self.reference, store);
    }

    fn publish_defaults(state: &ScenarioState, store: &mut FieldStore) {
        for (id, field) in state.iter() {
            store.set_value(state.scenario().bridge(id), field.value.clone(), Provenance::Default);
        }
    }

    /// Drop pending saves and recompute requests.
    pub fn cancel_pending(&mut self) {
        self.target.cancel_pending_save();
        self.reference.cancel_pending_save();
        self.guard.cancel();
    }

    /// Save any state slot whose window has elapsed. Returns saves made.
    pub fn poll(&mut self, now: Instant) -> usize {
        usize::from(self.target.poll(now)) + usize::from(self.reference.poll(now))
    }

    pub fn flush(&mut self) -> usize {
        usize::from(self.target.flush()) + usize::from(self.reference.flush())
    }
}

impl std::fmt::Debug for ModeFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeFacade")
            .field("module", &self.module())
            .field("mode", &self.mode)
            .field("target", &self.target.len())
            .field("reference", &self.reference.len())
            .finish_non_exhaustive()
    }
}
