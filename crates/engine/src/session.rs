//! Session orchestration.
//!
//! A `Session` owns the shared `FieldStore` and every registered module. It
//! is the only place that decides when a full pass runs:
//!
//! - `run_pass` recomputes every module (both scenarios) in dependency
//!   order, then notifies each dirty field once and clears the dirty set.
//!   A module runs after every module whose calculated fields it reads;
//!   modules on a cycle fall back to registration order.
//! - `import` / `revert_to_last_import` / `reset` / `select_standard` each
//!   end in exactly one pass.
//! - `poll` turns user edits seen by the listener bus into debounced
//!   per-module recomputes, cascades them to downstream modules, and
//!   flushes due snapshot writes.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

use crate::catalog::StandardDataset;
use crate::events::{ChangeKind, ListenerId};
use crate::field_id::{FieldId, Scenario};
use crate::graph_export::{GraphExport, GraphScope, GroupRule};
use crate::module::{Mode, ModeFacade, DEFAULT_RECOMPUTE_DEBOUNCE};
use crate::persist::PersistenceAdapter;
use crate::recalc::RecalcReport;
use crate::store::{FieldStore, ImportReport, RevertOutcome, DEFAULT_PERSIST_DEBOUNCE};
use crate::value::{FieldValue, Provenance};

/// Debounce windows used by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Global snapshot writes.
    pub persist: Duration,
    /// Per-module recompute requests.
    pub recompute: Duration,
    /// Per-module scenario snapshot writes. Zero saves immediately.
    pub scenario: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            persist: DEFAULT_PERSIST_DEBOUNCE,
            recompute: DEFAULT_RECOMPUTE_DEBOUNCE,
            scenario: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    DuplicateModule(String),
    UnknownModule(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateModule(name) => write!(f, "module '{}' is already registered", name),
            Self::UnknownModule(name) => write!(f, "no module named '{}'", name),
        }
    }
}

impl std::error::Error for SessionError {}

/// What one `poll` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub modules_recomputed: usize,
    pub saves: usize,
}

pub struct Session {
    store: FieldStore,
    modules: Vec<ModeFacade>,
    index: FxHashMap<String, usize>,
    timings: Timings,
    persistence: Option<PersistenceAdapter>,
    standard: Option<StandardDataset>,
    /// Modules whose inputs were edited since the last poll.
    requested: Rc<RefCell<BTreeSet<String>>>,
    watchers: Vec<ListenerId>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(FieldStore::new())
    }
}

impl Session {
    pub fn new(store: FieldStore) -> Self {
        Self {
            store,
            modules: Vec::new(),
            index: FxHashMap::default(),
            timings: Timings::default(),
            persistence: None,
            standard: None,
            requested: Rc::new(RefCell::new(BTreeSet::new())),
            watchers: Vec::new(),
        }
    }

    /// Session persisting the store and every module through `adapter`.
    pub fn with_persistence(mut store: FieldStore, adapter: PersistenceAdapter, timings: Timings) -> Self {
        store.attach_persistence(adapter.clone(), timings.persist);
        let mut session = Self::new(store);
        session.timings = timings;
        session.persistence = Some(adapter);
        session
    }

    pub fn store(&self) -> &FieldStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut FieldStore {
        &mut self.store
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    pub fn standard(&self) -> Option<&StandardDataset> {
        self.standard.as_ref()
    }

    /// Seed the store with a reference standard before any module is
    /// registered, so module Reference defaults start from it. Once modules
    /// exist this is `select_standard`.
    pub fn preload_standard(&mut self, standard: StandardDataset) {
        if !self.modules.is_empty() {
            self.select_standard(standard);
            return;
        }
        self.store.load_reference_standard(&standard);
        self.standard = Some(standard);
    }

    // =========================================================================
    // Modules
    // =========================================================================

    /// Register and initialize a module.
    ///
    /// Its dependencies are registered for both scenarios, and every source
    /// field is watched so that an edit requests a recompute of the module.
    pub fn register_module(&mut self, mut module: ModeFacade) -> Result<(), SessionError> {
        let name = module.module().to_string();
        if self.index.contains_key(&name) {
            return Err(SessionError::DuplicateModule(name));
        }

        module.set_recompute_debounce(self.timings.recompute);
        if let Some(adapter) = &self.persistence {
            module.attach_persistence(adapter.clone(), self.timings.scenario);
        }
        let before: BTreeSet<(FieldId, FieldId)> = self.store.graph().edges().into_iter().collect();
        module.initialize(&mut self.store, self.standard.as_ref());

        let sources: BTreeSet<FieldId> = self
            .store
            .graph()
            .edges()
            .into_iter()
            .filter(|edge| !before.contains(edge))
            .map(|(source, _)| source)
            .collect();
        for source in sources {
            let requested = Rc::clone(&self.requested);
            let target = name.clone();
            let id = self.store.add_listener(
                source,
                Box::new(move |change| {
                    if change.kind == ChangeKind::Write {
                        requested.borrow_mut().insert(target.clone());
                    }
                    Ok(())
                }),
            );
            self.watchers.push(id);
        }

        log::info!("registered module {}", name);
        self.index.insert(name, self.modules.len());
        self.modules.push(module);
        Ok(())
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.module()).collect()
    }

    pub fn module(&self, name: &str) -> Option<&ModeFacade> {
        self.index.get(name).map(|&i| &self.modules[i])
    }

    pub fn module_mut(&mut self, name: &str) -> Option<&mut ModeFacade> {
        self.index.get(name).map(|&i| &mut self.modules[i])
    }

    /// A module together with the store, for facade calls that need both.
    pub fn module_and_store_mut(&mut self, name: &str) -> Option<(&mut ModeFacade, &mut FieldStore)> {
        let i = *self.index.get(name)?;
        Some((&mut self.modules[i], &mut self.store))
    }

    /// User edit through a module's facade in its active mode.
    pub fn edit(&mut self, module: &str, id: &FieldId, value: FieldValue) -> Result<bool, SessionError> {
        let (facade, store) = self
            .module_and_store_mut(module)
            .ok_or_else(|| SessionError::UnknownModule(module.to_string()))?;
        Ok(facade.set_value(store, id, value, Provenance::UserModified))
    }

    /// Switch one module's displayed scenario. Other modules keep theirs.
    pub fn switch_module_mode(&mut self, name: &str, mode: Mode) -> Result<(), SessionError> {
        let (module, store) = self
            .module_and_store_mut(name)
            .ok_or_else(|| SessionError::UnknownModule(name.to_string()))?;
        module.switch_mode(mode);
        module.update_calculated_display_values(store);
        Ok(())
    }

    /// Convenience for front ends with a single toggle: switch every module
    /// and the store's display scenario.
    pub fn switch_mode(&mut self, mode: Mode) {
        for module in &mut self.modules {
            module.switch_mode(mode);
            module.update_calculated_display_values(&self.store);
        }
        self.store.set_display_scenario(mode.scenario());
    }

    /// For each module, the other modules owning a calculated field that one
    /// of its calculated fields is derived from.
    fn module_links(&self) -> Vec<BTreeSet<usize>> {
        let mut owner: FxHashMap<&FieldId, usize> = FxHashMap::default();
        for (i, module) in self.modules.iter().enumerate() {
            for id in module.catalog().calculated_ids() {
                owner.insert(id, i);
            }
        }

        let graph = self.store.graph();
        self.modules
            .iter()
            .enumerate()
            .map(|(i, module)| {
                module
                    .catalog()
                    .calculated_ids()
                    .flat_map(|id| graph.precedents(id))
                    .filter_map(|source| owner.get(source).copied())
                    .filter(|&j| j != i)
                    .collect()
            })
            .collect()
    }

    /// Module indices with upstream modules first. Ties and cycles keep
    /// registration order.
    fn module_order(links: &[BTreeSet<usize>]) -> Vec<usize> {
        let n = links.len();
        let mut placed = vec![false; n];
        let mut order = Vec::with_capacity(n);
        while order.len() < n {
            let ready = (0..n).find(|&i| !placed[i] && links[i].iter().all(|&j| placed[j]));
            let next = match ready {
                Some(i) => i,
                None => match (0..n).find(|&i| !placed[i]) {
                    Some(i) => {
                        log::warn!("module {} is on a dependency cycle; ordering is best-effort", i);
                        i
                    }
                    None => break,
                },
            };
            placed[next] = true;
            order.push(next);
        }
        order
    }

    // =========================================================================
    // Passes
    // =========================================================================

    /// One full pass: every module, both scenarios, dependency order.
    pub fn run_pass(&mut self) -> RecalcReport {
        let started = Instant::now();
        let order = Self::module_order(&self.module_links());
        let mut values_written = 0;
        for i in order {
            values_written += self.modules[i].recompute(&mut self.store);
        }

        let mut report = self.store.recalculate();
        report.modules_recomputed = self.modules.len();
        report.values_written = values_written;
        report.duration_ms = started.elapsed().as_millis() as u64;
        self.requested.borrow_mut().clear();

        log::info!("{}", report.log_line());
        report
    }

    /// Apply a flat id -> text map, sync modules, then run exactly one pass.
    pub fn import(&mut self, entries: &BTreeMap<String, String>) -> (ImportReport, RecalcReport) {
        let imported = self.store.import(entries);
        self.sync_modules();
        (imported, self.run_pass())
    }

    pub fn export(&self) -> BTreeMap<String, String> {
        self.store.export()
    }

    /// Restore the last import, or refresh every module to its defaults if
    /// there was none, then run one pass.
    pub fn revert_to_last_import(&mut self) -> (RevertOutcome, RecalcReport) {
        let outcome = self.store.revert_to_last_import();
        match outcome {
            RevertOutcome::Restored(n) => {
                log::info!("reverted {} fields to last import", n);
                self.sync_modules();
            }
            RevertOutcome::NoImport => {
                log::info!("no import to revert to, refreshing defaults");
                self.refresh_defaults();
            }
        }
        (outcome, self.run_pass())
    }

    /// Load a reference standard into the store and every module's
    /// Reference state, then run one pass.
    pub fn select_standard(&mut self, standard: StandardDataset) -> RecalcReport {
        self.store.load_reference_standard(&standard);
        for module in &mut self.modules {
            module.apply_standard(&mut self.store, Some(&standard));
            module.sync_from_global_state(&self.store);
        }
        self.standard = Some(standard);
        self.run_pass()
    }

    /// Clear all values and persisted state; modules return to defaults.
    pub fn reset(&mut self) -> RecalcReport {
        self.store.reset();
        self.standard = None;
        self.requested.borrow_mut().clear();
        for module in &mut self.modules {
            module.cancel_pending();
            module.refresh_defaults(&mut self.store, None);
        }
        self.run_pass()
    }

    /// Restore the store's global slot over the module defaults, then one pass.
    pub fn restore(&mut self) -> RecalcReport {
        let restored = self.store.load_persisted();
        if restored > 0 {
            self.sync_modules();
        }
        self.run_pass()
    }

    fn sync_modules(&mut self) {
        for module in &mut self.modules {
            module.sync_from_global_state(&self.store);
        }
    }

    fn refresh_defaults(&mut self) {
        for module in &mut self.modules {
            module.refresh_defaults(&mut self.store, self.standard.as_ref());
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Advance debounced work to `now`: recompute modules whose inputs were
    /// edited and whose window elapsed, then every module downstream of one
    /// that changed a value, then write due snapshots.
    pub fn poll(&mut self, now: Instant) -> PollOutcome {
        let requested: Vec<String> = std::mem::take(&mut *self.requested.borrow_mut()).into_iter().collect();
        for name in requested {
            if let Some(module) = self.module_mut(&name) {
                module.request_recompute(now);
            }
        }

        let links = self.module_links();
        let mut outcome = PollOutcome::default();
        let mut changed: BTreeSet<usize> = BTreeSet::new();
        for i in Self::module_order(&links) {
            let due = self.modules[i].take_recompute_due(now);
            if !due && links[i].is_disjoint(&changed) {
                continue;
            }
            if self.modules[i].recompute(&mut self.store) > 0 {
                changed.insert(i);
            }
            outcome.modules_recomputed += 1;
        }
        if outcome.modules_recomputed > 0 {
            self.store.recalculate();
        }

        outcome.saves += usize::from(self.store.poll(now));
        for module in &mut self.modules {
            outcome.saves += module.poll(now);
        }
        outcome
    }

    /// Write every pending snapshot now.
    pub fn flush(&mut self) -> usize {
        let mut saves = usize::from(self.store.flush());
        for module in &mut self.modules {
            saves += module.flush();
        }
        saves
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn export_graph(&self, scope: GraphScope, rules: &[GroupRule]) -> GraphExport {
        GraphExport::build(&self.store, scope, rules)
    }

    /// Value of `id` in `scenario`, as shown by the display layer.
    pub fn value(&self, id: &FieldId, scenario: Scenario) -> Option<&FieldValue> {
        self.store.get_value_for_scenario(id, scenario)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store)
            .field("modules", &self.modules)
            .field("watchers", &self.watchers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldCatalog;
    use crate::format::FormatTag;
    use crate::harness::SessionHarness;
    use crate::module::{CalcContext, Calculator};
    use crate::sample::{sample_modules, COST_MODULE, ENERGY_MODULE};

    fn id(s: &str) -> FieldId {
        FieldId::new(s)
    }

    #[test]
    fn test_duplicate_module_rejected() {
        let mut session = Session::default();
        for module in sample_modules() {
            session.register_module(module).unwrap();
        }
        let err = session.register_module(sample_modules().remove(0)).unwrap_err();
        assert_eq!(err, SessionError::DuplicateModule(ENERGY_MODULE.to_string()));
        assert_eq!(session.module_names(), vec![ENERGY_MODULE, COST_MODULE]);
    }

    #[test]
    fn test_preloaded_standard_seeds_reference_defaults() {
        let mut session = Session::default();
        session.preload_standard(StandardDataset::new("SB10").with("area", 200.0).with("rate", 0.2));
        for module in sample_modules() {
            session.register_module(module).unwrap();
        }
        session.run_pass();

        assert_eq!(session.store().active_standard(), Some("SB10"));
        assert_eq!(session.value(&id("intensity"), Scenario::Reference), Some(&FieldValue::number(5.0)));
        assert_eq!(session.value(&id("intensity"), Scenario::Target), Some(&FieldValue::number(10.0)));
        assert_eq!(session.value(&id("annual_cost"), Scenario::Reference), Some(&FieldValue::number(200.0)));
    }

    #[test]
    fn test_run_pass_computes_both_scenarios() {
        let mut h = SessionHarness::sample();
        let report = h.session.run_pass();
        assert_eq!(report.modules_recomputed, 2);
        assert_eq!(h.number("intensity"), 10.0);
        assert_eq!(h.number("ref_intensity"), 10.0);
        assert_eq!(h.number("annual_cost"), 120.0);
        assert_eq!(h.number("ref_annual_cost"), 100.0);
        assert!(h.session.store().dirty_fields().is_empty());
    }

    #[test]
    fn test_edit_triggers_debounced_recompute() {
        let mut h = SessionHarness::sample();
        h.session.run_pass();
        let start = Instant::now();

        h.session.edit(ENERGY_MODULE, &id("energy_in"), FieldValue::number(2000.0)).unwrap();
        let first = h.session.poll(start);
        assert_eq!(first.modules_recomputed, 0);
        assert_eq!(h.number("annual_cost"), 120.0);

        let later = h.session.poll(start + Duration::from_millis(100));
        assert_eq!(later.modules_recomputed, 2);
        assert_eq!(h.number("intensity"), 20.0);
        assert_eq!(h.number("annual_cost"), 240.0);
        assert_eq!(h.number("ref_annual_cost"), 100.0);
    }

    #[test]
    fn test_unknown_module_edit() {
        let mut h = SessionHarness::sample();
        let err = h.session.edit("nope", &id("x"), FieldValue::number(1.0)).unwrap_err();
        assert_eq!(err.to_string(), "no module named 'nope'");
    }

    #[test]
    fn test_select_standard_only_touches_reference() {
        let mut h = SessionHarness::sample();
        h.session.run_pass();
        h.session.select_standard(StandardDataset::new("SB10").with("area", 50.0));

        assert_eq!(h.number("intensity"), 10.0);
        assert_eq!(h.number("ref_intensity"), 20.0);
        assert_eq!(h.session.store().active_standard(), Some("SB10"));
    }

    #[test]
    fn test_reset_returns_to_defaults() {
        let mut h = SessionHarness::sample();
        h.session.edit(ENERGY_MODULE, &id("area"), FieldValue::number(10.0)).unwrap();
        h.session.run_pass();
        assert_eq!(h.number("intensity"), 100.0);

        h.session.reset();
        assert_eq!(h.number("area"), 100.0);
        assert_eq!(h.number("intensity"), 10.0);
    }

    const UP: &str = "up";
    const DOWN: &str = "down";

    /// `y = x * 2`
    struct Doubler;

    impl Calculator for Doubler {
        fn dependencies(&self) -> Vec<(FieldId, FieldId)> {
            vec![(id("x"), id("y"))]
        }

        fn calculate(&self, ctx: &mut CalcContext<'_>) {
            let y = ctx.number("x") * 2.0;
            ctx.set_calculated("y", y);
        }
    }

    /// `z = y + 1`, reading `y` from the `up` module.
    struct PlusOne;

    impl Calculator for PlusOne {
        fn dependencies(&self) -> Vec<(FieldId, FieldId)> {
            vec![(id("y"), id("z"))]
        }

        fn calculate(&self, ctx: &mut CalcContext<'_>) {
            let z = ctx.number("y") + 1.0;
            ctx.set_calculated("z", z);
        }
    }

    /// `down` registered before the `up` module it reads from.
    fn chained_session() -> Session {
        let mut session = Session::default();
        let down = ModeFacade::new(FieldCatalog::new(DOWN).calculated("z", FormatTag::Raw), PlusOne);
        let up = ModeFacade::new(
            FieldCatalog::new(UP).input("x", 1.0).calculated("y", FormatTag::Raw),
            Doubler,
        );
        session.register_module(down).unwrap();
        session.register_module(up).unwrap();
        session
    }

    #[test]
    fn test_run_pass_follows_dependencies_not_registration() {
        let mut session = chained_session();
        session.run_pass();
        assert_eq!(session.value(&id("z"), Scenario::Target), Some(&FieldValue::number(3.0)));

        session.edit(UP, &id("x"), FieldValue::number(5.0)).unwrap();
        session.run_pass();

        assert_eq!(session.value(&id("y"), Scenario::Target), Some(&FieldValue::number(10.0)));
        assert_eq!(session.value(&id("z"), Scenario::Target), Some(&FieldValue::number(11.0)));
        assert_eq!(session.value(&id("z"), Scenario::Reference), Some(&FieldValue::number(3.0)));
        assert!(session.store().dirty_fields().is_empty());
    }

    #[test]
    fn test_poll_cascades_to_downstream_module() {
        let mut session = chained_session();
        session.run_pass();
        let start = Instant::now();

        session.edit(UP, &id("x"), FieldValue::number(4.0)).unwrap();
        assert_eq!(session.poll(start).modules_recomputed, 0);
        let outcome = session.poll(start + Duration::from_millis(100));

        assert_eq!(outcome.modules_recomputed, 2);
        assert_eq!(session.value(&id("z"), Scenario::Target), Some(&FieldValue::number(9.0)));
    }

    #[test]
    fn test_module_order_tolerates_cycles() {
        let links = vec![BTreeSet::from([1]), BTreeSet::from([0]), BTreeSet::new()];
        assert_eq!(Session::module_order(&links), vec![2, 0, 1]);
    }

    #[test]
    fn test_switch_module_mode_is_module_local() {
        let mut h = SessionHarness::sample();
        h.session.run_pass();
        h.session.switch_module_mode(COST_MODULE, Mode::Reference).unwrap();

        assert_eq!(h.session.module(COST_MODULE).unwrap().mode(), Mode::Reference);
        assert_eq!(h.session.module(ENERGY_MODULE).unwrap().mode(), Mode::Target);
        let cost = h.session.module(COST_MODULE).unwrap();
        assert_eq!(cost.display_value(&id("annual_cost")), Some(&FieldValue::number(100.0)));
        assert_eq!(
            h.session.switch_module_mode("nope", Mode::Target),
            Err(SessionError::UnknownModule("nope".to_string()))
        );
    }

    #[test]
    fn test_switch_mode_updates_display_only() {
        let mut h = SessionHarness::sample();
        h.session.run_pass();
        h.session.switch_mode(Mode::Reference);
        let cost = h.session.module(COST_MODULE).unwrap();
        assert_eq!(cost.display_value(&id("annual_cost")), Some(&FieldValue::number(100.0)));
        assert_eq!(h.session.store().display_scenario(), Scenario::Reference);
    }
}
