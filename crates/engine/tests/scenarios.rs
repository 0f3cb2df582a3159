// End-to-end session scenarios over the public API.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use twinstate_engine::catalog::FieldCatalog;
use twinstate_engine::events::{ChangeKind, EventCollector};
use twinstate_engine::field_id::{FieldId, Scenario};
use twinstate_engine::graph_export::{GraphScope, GroupRule};
use twinstate_engine::format::FormatTag;
use twinstate_engine::module::{CalcContext, Calculator, Mode, ModeFacade};
use twinstate_engine::persist::{MemoryBackend, PersistenceAdapter, SlotKey};
use twinstate_engine::sample::{sample_modules, COST_MODULE, ENERGY_MODULE};
use twinstate_engine::session::{Session, Timings};
use twinstate_engine::store::{FieldStore, RevertOutcome};
use twinstate_engine::value::{FieldValue, Provenance};

fn id(s: &str) -> FieldId {
    FieldId::new(s)
}

fn session_over(backend: Rc<MemoryBackend>) -> Session {
    let adapter = PersistenceAdapter::new(backend);
    let mut session = Session::with_persistence(FieldStore::new(), adapter, Timings::default());
    for module in sample_modules() {
        session.register_module(module).unwrap();
    }
    session
}

fn number(session: &Session, key: &str) -> f64 {
    session
        .store()
        .get_value(&id(key))
        .and_then(FieldValue::as_number)
        .unwrap_or(f64::NAN)
}

fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn reference_edit_leaves_target_alone() {
    let mut session = session_over(Rc::new(MemoryBackend::new()));
    session.edit(ENERGY_MODULE, &id("energy_in"), FieldValue::number(1000.0)).unwrap();
    session.edit(ENERGY_MODULE, &id("area"), FieldValue::number(100.0)).unwrap();
    session.run_pass();
    assert_eq!(number(&session, "intensity"), 10.0);

    session.switch_mode(Mode::Reference);
    session.edit(ENERGY_MODULE, &id("area"), FieldValue::number(50.0)).unwrap();
    session.run_pass();

    assert_eq!(number(&session, "ref_intensity"), 20.0);
    assert_eq!(number(&session, "intensity"), 10.0);
    assert_eq!(
        session.value(&id("intensity"), Scenario::Reference),
        Some(&FieldValue::number(20.0))
    );
}

#[test]
fn quarantined_import_recomputes_once() {
    let mut store = FieldStore::new();
    store.register_dependency("x", "z");
    store.register_dependency("y", "z");

    let events = Rc::new(RefCell::new(EventCollector::new()));
    for field in ["x", "y", "z"] {
        let sink = Rc::clone(&events);
        store.add_listener(
            field,
            Box::new(move |c| {
                sink.borrow_mut().push(c.clone());
                Ok(())
            }),
        );
    }

    store.import(&entries(&[("x", "5"), ("y", "7")]));
    assert!(events.borrow().is_empty());
    assert_eq!(store.dirty_fields(), vec![id("z")]);

    let report = store.recalculate();
    assert_eq!(report.order, vec![id("z")]);
    assert_eq!(events.borrow().len(), 1);
    assert_eq!(events.borrow().count_for("z"), 1);
    assert_eq!(events.borrow().events()[0].kind, ChangeKind::Recalculate);
    assert_eq!(store.get_value(&id("x")), Some(&FieldValue::number(5.0)));
    assert_eq!(store.provenance(&id("y")), Some(Provenance::Imported));
}

#[test]
fn persisted_session_restores_identically() {
    let backend = Rc::new(MemoryBackend::new());
    let mut session = session_over(backend.clone());
    session.import(&entries(&[("energy_in", "4000"), ("ref_rate", "0.2")]));
    session.edit(ENERGY_MODULE, &id("area"), FieldValue::number(80.0)).unwrap();
    session.run_pass();
    assert!(session.flush() >= 1);

    let before = session.export();
    assert!(backend.raw(&SlotKey::Global).is_some());
    assert!(backend.raw(&SlotKey::module(ENERGY_MODULE, Scenario::Target)).is_some());

    let mut restored = session_over(backend);
    restored.restore();
    assert_eq!(restored.export(), before);
    assert_eq!(number(&restored, "intensity"), 50.0);
    assert_eq!(number(&restored, "ref_annual_cost"), 200.0);
}

#[test]
fn revert_without_import_refreshes_defaults() {
    let mut session = session_over(Rc::new(MemoryBackend::new()));
    session.edit(ENERGY_MODULE, &id("area"), FieldValue::number(25.0)).unwrap();
    session.run_pass();
    assert_eq!(number(&session, "intensity"), 40.0);

    let (outcome, _) = session.revert_to_last_import();
    assert_eq!(outcome, RevertOutcome::NoImport);
    assert_eq!(number(&session, "area"), 100.0);
    assert_eq!(number(&session, "intensity"), 10.0);
}

#[test]
fn cross_module_edit_cascades_after_debounce() {
    let mut session = session_over(Rc::new(MemoryBackend::new()));
    session.run_pass();
    let start = Instant::now();

    session.switch_mode(Mode::Reference);
    session.edit(ENERGY_MODULE, &id("energy_in"), FieldValue::number(3000.0)).unwrap();
    session.poll(start);
    let outcome = session.poll(start + Duration::from_millis(200));

    assert_eq!(outcome.modules_recomputed, 2);
    assert_eq!(number(&session, "ref_annual_cost"), 300.0);
    assert_eq!(number(&session, "annual_cost"), 120.0);
    let cost = session.module(COST_MODULE).unwrap();
    assert_eq!(cost.display_value(&id("annual_cost")), Some(&FieldValue::number(300.0)));
}

#[test]
fn graph_export_groups_by_scope() {
    let session = session_over(Rc::new(MemoryBackend::new()));
    let rules = vec![GroupRule::new(0, 999, "all rows")];

    let target = session.export_graph(GraphScope::Target, &rules);
    assert!(target.nodes.iter().all(|n| n.scenario == Scenario::Target));
    assert_eq!(target.edges.len(), 4);
    assert!(target.nodes.iter().all(|n| n.group == "ungrouped"));

    let both = session.export_graph(GraphScope::Both, &rules);
    assert_eq!(both.edges.len(), 8);
    let json = both.to_json().unwrap();
    assert!(json.contains("\"ref_intensity\""));
}

/// `z = x + y`
struct Sum;

impl Calculator for Sum {
    fn dependencies(&self) -> Vec<(FieldId, FieldId)> {
        vec![(id("x"), id("z")), (id("y"), id("z"))]
    }

    fn calculate(&self, ctx: &mut CalcContext<'_>) {
        let z = ctx.number("x") + ctx.number("y");
        ctx.set_calculated("z", z);
    }
}

/// `w = z * 2`, where `z` is calculated by another module.
struct Twice;

impl Calculator for Twice {
    fn dependencies(&self) -> Vec<(FieldId, FieldId)> {
        vec![(id("z"), id("w"))]
    }

    fn calculate(&self, ctx: &mut CalcContext<'_>) {
        let w = ctx.number("z") * 2.0;
        ctx.set_calculated("w", w);
    }
}

/// The downstream module is registered first.
fn chained_session() -> Session {
    let mut session = Session::default();
    let twice = ModeFacade::new(FieldCatalog::new("scale").calculated("w", FormatTag::Raw), Twice);
    let sum = ModeFacade::new(
        FieldCatalog::new("mix")
            .input("x", 0.0)
            .input("y", 0.0)
            .calculated("z", FormatTag::Raw),
        Sum,
    );
    session.register_module(twice).unwrap();
    session.register_module(sum).unwrap();
    session.run_pass();
    session
}

#[test]
fn calculation_reads_other_module_calculation() {
    let mut session = chained_session();
    session.edit("mix", &id("x"), FieldValue::number(3.0)).unwrap();
    session.edit("mix", &id("y"), FieldValue::number(4.0)).unwrap();
    session.run_pass();

    assert_eq!(number(&session, "z"), 7.0);
    assert_eq!(number(&session, "w"), 14.0);
    assert_eq!(number(&session, "ref_w"), 0.0);
    assert!(session.store().dirty_fields().is_empty());
}

#[test]
fn session_import_notifies_each_dependent_once() {
    let mut session = chained_session();
    let events = Rc::new(RefCell::new(EventCollector::new()));
    for field in ["x", "y", "z", "w"] {
        let sink = Rc::clone(&events);
        session.store_mut().add_listener(
            field,
            Box::new(move |c| {
                sink.borrow_mut().push(c.clone());
                Ok(())
            }),
        );
    }

    session.import(&entries(&[("x", "5"), ("y", "7")]));

    let events = events.borrow();
    assert_eq!(events.count_for("x"), 0);
    assert_eq!(events.count_for("y"), 0);
    assert_eq!(events.count_for("z"), 1);
    assert_eq!(events.count_for("w"), 1);
    assert!(events.events().iter().all(|e| e.kind == ChangeKind::Recalculate));
    assert_eq!(number(&session, "z"), 12.0);
    assert_eq!(number(&session, "w"), 24.0);
    assert_eq!(session.store().provenance(&id("x")), Some(Provenance::Imported));
}
