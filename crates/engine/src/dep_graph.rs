//! Dependency graph for calculated fields.
//!
//! Tracks precedents (fields a calculated field is derived from), dependents
//! (fields derived from a given field), the set of calculated fields, and the
//! transient dirty set.
//!
//! # Edge Direction
//!
//! ```text
//! A → B  means  "B depends on A"  (A is a precedent of B)
//! ```
//!
//! Scenario-prefixed ids are ordinary nodes: `d_12 → d_13` and
//! `ref_d_12 → ref_d_13` are two unrelated edges, so dirty propagation never
//! crosses from one scenario into the other.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::field_id::FieldId;
use crate::recalc::CycleReport;

/// Outcome of `DepGraph::register_dependency`.
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// New edge stored.
    Added,
    /// The edge already existed; nothing changed.
    AlreadyPresent,
    /// New edge stored, and it closes a cycle. Traversals stay finite but
    /// calculation order inside the cycle is best-effort.
    AddedWithCycle(CycleReport),
}

impl Registration {
    pub fn is_cycle(&self) -> bool {
        matches!(self, Registration::AddedWithCycle(_))
    }
}

/// Persistent dependency graph for calculated fields.
///
/// Maintains bidirectional adjacency for O(1) lookups:
/// - `preds[B]` = fields that B depends on (precedents)
/// - `succs[A]` = fields that depend on A (dependents)
///
/// # Invariants
///
/// 1. **Bidirectional consistency:** If A ∈ preds[B] then B ∈ succs[A], and vice versa.
/// 2. **No dangling entries:** Empty sets are removed, not stored.
/// 3. **No duplicate edges:** Set semantics enforced by FxHashSet.
/// 4. **Calculated set:** every key of `preds` is in `calculated`.
#[derive(Default, Debug, Clone)]
pub struct DepGraph {
    /// Precedents: for each calculated field B, the fields A it depends on.
    preds: FxHashMap<FieldId, FxHashSet<FieldId>>,

    /// Dependents: for each referenced field A, the fields B that depend on it.
    succs: FxHashMap<FieldId, FxHashSet<FieldId>>,

    /// Fields that are the target of at least one registered edge.
    calculated: FxHashSet<FieldId>,

    /// Fields whose stored value is stale relative to their precedents.
    dirty: FxHashSet<FieldId>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fields this field depends on (precedents).
    pub fn precedents<'a>(&'a self, field: &FieldId) -> impl Iterator<Item = &'a FieldId> + 'a {
        self.preds.get(field).into_iter().flat_map(|s| s.iter())
    }

    /// Returns the fields that depend on this field (dependents).
    pub fn dependents<'a>(&'a self, field: &FieldId) -> impl Iterator<Item = &'a FieldId> + 'a {
        self.succs.get(field).into_iter().flat_map(|s| s.iter())
    }

    pub fn precedent_count(&self, field: &FieldId) -> usize {
        self.preds.get(field).map_or(0, |s| s.len())
    }

    pub fn dependent_count(&self, field: &FieldId) -> usize {
        self.succs.get(field).map_or(0, |s| s.len())
    }

    /// Returns true if some registered edge targets this field.
    pub fn is_calculated(&self, field: &FieldId) -> bool {
        self.calculated.contains(field)
    }

    pub fn calculated_count(&self) -> usize {
        self.calculated.len()
    }

    /// Returns the number of fields referenced by at least one calculated field.
    pub fn referenced_count(&self) -> usize {
        self.succs.len()
    }

    pub fn edge_count(&self) -> usize {
        self.preds.values().map(|s| s.len()).sum()
    }

    /// All edges as (source, dependent), sorted for deterministic output.
    pub fn edges(&self) -> Vec<(FieldId, FieldId)> {
        let mut edges: Vec<(FieldId, FieldId)> = self
            .preds
            .iter()
            .flat_map(|(dep, preds)| preds.iter().map(move |p| (p.clone(), dep.clone())))
            .collect();
        edges.sort();
        edges
    }

    /// All fields that appear in any edge, sorted.
    pub fn nodes(&self) -> Vec<FieldId> {
        let mut nodes: FxHashSet<&FieldId> = self.preds.keys().collect();
        nodes.extend(self.succs.keys());
        let mut nodes: Vec<FieldId> = nodes.into_iter().cloned().collect();
        nodes.sort();
        nodes
    }

    /// Register that `dependent` is derived from `source`.
    ///
    /// Idempotent. A cycle closed by the new edge is detected here and
    /// reported; the edge is stored anyway so that the graph keeps describing
    /// what the modules declared.
    pub fn register_dependency(&mut self, source: FieldId, dependent: FieldId) -> Registration {
        if self.preds.get(&dependent).is_some_and(|p| p.contains(&source)) {
            return Registration::AlreadyPresent;
        }

        let cycle = self.would_create_cycle(&dependent, &source);

        self.succs.entry(source.clone()).or_default().insert(dependent.clone());
        self.preds.entry(dependent.clone()).or_default().insert(source);
        self.calculated.insert(dependent);

        match cycle {
            Some(report) => Registration::AddedWithCycle(report),
            None => Registration::Added,
        }
    }

    /// Check if adding the edge `source → dependent` would create a cycle.
    ///
    /// Does not modify the graph. A cycle is created if `source` is already
    /// reachable from `dependent` by following dependent edges.
    pub fn would_create_cycle(&self, dependent: &FieldId, source: &FieldId) -> Option<CycleReport> {
        if dependent == source {
            return Some(CycleReport::self_reference(dependent.clone()));
        }

        let mut visited: FxHashSet<&FieldId> = FxHashSet::default();
        let mut stack = vec![dependent];

        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }

            for dep in self.dependents(current) {
                if dep == source {
                    return Some(CycleReport::cycle(vec![
                        source.clone(),
                        dependent.clone(),
                        source.clone(),
                    ]));
                }
                stack.push(dep);
            }
        }

        None
    }

    // =========================================================================
    // Dirty tracking
    // =========================================================================

    /// Mark every transitive dependent of `field` dirty.
    ///
    /// Depth-first, guarded by a visited set so that a cycle terminates
    /// instead of looping. `field` itself is only marked if it is reachable
    /// from itself. Returns the number of fields newly marked.
    pub fn mark_dependents_dirty(&mut self, field: &FieldId) -> usize {
        let mut visited: FxHashSet<FieldId> = FxHashSet::default();
        let mut stack: Vec<FieldId> = self.dependents(field).cloned().collect();
        let mut newly_marked = 0;

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            stack.extend(self.dependents(&current).cloned());
            if self.dirty.insert(current) {
                newly_marked += 1;
            }
        }

        newly_marked
    }

    /// Mark a single field dirty without propagating.
    pub fn mark_dirty(&mut self, field: FieldId) -> bool {
        self.dirty.insert(field)
    }

    pub fn is_dirty(&self, field: &FieldId) -> bool {
        self.dirty.contains(field)
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Dirty fields, sorted.
    pub fn dirty_fields(&self) -> Vec<FieldId> {
        let mut fields: Vec<FieldId> = self.dirty.iter().cloned().collect();
        fields.sort();
        fields
    }

    /// Clear the named fields' dirty status, or every field when `fields` is empty.
    pub fn clear_dirty(&mut self, fields: &[FieldId]) {
        if fields.is_empty() {
            self.dirty.clear();
        } else {
            for field in fields {
                self.dirty.remove(field);
            }
        }
    }

    /// Remove all edges, the calculated set and the dirty set.
    pub fn clear(&mut self) {
        self.preds.clear();
        self.succs.clear();
        self.calculated.clear();
        self.dirty.clear();
    }

    // =========================================================================
    // Calculation order (three-color DFS)
    // =========================================================================

    /// Compute the order in which the dirty set must be recalculated.
    ///
    /// Restricted to the dirty fields and everything reachable from them.
    /// Every source precedes its direct and transitive dependents: the order
    /// is the reverse of a DFS post-order over dependent edges. Roots and
    /// neighbours are visited in sorted order so the result is deterministic.
    ///
    /// A back edge (gray → gray) means a cycle; it is skipped, which yields a
    /// best-effort partial order for the cyclic part.
    pub fn calculation_order(&self) -> Vec<FieldId> {
        self.order_from(self.dirty_fields()).0
    }

    /// Like `calculation_order`, also reporting whether a back edge was seen.
    pub fn calculation_order_checked(&self) -> (Vec<FieldId>, bool) {
        self.order_from(self.dirty_fields())
    }

    fn order_from(&self, roots: Vec<FieldId>) -> (Vec<FieldId>, bool) {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            Gray,
            Black,
        }

        struct DfsFrame<'a> {
            field: &'a FieldId,
            neighbours: Vec<&'a FieldId>,
            next_idx: usize,
        }

        // White fields are simply absent from the map.
        let mut color: FxHashMap<&FieldId, Color> = FxHashMap::default();
        let mut post_order: Vec<&FieldId> = Vec::new();
        let mut saw_back_edge = false;

        for root in &roots {
            if color.contains_key(root) {
                continue;
            }
            // Roots come from an owned Vec; resolve them to graph-owned keys
            // where possible so the frames can borrow `self`.
            let root_ref: &FieldId = self
                .succs
                .get_key_value(root)
                .map(|(k, _)| k)
                .or_else(|| self.preds.get_key_value(root).map(|(k, _)| k))
                .unwrap_or(root);

            color.insert(root_ref, Color::Gray);
            let mut dfs_stack = vec![DfsFrame {
                field: root_ref,
                neighbours: self.sorted_dependents(root_ref),
                next_idx: 0,
            }];

            while let Some(frame) = dfs_stack.last_mut() {
                if frame.next_idx < frame.neighbours.len() {
                    let next = frame.neighbours[frame.next_idx];
                    frame.next_idx += 1;

                    match color.get(next) {
                        None => {
                            color.insert(next, Color::Gray);
                            dfs_stack.push(DfsFrame {
                                field: next,
                                neighbours: self.sorted_dependents(next),
                                next_idx: 0,
                            });
                        }
                        Some(Color::Gray) => saw_back_edge = true,
                        Some(Color::Black) => {}
                    }
                } else if let Some(finished) = dfs_stack.pop() {
                    color.insert(finished.field, Color::Black);
                    post_order.push(finished.field);
                }
            }
        }

        let order = post_order.into_iter().rev().cloned().collect();
        (order, saw_back_edge)
    }

    fn sorted_dependents(&self, field: &FieldId) -> Vec<&FieldId> {
        let mut neighbours: Vec<&FieldId> = self.dependents(field).collect();
        neighbours.sort();
        neighbours
    }

    // =========================================================================
    // Cycle Membership (Tarjan's SCC)
    // =========================================================================

    /// Find all non-trivial SCCs (cycle groups), returned as separate groups.
    ///
    /// Each inner Vec is one SCC (size > 1, or size == 1 with self-loop),
    /// sorted by field id. Groups are ordered by their first member.
    /// Diagnostics only: traversal never depends on this.
    pub fn find_cycle_sccs(&self) -> Vec<Vec<FieldId>> {
        let nodes = self.nodes();
        if nodes.is_empty() {
            return Vec::new();
        }

        let mut index_counter: u32 = 0;
        let mut stack: Vec<FieldId> = Vec::new();
        let mut on_stack: FxHashSet<FieldId> = FxHashSet::default();
        let mut indices: FxHashMap<FieldId, u32> = FxHashMap::default();
        let mut lowlinks: FxHashMap<FieldId, u32> = FxHashMap::default();
        let mut sccs: Vec<Vec<FieldId>> = Vec::new();

        let sorted_neighbours = |field: &FieldId| -> Vec<FieldId> {
            let mut neighbours: Vec<FieldId> = self.dependents(field).cloned().collect();
            neighbours.sort();
            neighbours
        };

        // Iterative Tarjan's to avoid stack overflow on deep graphs.
        struct DfsFrame {
            field: FieldId,
            neighbours: Vec<FieldId>,
            next_idx: usize,
        }

        for root in nodes {
            if indices.contains_key(&root) {
                continue;
            }

            let mut dfs_stack: Vec<DfsFrame> = Vec::new();

            indices.insert(root.clone(), index_counter);
            lowlinks.insert(root.clone(), index_counter);
            index_counter += 1;
            stack.push(root.clone());
            on_stack.insert(root.clone());
            dfs_stack.push(DfsFrame {
                neighbours: sorted_neighbours(&root),
                field: root,
                next_idx: 0,
            });

            while let Some(frame) = dfs_stack.last_mut() {
                if frame.next_idx < frame.neighbours.len() {
                    let w = frame.neighbours[frame.next_idx].clone();
                    frame.next_idx += 1;

                    if !indices.contains_key(&w) {
                        indices.insert(w.clone(), index_counter);
                        lowlinks.insert(w.clone(), index_counter);
                        index_counter += 1;
                        stack.push(w.clone());
                        on_stack.insert(w.clone());
                        dfs_stack.push(DfsFrame {
                            neighbours: sorted_neighbours(&w),
                            field: w,
                            next_idx: 0,
                        });
                    } else if on_stack.contains(&w) {
                        let w_idx = indices[&w];
                        if let Some(v_low) = lowlinks.get_mut(&frame.field) {
                            if w_idx < *v_low {
                                *v_low = w_idx;
                            }
                        }
                    }
                    continue;
                }

                let Some(finished) = dfs_stack.pop() else {
                    break;
                };
                let v = finished.field;
                let v_low = lowlinks[&v];
                let v_idx = indices[&v];

                if let Some(parent) = dfs_stack.last() {
                    if let Some(parent_low) = lowlinks.get_mut(&parent.field) {
                        if v_low < *parent_low {
                            *parent_low = v_low;
                        }
                    }
                }

                if v_low == v_idx {
                    let mut scc = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack.remove(&w);
                        let done = w == v;
                        scc.push(w);
                        if done {
                            break;
                        }
                    }

                    let is_cycle = scc.len() > 1
                        || self.preds.get(&scc[0]).is_some_and(|p| p.contains(&scc[0]));

                    if is_cycle {
                        scc.sort();
                        sccs.push(scc);
                    }
                }
            }
        }

        sccs.sort();
        sccs
    }

    /// Check all invariants. Panics if any are violated.
    ///
    /// Only available in test builds.
    #[cfg(test)]
    pub fn assert_consistent(&self) {
        for (dependent, preds) in &self.preds {
            assert!(
                self.calculated.contains(dependent),
                "{:?} has precedents but is not in the calculated set",
                dependent
            );
            for pred in preds {
                assert!(
                    self.succs.get(pred).is_some_and(|s| s.contains(dependent)),
                    "Missing succ edge: {:?} should have {:?} in dependents",
                    pred,
                    dependent
                );
            }
        }

        for (field, dependents) in &self.succs {
            for dep in dependents {
                assert!(
                    self.preds.get(dep).is_some_and(|s| s.contains(field)),
                    "Missing pred edge: {:?} should have {:?} in precedents",
                    dep,
                    field
                );
            }
        }

        for (field, preds) in &self.preds {
            assert!(!preds.is_empty(), "Empty preds set stored for {:?}", field);
        }
        for (field, succs) in &self.succs {
            assert!(!succs.is_empty(), "Empty succs set stored for {:?}", field);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(id: &str) -> FieldId {
        FieldId::new(id)
    }

    fn position(order: &[FieldId], id: &str) -> usize {
        order
            .iter()
            .position(|x| x.as_str() == id)
            .unwrap_or_else(|| panic!("{id} missing from {order:?}"))
    }

    #[test]
    fn test_empty_graph() {
        let graph = DepGraph::new();

        assert_eq!(graph.calculated_count(), 0);
        assert_eq!(graph.referenced_count(), 0);
        assert!(!graph.is_calculated(&f("a")));
        assert_eq!(graph.precedents(&f("a")).count(), 0);
        assert_eq!(graph.dependents(&f("a")).count(), 0);
        assert!(graph.calculation_order().is_empty());

        graph.assert_consistent();
    }

    #[test]
    fn test_single_edge() {
        let mut graph = DepGraph::new();

        assert_eq!(graph.register_dependency(f("a"), f("b")), Registration::Added);
        graph.assert_consistent();

        assert!(graph.is_calculated(&f("b")));
        assert!(!graph.is_calculated(&f("a")));
        assert_eq!(graph.precedents(&f("b")).collect::<Vec<_>>(), vec![&f("a")]);
        assert_eq!(graph.dependents(&f("a")).collect::<Vec<_>>(), vec![&f("b")]);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut graph = DepGraph::new();

        graph.register_dependency(f("a"), f("b"));
        assert_eq!(
            graph.register_dependency(f("a"), f("b")),
            Registration::AlreadyPresent
        );
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.calculated_count(), 1);
        graph.assert_consistent();
    }

    #[test]
    fn test_diamond_dependency() {
        //     a
        //    / \
        //   b   c
        //    \ /
        //     d
        let mut graph = DepGraph::new();
        graph.register_dependency(f("a"), f("b"));
        graph.register_dependency(f("a"), f("c"));
        graph.register_dependency(f("b"), f("d"));
        graph.register_dependency(f("c"), f("d"));
        graph.assert_consistent();

        assert_eq!(graph.calculated_count(), 3);
        assert_eq!(graph.referenced_count(), 3);
        assert_eq!(graph.precedent_count(&f("d")), 2);
        assert_eq!(graph.dependent_count(&f("a")), 2);
    }

    #[test]
    fn test_dirty_propagation_chain() {
        // a → b → c
        let mut graph = DepGraph::new();
        graph.register_dependency(f("a"), f("b"));
        graph.register_dependency(f("b"), f("c"));

        assert_eq!(graph.mark_dependents_dirty(&f("a")), 2);
        assert!(graph.is_dirty(&f("b")));
        assert!(graph.is_dirty(&f("c")));
        assert!(!graph.is_dirty(&f("a")));

        graph.clear_dirty(&[f("b")]);
        assert!(!graph.is_dirty(&f("b")));
        assert!(graph.is_dirty(&f("c")));

        graph.clear_dirty(&[]);
        assert_eq!(graph.dirty_count(), 0);
    }

    #[test]
    fn test_dirty_propagation_stays_in_scenario() {
        let mut graph = DepGraph::new();
        graph.register_dependency(f("d_1"), f("d_2"));
        graph.register_dependency(f("ref_d_1"), f("ref_d_2"));

        graph.mark_dependents_dirty(&f("ref_d_1"));
        assert_eq!(graph.dirty_fields(), vec![f("ref_d_2")]);
    }

    #[test]
    fn test_cycle_registration_reported() {
        let mut graph = DepGraph::new();
        assert_eq!(graph.register_dependency(f("a"), f("b")), Registration::Added);

        let outcome = graph.register_dependency(f("b"), f("a"));
        assert!(outcome.is_cycle());
        // Edge is kept.
        assert_eq!(graph.edge_count(), 2);
        graph.assert_consistent();
    }

    #[test]
    fn test_self_reference_reported() {
        let mut graph = DepGraph::new();
        match graph.register_dependency(f("a"), f("a")) {
            Registration::AddedWithCycle(report) => {
                assert!(report.message.contains("depends on itself"));
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_dirty_marking_terminates() {
        // a → b → a
        let mut graph = DepGraph::new();
        graph.register_dependency(f("a"), f("b"));
        graph.register_dependency(f("b"), f("a"));

        graph.mark_dependents_dirty(&f("a"));
        assert_eq!(graph.dirty_fields(), vec![f("a"), f("b")]);

        let (order, had_cycle) = graph.calculation_order_checked();
        assert!(had_cycle);
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn test_order_chain() {
        // a → b → c, dirty after editing a
        let mut graph = DepGraph::new();
        graph.register_dependency(f("b"), f("c"));
        graph.register_dependency(f("a"), f("b"));
        graph.mark_dependents_dirty(&f("a"));

        assert_eq!(graph.calculation_order(), vec![f("b"), f("c")]);
    }

    #[test]
    fn test_order_includes_closure_of_dirty_set() {
        // Only b is dirty, but c depends on b and must follow it.
        let mut graph = DepGraph::new();
        graph.register_dependency(f("a"), f("b"));
        graph.register_dependency(f("b"), f("c"));
        graph.mark_dirty(f("b"));

        assert_eq!(graph.calculation_order(), vec![f("b"), f("c")]);
    }

    #[test]
    fn test_order_diamond() {
        let mut graph = DepGraph::new();
        graph.register_dependency(f("a"), f("b"));
        graph.register_dependency(f("a"), f("c"));
        graph.register_dependency(f("b"), f("d"));
        graph.register_dependency(f("c"), f("d"));
        graph.mark_dirty(f("a"));
        graph.mark_dependents_dirty(&f("a"));

        let order = graph.calculation_order();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "a") < position(&order, "b"));
        assert!(position(&order, "a") < position(&order, "c"));
        assert!(position(&order, "b") < position(&order, "d"));
        assert!(position(&order, "c") < position(&order, "d"));
    }

    #[test]
    fn test_order_is_stable() {
        let build = || {
            let mut graph = DepGraph::new();
            for i in 0..10 {
                graph.register_dependency(f("root"), f(&format!("d_{i}")));
            }
            graph.mark_dependents_dirty(&f("root"));
            graph.calculation_order()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_cycle_sccs() {
        let mut graph = DepGraph::new();
        graph.register_dependency(f("a"), f("b"));
        graph.register_dependency(f("b"), f("a"));
        graph.register_dependency(f("b"), f("c"));
        graph.register_dependency(f("x"), f("x"));

        let sccs = graph.find_cycle_sccs();
        assert_eq!(sccs, vec![vec![f("a"), f("b")], vec![f("x")]]);
    }

    #[test]
    fn test_cycle_sccs_acyclic() {
        let mut graph = DepGraph::new();
        graph.register_dependency(f("a"), f("b"));
        graph.register_dependency(f("b"), f("c"));
        assert!(graph.find_cycle_sccs().is_empty());
    }

    #[test]
    fn test_edges_sorted() {
        let mut graph = DepGraph::new();
        graph.register_dependency(f("b"), f("c"));
        graph.register_dependency(f("a"), f("c"));
        assert_eq!(graph.edges(), vec![(f("a"), f("c")), (f("b"), f("c"))]);
        assert_eq!(graph.nodes(), vec![f("a"), f("b"), f("c")]);
    }
}
