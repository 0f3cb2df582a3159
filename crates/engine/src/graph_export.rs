//! Dependency graph introspection export.
//!
//! Produces a node/edge listing of the registered dependencies for one or
//! both scenarios, with every node tagged by a coarse group derived from the
//! row number embedded in its id (`d_113` -> row 113).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::field_id::{FieldId, Scenario};
use crate::store::FieldStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphScope {
    Target,
    Reference,
    #[default]
    Both,
}

impl GraphScope {
    pub fn includes(self, scenario: Scenario) -> bool {
        match self {
            GraphScope::Target => scenario == Scenario::Target,
            GraphScope::Reference => scenario == Scenario::Reference,
            GraphScope::Both => matches!(scenario, Scenario::Target | Scenario::Reference),
        }
    }
}

impl FromStr for GraphScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "target" => Ok(GraphScope::Target),
            "reference" | "ref" => Ok(GraphScope::Reference),
            "both" | "all" => Ok(GraphScope::Both),
            other => Err(format!("unknown graph scope '{}'", other)),
        }
    }
}

impl fmt::Display for GraphScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GraphScope::Target => "target",
            GraphScope::Reference => "reference",
            GraphScope::Both => "both",
        })
    }
}

/// Inclusive row range mapped to a group label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRule {
    pub start: u32,
    pub end: u32,
    pub label: String,
}

impl GroupRule {
    pub fn new(start: u32, end: u32, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    pub fn contains(&self, row: u32) -> bool {
        (self.start..=self.end).contains(&row)
    }
}

/// Group label for a field: the first matching rule, else the row's decade
/// (`rows 110-119`), else `ungrouped` for ids without a row number.
pub fn group_label(id: &FieldId, rules: &[GroupRule]) -> String {
    let Some(row) = id.row_number() else {
        return "ungrouped".to_string();
    };
    if let Some(rule) = rules.iter().find(|r| r.contains(row)) {
        return rule.label.clone();
    }
    let low = row - row % 10;
    format!("rows {}-{}", low, low + 9)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: FieldId,
    pub scenario: Scenario,
    pub group: String,
    pub calculated: bool,
    /// Current value as display text, if the store holds one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: FieldId,
    pub target: FieldId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub scope: GraphScope,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl GraphExport {
    /// Build the export from the store's dependency graph.
    pub fn build(store: &FieldStore, scope: GraphScope, rules: &[GroupRule]) -> Self {
        let graph = store.graph();
        let nodes = graph
            .nodes()
            .into_iter()
            .filter(|id| scope.includes(id.scenario()))
            .map(|id| GraphNode {
                scenario: id.scenario(),
                group: group_label(&id, rules),
                calculated: graph.is_calculated(&id),
                value: store.get_value(&id).map(|v| v.raw_display()),
                id,
            })
            .collect();
        let edges = graph
            .edges()
            .into_iter()
            .filter(|(s, d)| scope.includes(s.scenario()) && scope.includes(d.scenario()))
            .map(|(source, target)| GraphEdge { source, target })
            .collect();
        Self { scope, nodes, edges }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Node count per group label, sorted by label.
    pub fn group_counts(&self) -> Vec<(String, usize)> {
        let mut counts: std::collections::BTreeMap<&str, usize> = Default::default();
        for node in &self.nodes {
            *counts.entry(node.group.as_str()).or_default() += 1;
        }
        counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{FieldValue, Provenance};

    fn store() -> FieldStore {
        let mut store = FieldStore::new();
        store.register_dependency("d_113", "d_115");
        store.register_dependency("ref_d_113", "ref_d_115");
        store.register_dependency("d_20", "d_115");
        store.set_value("d_113", FieldValue::number(4.0), Provenance::UserModified);
        store
    }

    #[test]
    fn test_group_label() {
        let rules = vec![GroupRule::new(10, 29, "Climate")];
        assert_eq!(group_label(&FieldId::new("d_20"), &rules), "Climate");
        assert_eq!(group_label(&FieldId::new("ref_d_113"), &rules), "rows 110-119");
        assert_eq!(group_label(&FieldId::new("city"), &rules), "ungrouped");
    }

    #[test]
    fn test_scope_filters() {
        let store = store();
        let target = GraphExport::build(&store, GraphScope::Target, &[]);
        assert_eq!(target.nodes.len(), 3);
        assert_eq!(target.edges.len(), 2);

        let reference = GraphExport::build(&store, GraphScope::Reference, &[]);
        assert_eq!(reference.nodes.len(), 2);
        assert!(reference.nodes.iter().all(|n| n.scenario == Scenario::Reference));

        let both = GraphExport::build(&store, GraphScope::Both, &[]);
        assert_eq!(both.edges.len(), 3);
        assert_eq!(both.group_counts(), vec![("rows 110-119".to_string(), 4), ("rows 20-29".to_string(), 1)]);
    }

    #[test]
    fn test_json_shape() {
        let export = GraphExport::build(&store(), GraphScope::Target, &[]);
        let json: serde_json::Value = serde_json::from_str(&export.to_json().unwrap()).unwrap();
        assert_eq!(json["scope"], "target");
        let node = json["nodes"].as_array().unwrap().iter().find(|n| n["id"] == "d_113").unwrap();
        assert_eq!(node["value"], "4");
        assert_eq!(node["calculated"], false);
        assert_eq!(json["edges"][0]["source"], "d_113");
    }

    #[test]
    fn test_parse_scope() {
        assert_eq!("Reference".parse::<GraphScope>(), Ok(GraphScope::Reference));
        assert!("sideways".parse::<GraphScope>().is_err());
    }
}
