pub mod catalog;
pub mod dep_graph;
pub mod events;
pub mod field_id;
pub mod format;
pub mod graph_export;
pub mod module;
pub mod persist;
pub mod policy;
pub mod recalc;
pub mod sample;
pub mod scenario;
pub mod session;
pub mod store;
pub mod value;

#[cfg(test)]
pub mod harness;
