//! Recalculation types and reporting.
//!
//! This module defines the types returned by ordered recompute passes and by
//! cycle detection at dependency registration.

use crate::field_id::FieldId;

/// Report from one explicit recompute pass.
#[derive(Debug, Clone, Default)]
pub struct RecalcReport {
    /// Time taken for the pass in milliseconds.
    pub duration_ms: u64,

    /// Fields visited, in the order they were processed.
    /// Sources always precede their dependents for acyclic subgraphs.
    pub order: Vec<FieldId>,

    /// Number of listener invocations delivered during the pass.
    pub notifications: usize,

    /// Number of listener invocations that returned an error or panicked.
    pub listener_failures: usize,

    /// Number of modules whose calculators ran (session passes only).
    pub modules_recomputed: usize,

    /// Number of calculated values written back to the store.
    pub values_written: usize,

    /// True if the dirty closure contained a dependency cycle.
    pub had_cycles: bool,
}

impl RecalcReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields visited by the pass.
    pub fn fields_recalculated(&self) -> usize {
        self.order.len()
    }

    /// Format as a concise one-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} fields, {} modules, {} writes in {}ms, cycles={}, failures={}",
            self.order.len(),
            self.modules_recomputed,
            self.values_written,
            self.duration_ms,
            self.had_cycles,
            self.listener_failures,
        )
    }

    /// Format as a one-line log entry.
    ///
    /// Format: `[recalc/pass]   3ms  12 fields  2 modules  writes=8  cycles=0  failures=0`
    pub fn log_line(&self) -> String {
        format!(
            "[recalc/pass] {:>4}ms  {} fields  {} modules  writes={}  cycles={}  failures={}",
            self.duration_ms,
            self.order.len(),
            self.modules_recomputed,
            self.values_written,
            if self.had_cycles { 1 } else { 0 },
            self.listener_failures,
        )
    }
}

/// Report when cycle detection finds a circular dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    /// Fields participating in the cycle.
    /// May be a subset for large cycles.
    pub fields: Vec<FieldId>,

    /// Human-readable description of the cycle.
    pub message: String,
}

impl CycleReport {
    pub fn new(fields: Vec<FieldId>, message: impl Into<String>) -> Self {
        Self {
            fields,
            message: message.into(),
        }
    }

    /// Create a cycle report for a self-referencing field.
    pub fn self_reference(field: FieldId) -> Self {
        let message = format!("Field {} depends on itself", field);
        Self {
            fields: vec![field],
            message,
        }
    }

    /// Create a cycle report for a multi-field cycle.
    pub fn cycle(fields: Vec<FieldId>) -> Self {
        let names: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        let message = match names.as_slice() {
            [] => "Circular dependency".to_string(),
            [first, .., last] if names.len() > 5 => format!(
                "Circular dependency involving {} fields: {} → ... → {}",
                names.len(),
                first,
                last
            ),
            _ => format!("Circular dependency: {}", names.join(" → ")),
        };
        Self { fields, message }
    }
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CycleReport {}
