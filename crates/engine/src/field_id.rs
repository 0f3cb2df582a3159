//! Field identity and scenario-key bridging.
//!
//! A `FieldId` names one field in the shared store. The same logical field
//! exists once per scenario: Target values live under the plain id, Reference
//! values under a `ref_`-prefixed id, Actual (measured) values under `act_`.
//!
//! ```text
//! d_113        Target value of row 113
//! ref_d_113    Reference value of row 113
//! act_d_113    Actual value of row 113
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Key prefix for Reference-scenario values in the shared store.
pub const REFERENCE_PREFIX: &str = "ref_";

/// Key prefix for Actual (measured) overlay values in the shared store.
pub const ACTUAL_PREFIX: &str = "act_";

/// Identifier of a field, either plain (`d_113`) or bridged (`ref_d_113`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldId(String);

impl FieldId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a store key into its scenario and base (plain) id.
    ///
    /// `ref_d_113` -> (Reference, `d_113`); `d_113` -> (Target, `d_113`).
    pub fn split_scenario(&self) -> (Scenario, FieldId) {
        if let Some(base) = self.0.strip_prefix(REFERENCE_PREFIX) {
            (Scenario::Reference, FieldId::new(base))
        } else if let Some(base) = self.0.strip_prefix(ACTUAL_PREFIX) {
            (Scenario::Actual, FieldId::new(base))
        } else {
            (Scenario::Target, self.clone())
        }
    }

    /// Scenario this key belongs to, judged by prefix alone.
    pub fn scenario(&self) -> Scenario {
        if self.0.starts_with(REFERENCE_PREFIX) {
            Scenario::Reference
        } else if self.0.starts_with(ACTUAL_PREFIX) {
            Scenario::Actual
        } else {
            Scenario::Target
        }
    }

    /// Base id with any scenario prefix removed.
    pub fn base(&self) -> FieldId {
        self.split_scenario().1
    }

    /// Numeric row id embedded in the field id (`d_113` -> 113).
    ///
    /// The first run of ASCII digits after the scenario prefix is used.
    pub fn row_number(&self) -> Option<u32> {
        let base = self.base();
        let s = base.as_str();
        let start = s.find(|c: char| c.is_ascii_digit())?;
        let digits: String = s[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for FieldId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&FieldId> for FieldId {
    fn from(id: &FieldId) -> Self {
        id.clone()
    }
}

impl AsRef<str> for FieldId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One of the parallel value sets the engine keeps for every field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// The user's designed configuration.
    Target,
    /// The code-mandated baseline.
    Reference,
    /// Measured data overlay. Stored and persisted, never calculated.
    Actual,
}

impl Scenario {
    /// Store-key prefix for this scenario.
    pub fn prefix(self) -> &'static str {
        match self {
            Scenario::Target => "",
            Scenario::Reference => REFERENCE_PREFIX,
            Scenario::Actual => ACTUAL_PREFIX,
        }
    }

    /// Build the store key for `base` in this scenario.
    ///
    /// `base` is expected to be a plain id; an already-prefixed id is
    /// stripped first so bridging never double-prefixes.
    pub fn bridge(self, base: &FieldId) -> FieldId {
        let plain = base.base();
        match self {
            Scenario::Target => plain,
            _ => FieldId::new(format!("{}{}", self.prefix(), plain.as_str())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::Target => "target",
            Scenario::Reference => "reference",
            Scenario::Actual => "actual",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A base field id paired with the scenario it is read or written under.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ScenarioKey {
    pub id: FieldId,
    pub scenario: Scenario,
}

impl ScenarioKey {
    pub fn new(id: impl Into<FieldId>, scenario: Scenario) -> Self {
        Self { id: id.into().base(), scenario }
    }

    /// The key this value lives under in the shared store.
    pub fn bridged(&self) -> FieldId {
        self.scenario.bridge(&self.id)
    }
}

impl From<&FieldId> for ScenarioKey {
    fn from(key: &FieldId) -> Self {
        let (scenario, id) = key.split_scenario();
        Self { id, scenario }
    }
}
