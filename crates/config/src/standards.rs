// Reference standards catalog
// Loaded from a TOML file; a built-in catalog covers the sample modules.
//
// [[standard]]
// name = "SB10"
// description = "Ontario SB-10 (2017)"
// [standard.values]
// area = 100
// rate = 0.10
//
// [[editable]]
// field = "rate"
// standards = ["SB10"]   # omitted or empty = every standard

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use twinstate_engine::catalog::StandardDataset;
use twinstate_engine::field_id::FieldId;
use twinstate_engine::policy::ReferenceEditPolicy;
use twinstate_engine::value::FieldValue;

use crate::error::StandardsError;

const BUILTIN: &str = r#"
[[standard]]
name = "SB10"
description = "Prescriptive envelope baseline"
[standard.values]
energy_in = 1000
area = 100
rate = 0.10

[[standard]]
name = "NECB-2020"
description = "National energy code baseline"
[standard.values]
energy_in = 900
area = 100
rate = 0.11

[[editable]]
field = "rate"
"#;

/// A scalar in a standard's value table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StandardValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl From<&StandardValue> for FieldValue {
    fn from(value: &StandardValue) -> Self {
        match value {
            StandardValue::Number(n) => FieldValue::number(*n),
            StandardValue::Bool(b) => FieldValue::Bool(*b),
            StandardValue::Text(s) => FieldValue::text(s.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub values: BTreeMap<String, StandardValue>,
}

impl StandardDef {
    pub fn dataset(&self) -> StandardDataset {
        let mut dataset = StandardDataset::new(self.name.clone());
        for (id, value) in &self.values {
            dataset.insert(FieldId::new(id.as_str()), value.into());
        }
        dataset
    }
}

/// A Reference field the user may edit apart from the loaded standard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditableRule {
    pub field: String,
    #[serde(default)]
    pub standards: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandardsCatalog {
    #[serde(default, rename = "standard")]
    pub standards: Vec<StandardDef>,
    #[serde(default)]
    pub editable: Vec<EditableRule>,
}

impl StandardsCatalog {
    /// The catalog shipped with the binary
    pub fn builtin() -> Self {
        match Self::parse(BUILTIN) {
            Ok(catalog) => catalog,
            Err(e) => {
                log::error!("built-in standards catalog is invalid: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, StandardsError> {
        let catalog: Self = toml::from_str(contents).map_err(|e| StandardsError::Parse(e.to_string()))?;

        let mut seen = BTreeSet::new();
        for standard in &catalog.standards {
            if !seen.insert(standard.name.as_str()) {
                return Err(StandardsError::Duplicate(standard.name.clone()));
            }
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self, StandardsError> {
        let contents = fs::read_to_string(path).map_err(|e| StandardsError::Io(format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Load `path` if given, else the built-in catalog
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self, StandardsError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.standards.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&StandardDef> {
        self.standards.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    pub fn dataset(&self, name: &str) -> Result<StandardDataset, StandardsError> {
        self.get(name)
            .map(StandardDef::dataset)
            .ok_or_else(|| StandardsError::Unknown(name.to_string()))
    }

    /// Edit policy built from the `[[editable]]` table
    pub fn edit_policy(&self) -> EditPolicyTable {
        let mut rules: BTreeMap<FieldId, BTreeSet<String>> = BTreeMap::new();
        for rule in &self.editable {
            rules
                .entry(FieldId::new(rule.field.as_str()).base())
                .or_default()
                .extend(rule.standards.iter().cloned());
        }
        EditPolicyTable { rules }
    }
}

/// Table-driven `ReferenceEditPolicy` keyed by (field, standard).
/// An empty standard set means every standard.
#[derive(Debug, Clone, Default)]
pub struct EditPolicyTable {
    rules: BTreeMap<FieldId, BTreeSet<String>>,
}

impl ReferenceEditPolicy for EditPolicyTable {
    fn is_independently_editable(&self, field: &FieldId, standard: Option<&str>) -> bool {
        match self.rules.get(&field.base()) {
            None => false,
            Some(standards) if standards.is_empty() => true,
            Some(standards) => standard.is_some_and(|s| standards.contains(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog() {
        let catalog = StandardsCatalog::builtin();
        assert_eq!(catalog.names(), vec!["SB10", "NECB-2020"]);
        let dataset = catalog.dataset("sb10").unwrap();
        assert_eq!(dataset.get(&FieldId::new("area")), Some(&FieldValue::number(100.0)));
        assert_eq!(dataset.get(&FieldId::new("rate")), Some(&FieldValue::number(0.10)));
    }

    #[test]
    fn test_unknown_standard() {
        let catalog = StandardsCatalog::builtin();
        assert_eq!(
            catalog.dataset("ASHRAE").unwrap_err(),
            StandardsError::Unknown("ASHRAE".to_string())
        );
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let toml = r#"
            [[standard]]
            name = "A"
            [[standard]]
            name = "A"
        "#;
        assert_eq!(
            StandardsCatalog::parse(toml).unwrap_err(),
            StandardsError::Duplicate("A".to_string())
        );
    }

    #[test]
    fn test_edit_policy_table() {
        let toml = r#"
            [[standard]]
            name = "SB10"
            [standard.values]
            d_97 = 0.5
            label = "baseline"
            heated = true

            [[editable]]
            field = "d_97"
            standards = ["SB10"]

            [[editable]]
            field = "ref_d_98"
        "#;
        let catalog = StandardsCatalog::parse(toml).unwrap();
        let policy = catalog.edit_policy();

        assert!(policy.is_independently_editable(&FieldId::new("d_97"), Some("SB10")));
        assert!(!policy.is_independently_editable(&FieldId::new("d_97"), Some("NECB-2020")));
        assert!(!policy.is_independently_editable(&FieldId::new("d_97"), None));
        assert!(policy.is_independently_editable(&FieldId::new("d_98"), None));
        assert!(!policy.is_independently_editable(&FieldId::new("d_99"), Some("SB10")));

        let dataset = catalog.dataset("SB10").unwrap();
        assert_eq!(dataset.get(&FieldId::new("label")), Some(&FieldValue::text("baseline")));
        assert_eq!(dataset.get(&FieldId::new("heated")), Some(&FieldValue::Bool(true)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("standards.toml");
        fs::write(&path, "[[standard]]\nname = \"X\"\n").unwrap();
        let catalog = StandardsCatalog::load_or_builtin(Some(&path)).unwrap();
        assert_eq!(catalog.names(), vec!["X"]);
        assert!(matches!(
            StandardsCatalog::load(&dir.path().join("missing.toml")),
            Err(StandardsError::Io(_))
        ));
    }
}
