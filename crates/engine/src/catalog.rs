//! Module field catalogs and reference standard datasets.
//!
//! A `FieldCatalog` is the single source of truth for the fields one module
//! owns: which ids exist, which are inputs and which are calculated, and what
//! each one defaults to in every scenario. Both scenario states of a module
//! seed themselves from it.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::field_id::{FieldId, Scenario};
use crate::format::FormatTag;
use crate::value::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Edited by the user or imported.
    Input,
    /// Written only by the module's calculator.
    Calculated,
}

/// Definition of one field owned by a module.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub id: FieldId,
    pub kind: FieldKind,
    /// Default in every scenario unless overridden below.
    pub default: FieldValue,
    /// Reference-only default layered over `default`.
    pub reference_default: Option<FieldValue>,
    pub format: FormatTag,
}

impl FieldDef {
    /// Default for `scenario` before any standard dataset is applied.
    pub fn default_for(&self, scenario: Scenario) -> &FieldValue {
        match (scenario, &self.reference_default) {
            (Scenario::Reference, Some(v)) => v,
            _ => &self.default,
        }
    }
}

/// The set of fields a module owns, with their defaults.
#[derive(Debug, Clone)]
pub struct FieldCatalog {
    module: String,
    defs: Vec<FieldDef>,
    index: FxHashMap<FieldId, usize>,
}

impl FieldCatalog {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            defs: Vec::new(),
            index: FxHashMap::default(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Add or replace a field definition. Ids are stored without scenario prefix.
    pub fn define(&mut self, mut def: FieldDef) -> &mut Self {
        def.id = def.id.base();
        match self.index.get(&def.id) {
            Some(&i) => self.defs[i] = def,
            None => {
                self.index.insert(def.id.clone(), self.defs.len());
                self.defs.push(def);
            }
        }
        self
    }

    /// Builder: input field with a default value.
    pub fn input(mut self, id: &str, default: impl Into<FieldValue>) -> Self {
        self.define(FieldDef {
            id: FieldId::new(id),
            kind: FieldKind::Input,
            default: default.into(),
            reference_default: None,
            format: FormatTag::Raw,
        });
        self
    }

    /// Builder: calculated field, neutral default zero.
    pub fn calculated(mut self, id: &str, format: FormatTag) -> Self {
        self.define(FieldDef {
            id: FieldId::new(id),
            kind: FieldKind::Calculated,
            default: FieldValue::number(0.0),
            reference_default: None,
            format,
        });
        self
    }

    /// Builder: Reference-specific default for an already defined field.
    pub fn reference_default(mut self, id: &str, value: impl Into<FieldValue>) -> Self {
        if let Some(&i) = self.index.get(&FieldId::new(id).base()) {
            self.defs[i].reference_default = Some(value.into());
        } else {
            log::warn!("{}: reference default for unknown field {}", self.module, id);
        }
        self
    }

    /// Builder: display format for an already defined field.
    pub fn format(mut self, id: &str, format: FormatTag) -> Self {
        if let Some(&i) = self.index.get(&FieldId::new(id).base()) {
            self.defs[i].format = format;
        }
        self
    }

    /// Whether the module owns `id` (prefix ignored).
    pub fn contains(&self, id: &FieldId) -> bool {
        self.index.contains_key(&id.base())
    }

    pub fn get(&self, id: &FieldId) -> Option<&FieldDef> {
        self.index.get(&id.base()).map(|&i| &self.defs[i])
    }

    pub fn defs(&self) -> &[FieldDef] {
        &self.defs
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &FieldId> {
        self.defs.iter().map(|d| &d.id)
    }

    pub fn input_ids(&self) -> impl Iterator<Item = &FieldId> {
        self.defs
            .iter()
            .filter(|d| d.kind == FieldKind::Input)
            .map(|d| &d.id)
    }

    pub fn calculated_ids(&self) -> impl Iterator<Item = &FieldId> {
        self.defs
            .iter()
            .filter(|d| d.kind == FieldKind::Calculated)
            .map(|d| &d.id)
    }

    /// Generate the default values for one scenario.
    ///
    /// Layers, later wins: base default, Reference-specific default, then the
    /// standard dataset (Reference only, and only for ids this module owns).
    pub fn defaults_for(
        &self,
        scenario: Scenario,
        standard: Option<&StandardDataset>,
    ) -> Vec<(FieldId, FieldValue)> {
        self.defs
            .iter()
            .map(|def| {
                let overlay = match (scenario, standard) {
                    (Scenario::Reference, Some(std)) => std.get(&def.id),
                    _ => None,
                };
                let value = overlay.unwrap_or_else(|| def.default_for(scenario)).clone();
                (def.id.clone(), value)
            })
            .collect()
    }
}

/// Named external dataset of Reference values (a building code edition).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StandardDataset {
    name: String,
    values: BTreeMap<FieldId, FieldValue>,
}

impl StandardDataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builder: add one value. Ids are stored without scenario prefix.
    pub fn with(mut self, id: &str, value: impl Into<FieldValue>) -> Self {
        self.insert(FieldId::new(id), value.into());
        self
    }

    pub fn insert(&mut self, id: FieldId, value: FieldValue) {
        self.values.insert(id.base(), value);
    }

    pub fn get(&self, id: &FieldId) -> Option<&FieldValue> {
        self.values.get(&id.base())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldId, &FieldValue)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
