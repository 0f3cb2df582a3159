use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Scalar value held by a field.
///
/// Numbers are wrapped in `OrderedFloat` so values compare and hash
/// totally, which keeps the no-op check in `FieldStore::set_value` exact
/// (NaN == NaN).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Empty,
    Number(OrderedFloat<f64>),
    Text(String),
    Bool(bool),
}

impl FieldValue {
    pub fn number(n: f64) -> Self {
        FieldValue::Number(OrderedFloat(n))
    }

    pub fn text(s: impl Into<String>) -> Self {
        FieldValue::Text(s.into())
    }

    /// Parse raw input the way an import or a text edit would.
    ///
    /// Blank input is `Empty`, any finite number `f64` accepts is a number,
    /// `true`/`false` are booleans, everything else is kept as text.
    /// `inf` and `NaN` stay text: JSON has no encoding for them.
    pub fn from_input(input: &str) -> Self {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return FieldValue::Empty;
        }

        if let Ok(num) = trimmed.parse::<f64>() {
            if num.is_finite() {
                return FieldValue::number(num);
            }
        }

        match trimmed {
            "true" => FieldValue::Bool(true),
            "false" => FieldValue::Bool(false),
            _ => FieldValue::Text(trimmed.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FieldValue::Empty)
    }

    /// Numeric view of the value, if it has one.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(n.0),
            FieldValue::Text(s) => s.trim().parse().ok().filter(|n: &f64| n.is_finite()),
            FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            FieldValue::Empty => None,
        }
    }

    /// Unformatted display string (used for export and as formatter input).
    pub fn raw_display(&self) -> String {
        match self {
            FieldValue::Empty => String::new(),
            FieldValue::Text(s) => s.clone(),
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Number(n) => {
                let n = n.0;
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", n as i64)
                } else {
                    format!("{}", n)
                }
            }
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::number(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

/// How a field's current value was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Seeded from a module catalog or a reference standard.
    Default,
    /// Written by a bulk import.
    Imported,
    /// Direct user edit.
    UserModified,
    /// User edit of a Reference field that the edit policy lets diverge from
    /// the loaded standard.
    Overridden,
    /// Written by a module calculator.
    Calculated,
    /// Written as a by-product of another calculation.
    Derived,
}

impl Provenance {
    /// Computed writes neither dirty dependents nor notify listeners.
    pub fn is_computed(self) -> bool {
        matches!(self, Provenance::Calculated | Provenance::Derived)
    }

    /// Whether a field with this provenance belongs in the global snapshot.
    pub fn is_persistable(self) -> bool {
        matches!(self, Provenance::UserModified | Provenance::Imported)
    }

    /// Whether this provenance marks a direct user edit.
    pub fn is_user_edit(self) -> bool {
        matches!(self, Provenance::UserModified | Provenance::Overridden)
    }
}

/// A stored field: value plus provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub value: FieldValue,
    pub provenance: Provenance,
}

impl Field {
    pub fn new(value: FieldValue, provenance: Provenance) -> Self {
        Self { value, provenance }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_input() {
        assert_eq!(FieldValue::from_input(""), FieldValue::Empty);
        assert_eq!(FieldValue::from_input("  "), FieldValue::Empty);
        assert_eq!(FieldValue::from_input("5"), FieldValue::number(5.0));
        assert_eq!(FieldValue::from_input(" 7.25 "), FieldValue::number(7.25));
        assert_eq!(FieldValue::from_input("true"), FieldValue::Bool(true));
        assert_eq!(FieldValue::from_input("Toronto"), FieldValue::text("Toronto"));
    }

    #[test]
    fn test_non_finite_input_stays_text() {
        assert_eq!(FieldValue::from_input("inf"), FieldValue::text("inf"));
        assert_eq!(FieldValue::from_input("NaN"), FieldValue::text("NaN"));
        assert_eq!(FieldValue::from_input("-infinity"), FieldValue::text("-infinity"));
        assert_eq!(FieldValue::text("inf").as_number(), None);

        let field = Field::new(FieldValue::from_input("NaN"), Provenance::Imported);
        let json = serde_json::to_string(&field).unwrap();
        let back: Field = serde_json::from_str(&json).unwrap();
        assert_eq!(back, field);
    }

    #[test]
    fn test_as_number() {
        assert_eq!(FieldValue::number(3.5).as_number(), Some(3.5));
        assert_eq!(FieldValue::text("12").as_number(), Some(12.0));
        assert_eq!(FieldValue::text("N/A").as_number(), None);
        assert_eq!(FieldValue::Empty.as_number(), None);
    }

    #[test]
    fn test_raw_display() {
        assert_eq!(FieldValue::number(10.0).raw_display(), "10");
        assert_eq!(FieldValue::number(0.25).raw_display(), "0.25");
        assert_eq!(FieldValue::Empty.raw_display(), "");
    }

    #[test]
    fn test_nan_compares_equal() {
        assert_eq!(FieldValue::number(f64::NAN), FieldValue::number(f64::NAN));
    }

    #[test]
    fn test_provenance_classes() {
        assert!(Provenance::Calculated.is_computed());
        assert!(Provenance::Derived.is_computed());
        assert!(!Provenance::UserModified.is_computed());

        assert!(Provenance::UserModified.is_persistable());
        assert!(Provenance::Imported.is_persistable());
        assert!(!Provenance::Default.is_persistable());
        assert!(!Provenance::Calculated.is_persistable());
    }

    #[test]
    fn test_serde_shapes() {
        let field = Field::new(FieldValue::number(1000.0), Provenance::UserModified);
        let json = serde_json::to_string(&field).unwrap();
        assert_eq!(json, r#"{"value":1000.0,"provenance":"user_modified"}"#);

        let back: Field = serde_json::from_str(&json).unwrap();
        assert_eq!(back, field);

        let empty: FieldValue = serde_json::from_str("null").unwrap();
        assert_eq!(empty, FieldValue::Empty);
    }
}
