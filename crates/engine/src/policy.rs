//! Which Reference fields a user may edit independently of the loaded standard.

use rustc_hash::FxHashSet;

use crate::field_id::FieldId;

/// Decides whether a user edit of a Reference field diverges from the
/// active standard (kept in the store's override map) or is a plain write
/// into the Reference dataset.
pub trait ReferenceEditPolicy {
    /// `field` is the base id (no prefix); `standard` the active standard name.
    fn is_independently_editable(&self, field: &FieldId, standard: Option<&str>) -> bool;
}

/// Default policy: no Reference field is independently editable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIndependentEdits;

impl ReferenceEditPolicy for NoIndependentEdits {
    fn is_independently_editable(&self, _field: &FieldId, _standard: Option<&str>) -> bool {
        false
    }
}

impl<F> ReferenceEditPolicy for F
where
    F: Fn(&FieldId, Option<&str>) -> bool,
{
    fn is_independently_editable(&self, field: &FieldId, standard: Option<&str>) -> bool {
        self(field, standard)
    }
}

/// Fixed set of independently editable fields, regardless of standard.
#[derive(Debug, Clone, Default)]
pub struct FieldAllowList {
    fields: FxHashSet<FieldId>,
}

impl FieldAllowList {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<FieldId>,
    {
        Self {
            fields: fields.into_iter().map(|f| f.into().base()).collect(),
        }
    }
}

impl ReferenceEditPolicy for FieldAllowList {
    fn is_independently_editable(&self, field: &FieldId, _standard: Option<&str>) -> bool {
        self.fields.contains(&field.base())
    }
}
