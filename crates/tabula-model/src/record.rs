//! Stored rows and their field values.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One non-empty data row of an ingested file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub template_id: Uuid,
    pub organization_id: Uuid,
    pub principal_id: Uuid,
    /// 1-based position among the file's data rows.
    pub row_ordinal: u32,
    /// Exactly one version chain per (principal, organization) is latest.
    pub is_latest: bool,
    pub data_version: u32,
    pub deleted: bool,
}

/// One cell of a record, keyed by the schema's storage key.
///
/// A record always carries one value per schema entry; a blank cell is
/// stored as an empty value, never as a missing row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldValue {
    pub record_id: Uuid,
    pub storage_key: String,
    pub value: String,
    pub is_empty: bool,
    pub is_valid: bool,
    pub validation_message: Option<String>,
    pub sort_order: u32,
}

impl FieldValue {
    /// A valid value for a cell; emptiness is derived from the text.
    pub fn intact(record_id: Uuid, storage_key: impl Into<String>, value: impl Into<String>, sort_order: u32) -> Self {
        let value = value.into();
        let is_empty = value.trim().is_empty();
        Self {
            record_id,
            storage_key: storage_key.into(),
            value,
            is_empty,
            is_valid: true,
            validation_message: None,
            sort_order,
        }
    }

    /// Mark this value as violating a required-field rule.
    pub fn invalidate(mut self, message: impl Into<String>) -> Self {
        self.is_valid = false;
        self.validation_message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emptiness_is_derived_from_text() {
        let rid = Uuid::new_v4();
        assert!(FieldValue::intact(rid, "Unit_T", "", 0).is_empty);
        assert!(FieldValue::intact(rid, "Unit_T", "   ", 0).is_empty);
        assert!(!FieldValue::intact(rid, "Unit_T", "kg", 0).is_empty);
    }

    #[test]
    fn invalidation_keeps_the_value() {
        let v = FieldValue::intact(Uuid::new_v4(), "Qty_C", "", 2).invalidate("'Qty' is required");
        assert!(v.is_empty);
        assert!(!v.is_valid);
        assert_eq!(v.validation_message.as_deref(), Some("'Qty' is required"));
        assert_eq!(v.value, "");
    }
}
