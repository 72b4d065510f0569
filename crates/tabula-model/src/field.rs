//! Field schemas discovered from template spreadsheets.

use core::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::column::{col_to_letter, letter_to_col, ColumnLetterError};

/// The closed set of field types a schema column can carry.
///
/// The type is inferred from header vocabulary at extraction time and drives
/// cell coercion on export. Matches on this enum are exhaustive on purpose;
/// adding a variant must force every codec and validator site to decide.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Number,
    Date,
    Boolean,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Number => "NUMBER",
            FieldType::Date => "DATE",
            FieldType::Boolean => "BOOLEAN",
        }
    }

    pub fn parse(s: &str) -> Option<FieldType> {
        match s {
            "STRING" => Some(FieldType::String),
            "NUMBER" => Some(FieldType::Number),
            "DATE" => Some(FieldType::Date),
            "BOOLEAN" => Some(FieldType::Boolean),
            _ => None,
        }
    }

    /// Guess a column's type from its header label.
    ///
    /// Date/time vocabulary wins over numeric vocabulary, numeric vocabulary
    /// (or any embedded digit) over boolean, and everything else is a string.
    pub fn infer_from_label(label: &str) -> FieldType {
        let lower = label.to_lowercase();
        const DATE_WORDS: [&str; 2] = ["date", "time"];
        const NUMBER_WORDS: [&str; 8] = [
            "quantity", "qty", "count", "price", "amount", "total", "number", "code",
        ];
        const BOOLEAN_WORDS: [&str; 2] = ["bool", "flag"];

        if DATE_WORDS.iter().any(|w| lower.contains(w)) {
            return FieldType::Date;
        }
        if NUMBER_WORDS.iter().any(|w| lower.contains(w))
            || lower.bytes().any(|b| b.is_ascii_digit())
        {
            return FieldType::Number;
        }
        if BOOLEAN_WORDS.iter().any(|w| lower.contains(w)) || lower.starts_with("is ") {
            return FieldType::Boolean;
        }
        FieldType::String
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build the composite storage key for a (label, column letter) pair.
///
/// The key is `label_LETTER`, the identity that keeps two columns with the
/// same label apart. A label that already ends with the separator does not
/// get a second one (`"qty_"` + `"C"` → `"qty_C"`).
pub fn storage_key(label: &str, column_letter: &str) -> String {
    if label.ends_with('_') {
        format!("{label}{column_letter}")
    } else {
        format!("{label}_{column_letter}")
    }
}

/// One schema column discovered from a template header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub id: Uuid,
    pub template_id: Uuid,
    /// Normalized header label. Not unique; see [`SchemaField::storage_key`].
    pub label: String,
    /// Column letters (`"A"`, `"AH"`); bijective with the physical index.
    pub column_letter: String,
    pub field_type: FieldType,
    /// Position of the column within the schema, 0-based.
    pub sort_order: u32,
    /// Composite identity, unique within the template.
    pub storage_key: String,
}

impl SchemaField {
    /// Build an entry for a physical column, deriving letter, storage key
    /// and field type from the label.
    pub fn derive(template_id: Uuid, label: impl Into<String>, column: u32, sort_order: u32) -> Self {
        let label = label.into();
        let column_letter = col_to_letter(column);
        let key = storage_key(&label, &column_letter);
        let field_type = FieldType::infer_from_label(&label);
        Self {
            id: Uuid::new_v4(),
            template_id,
            label,
            column_letter,
            field_type,
            sort_order,
            storage_key: key,
        }
    }

    /// The 0-indexed physical column this entry maps to.
    pub fn column(&self) -> Result<u32, ColumnLetterError> {
        letter_to_col(&self.column_letter)
    }
}

/// The ordered set of schema fields for one template, plus the header
/// geometry the extractor ran with.
///
/// Row indices are 0-based: with `header_rows = 4`, rows `0..4` are header
/// and `data_start_row = 4` is Excel row 5.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub template_id: Uuid,
    pub header_rows: u32,
    pub data_start_row: u32,
    pub fields: Vec<SchemaField>,
}

impl FieldSchema {
    pub fn field_by_storage_key(&self, key: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.storage_key == key)
    }

    /// First field with the given display label, in schema order.
    pub fn field_by_label(&self, label: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.label == label)
    }

    pub fn storage_keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.storage_key.as_str())
    }

    /// Number of physical columns spanned by the schema.
    pub fn width(&self) -> u32 {
        self.fields
            .iter()
            .filter_map(|f| f.column().ok())
            .max()
            .map_or(0, |c| c + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn storage_key_composition() {
        assert_eq!(storage_key("Unit", "T"), "Unit_T");
        assert_eq!(storage_key("Unit", "AH"), "Unit_AH");
        assert_eq!(storage_key("qty_", "C"), "qty_C");
    }

    #[test]
    fn duplicate_labels_get_distinct_keys() {
        let tid = Uuid::new_v4();
        let a = SchemaField::derive(tid, "Unit", 19, 19);
        let b = SchemaField::derive(tid, "Unit", 33, 33);
        assert_eq!(a.storage_key, "Unit_T");
        assert_eq!(b.storage_key, "Unit_AH");
        assert_ne!(a.storage_key, b.storage_key);
        assert_eq!(a.column().unwrap(), 19);
        assert_eq!(b.column().unwrap(), 33);
    }

    #[test]
    fn field_type_inference() {
        assert_eq!(FieldType::infer_from_label("Delivery Date"), FieldType::Date);
        assert_eq!(FieldType::infer_from_label("Lead Time"), FieldType::Date);
        assert_eq!(FieldType::infer_from_label("Unit Price"), FieldType::Number);
        assert_eq!(FieldType::infer_from_label("Qty"), FieldType::Number);
        assert_eq!(FieldType::infer_from_label("Item Code"), FieldType::Number);
        assert_eq!(FieldType::infer_from_label("Zone 2"), FieldType::Number);
        assert_eq!(FieldType::infer_from_label("Active Flag"), FieldType::Boolean);
        assert_eq!(FieldType::infer_from_label("Is Urgent"), FieldType::Boolean);
        assert_eq!(FieldType::infer_from_label("Supplier"), FieldType::String);
    }

    #[test]
    fn field_type_serde_uses_upper_tags() {
        assert_eq!(
            serde_json::to_string(&FieldType::Number).unwrap(),
            "\"NUMBER\""
        );
        let back: FieldType = serde_json::from_str("\"DATE\"").unwrap();
        assert_eq!(back, FieldType::Date);
    }

    #[test]
    fn field_type_text_roundtrip() {
        for ft in [
            FieldType::String,
            FieldType::Number,
            FieldType::Date,
            FieldType::Boolean,
        ] {
            assert_eq!(FieldType::parse(ft.as_str()), Some(ft));
        }
        assert_eq!(FieldType::parse("number"), None);
    }

    #[test]
    fn schema_width_spans_max_column() {
        let tid = Uuid::new_v4();
        let schema = FieldSchema {
            template_id: tid,
            header_rows: 4,
            data_start_row: 4,
            fields: vec![
                SchemaField::derive(tid, "A col", 0, 0),
                SchemaField::derive(tid, "Far col", 33, 1),
            ],
        };
        assert_eq!(schema.width(), 34);
        assert!(schema.field_by_storage_key("Far col_AH").is_some());
    }
}
