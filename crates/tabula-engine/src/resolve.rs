//! Field identity resolution.
//!
//! Rules and callers address fields by the label a human saw in the
//! header; storage addresses them by composite key. Labels also drift
//! between template versions (trailing separators, widened wording), so
//! lookup degrades gracefully before giving up.

use tabula_model::{FieldSchema, SchemaField};

pub struct FieldResolver<'a> {
    schema: &'a FieldSchema,
}

impl<'a> FieldResolver<'a> {
    pub fn new(schema: &'a FieldSchema) -> Self {
        FieldResolver { schema }
    }

    /// Schema entry for a logical field name.
    ///
    /// Tiers, first match in schema order wins: exact label, label with
    /// trailing `_` trimmed on either side, then substring containment in
    /// either direction.
    pub fn resolve(&self, name: &str) -> Option<&'a SchemaField> {
        let fields = &self.schema.fields;
        if let Some(field) = fields.iter().find(|f| f.label == name) {
            return Some(field);
        }
        let trimmed = name.trim_end_matches('_');
        if !trimmed.is_empty() {
            if let Some(field) = fields
                .iter()
                .find(|f| f.label.trim_end_matches('_') == trimmed)
            {
                return Some(field);
            }
            if let Some(field) = fields
                .iter()
                .find(|f| f.label.contains(trimmed) || trimmed.contains(f.label.as_str()))
            {
                return Some(field);
            }
        }
        None
    }

    /// Storage key for a logical field name, falling back to the name
    /// itself so display paths stay total.
    pub fn resolve_key(&self, name: &str) -> String {
        match self.resolve(name) {
            Some(field) => field.storage_key.clone(),
            None => {
                log::warn!("field '{name}' matches no schema column, passing it through");
                name.to_string()
            }
        }
    }
}

/// Human-facing name of a storage key: the final `_<letters>` column
/// suffix is stripped, anything else passes through untouched.
pub fn display_name(storage_key: &str) -> &str {
    match storage_key.rfind('_') {
        Some(idx)
            if idx > 0
                && idx + 1 < storage_key.len()
                && storage_key[idx + 1..].bytes().all(|b| b.is_ascii_alphabetic()) =>
        {
            &storage_key[..idx]
        }
        _ => storage_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use uuid::Uuid;

    fn schema_of(labels: &[&str]) -> FieldSchema {
        let template_id = Uuid::new_v4();
        FieldSchema {
            template_id,
            header_rows: 1,
            data_start_row: 1,
            fields: labels
                .iter()
                .enumerate()
                .map(|(i, label)| SchemaField::derive(template_id, *label, i as u32, i as u32))
                .collect(),
        }
    }

    #[test]
    fn exact_label_wins_over_looser_tiers() {
        let schema = schema_of(&["Amount", "Amount Due"]);
        let resolver = FieldResolver::new(&schema);

        assert_eq!(resolver.resolve("Amount Due").unwrap().label, "Amount Due");
        assert_eq!(resolver.resolve("Amount").unwrap().label, "Amount");
    }

    #[test]
    fn trailing_separators_are_ignored() {
        let schema = schema_of(&["qty_"]);
        let resolver = FieldResolver::new(&schema);

        assert_eq!(resolver.resolve("qty").unwrap().label, "qty_");
        assert_eq!(resolver.resolve("qty__").unwrap().label, "qty_");
    }

    #[test]
    fn substring_matches_in_both_directions() {
        let schema = schema_of(&["Supplier Name", "Date"]);
        let resolver = FieldResolver::new(&schema);

        assert_eq!(resolver.resolve("Supplier").unwrap().label, "Supplier Name");
        assert_eq!(
            resolver.resolve("Delivery Date Planned").unwrap().label,
            "Date"
        );
        assert!(resolver.resolve("Carrier").is_none());
    }

    #[test]
    fn first_schema_entry_wins_among_substring_candidates() {
        let schema = schema_of(&["Unit Price", "Unit"]);
        let resolver = FieldResolver::new(&schema);

        // "Unit" resolves exactly; "Unit Pr" only by containment, and the
        // earlier column takes it.
        assert_eq!(resolver.resolve("Unit").unwrap().label, "Unit");
        assert_eq!(resolver.resolve("Unit Pr").unwrap().label, "Unit Price");
    }

    #[test]
    fn unresolved_names_pass_through_as_keys() {
        let schema = schema_of(&["Amount"]);
        let resolver = FieldResolver::new(&schema);

        assert_eq!(resolver.resolve_key("Amount"), "Amount_A");
        assert_eq!(resolver.resolve_key("Ghost"), "Ghost");
    }

    #[test]
    fn display_name_strips_the_column_suffix() {
        assert_eq!(display_name("Supplier Name_A"), "Supplier Name");
        assert_eq!(display_name("Unit_AH"), "Unit");
        assert_eq!(display_name("qty_C"), "qty");
        // No recognizable suffix: untouched.
        assert_eq!(display_name("amount_2"), "amount_2");
        assert_eq!(display_name("plain"), "plain");
        assert_eq!(display_name("_A"), "_A");
    }
}
