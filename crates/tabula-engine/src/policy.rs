//! Required-field policy bound to a live schema.
//!
//! Rules are stored by field name; before a file is judged they are bound
//! to concrete schema columns once, and every row reuses the bound form.
//! A rule whose name matches no column cannot fail rows; it is reported
//! as missing instead.

use tabula_model::{FieldCheck, FieldSchema, RequiredFieldRule, RowValidation};

use crate::preflight::SheetRow;
use crate::resolve::FieldResolver;

/// One enabled rule, bound to the schema column it governs.
#[derive(Debug, Clone)]
pub struct BoundRule {
    pub field_name: String,
    pub storage_key: String,
    /// Position of the governed field in schema order.
    pub field_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct EffectivePolicy {
    required: Vec<BoundRule>,
    missing: Vec<String>,
}

impl EffectivePolicy {
    /// Bind the enabled rules of a template to `schema`.
    pub fn bind(rules: &[RequiredFieldRule], schema: &FieldSchema) -> Self {
        let resolver = FieldResolver::new(schema);
        let mut required = Vec::new();
        let mut missing = Vec::new();
        for rule in rules.iter().filter(|r| r.required) {
            match resolver.resolve(&rule.field_name) {
                Some(field) => {
                    let field_index = schema
                        .fields
                        .iter()
                        .position(|f| f.storage_key == field.storage_key)
                        .unwrap_or_default();
                    required.push(BoundRule {
                        field_name: rule.field_name.clone(),
                        storage_key: field.storage_key.clone(),
                        field_index,
                        message: rule.violation_message(),
                    });
                }
                None => {
                    log::warn!(
                        "required field '{}' matches no column of template {}",
                        rule.field_name,
                        schema.template_id
                    );
                    missing.push(rule.field_name.clone());
                }
            }
        }
        EffectivePolicy { required, missing }
    }

    pub fn required(&self) -> &[BoundRule] {
        &self.required
    }

    /// Names of enabled rules that bound to no schema column.
    pub fn missing_columns(&self) -> &[String] {
        &self.missing
    }

    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
    }

    /// Judge one data row. Rows fail only on required cells that are
    /// blank; every check carries the rule's violation message.
    pub fn validate_row(&self, row: &SheetRow) -> RowValidation {
        let mut checks = Vec::with_capacity(self.required.len());
        for rule in &self.required {
            let value = row
                .values
                .get(rule.field_index)
                .map(String::as_str)
                .unwrap_or("");
            let empty = value.trim().is_empty();
            checks.push(FieldCheck {
                field_name: rule.field_name.clone(),
                storage_key: Some(rule.storage_key.clone()),
                required: true,
                empty,
                valid: !empty,
                message: empty.then(|| rule.message.clone()),
            });
        }
        RowValidation::from_checks(row.ordinal, row.sheet_row, checks)
    }
}
