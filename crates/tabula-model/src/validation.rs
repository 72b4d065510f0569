//! Validation reports produced by the row and file validators.

use serde::{Deserialize, Serialize};

/// Outcome of checking one field of one row against the required-field
/// policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCheck {
    /// Logical field name from the rule.
    pub field_name: String,
    /// Storage key the name resolved to; `None` when the schema has no
    /// matching column.
    pub storage_key: Option<String>,
    pub required: bool,
    pub empty: bool,
    pub valid: bool,
    pub message: Option<String>,
}

/// Outcome of checking one data row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowValidation {
    /// 1-based position among the file's data rows.
    pub row_ordinal: u32,
    /// 1-based row as the spreadsheet displays it.
    pub sheet_row: u32,
    pub valid: bool,
    pub checks: Vec<FieldCheck>,
    /// Joined messages of the violated rules, when any.
    pub summary: Option<String>,
}

impl RowValidation {
    /// Fold per-field checks into a row verdict.
    pub fn from_checks(row_ordinal: u32, sheet_row: u32, checks: Vec<FieldCheck>) -> Self {
        let violations: Vec<&str> = checks
            .iter()
            .filter(|c| !c.valid)
            .filter_map(|c| c.message.as_deref())
            .collect();
        let valid = violations.is_empty();
        let summary = if valid {
            None
        } else {
            Some(violations.join("; "))
        };
        Self {
            row_ordinal,
            sheet_row,
            valid,
            checks,
            summary,
        }
    }
}

/// Aggregate pre-flight result for a whole file.
///
/// `can_proceed` is a hard gate: one invalid row blocks the file. The
/// ingestion-level skip-invalid-rows policy is deliberately *not* mirrored
/// here; the file gate stays strict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileValidationReport {
    pub total_rows: u32,
    pub valid_rows: u32,
    pub invalid_rows: u32,
    pub rows: Vec<RowValidation>,
    /// Required fields whose name resolves to no schema column.
    pub missing_columns: Vec<String>,
    pub can_proceed: bool,
}

impl FileValidationReport {
    pub fn new(missing_columns: Vec<String>) -> Self {
        Self {
            can_proceed: true,
            missing_columns,
            ..Self::default()
        }
    }

    /// Fold one row's outcome into the aggregate.
    pub fn record(&mut self, row: RowValidation) {
        self.total_rows += 1;
        if row.valid {
            self.valid_rows += 1;
        } else {
            self.invalid_rows += 1;
            self.can_proceed = false;
        }
        self.rows.push(row);
    }

    /// Violations only, for compact error reporting.
    pub fn invalid(&self) -> impl Iterator<Item = &RowValidation> {
        self.rows.iter().filter(|r| !r.valid)
    }
}
