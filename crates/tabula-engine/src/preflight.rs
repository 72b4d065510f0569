//! Whole-file validation and the data-row reader it shares with the
//! ingestion pipeline.

use tabula_model::{FieldSchema, FileValidationReport};
use tabula_xlsx::TabularSheet;

use crate::error::Result;
use crate::policy::EffectivePolicy;

/// One data row rendered to text, one value per schema field in schema
/// order.
#[derive(Debug, Clone)]
pub struct SheetRow {
    /// 1-based position among the file's non-blank data rows.
    pub ordinal: u32,
    /// 1-based worksheet row, the number a user sees in Excel.
    pub sheet_row: u32,
    pub values: Vec<String>,
}

/// Render every non-blank data row of the sheet. Blank rows are passed
/// over without consuming an ordinal.
pub(crate) fn data_rows(sheet: &TabularSheet, schema: &FieldSchema) -> Result<Vec<SheetRow>> {
    let mut columns = Vec::with_capacity(schema.len());
    for field in &schema.fields {
        columns.push(field.column()?);
    }
    let Some(last_row) = sheet.last_row() else {
        return Ok(Vec::new());
    };

    let mut rows = Vec::new();
    let mut ordinal = 0u32;
    for row in schema.data_start_row..=last_row {
        if sheet.is_row_blank(row) {
            continue;
        }
        ordinal += 1;
        let values = columns
            .iter()
            .map(|&col| sheet.cell_text(row, col))
            .collect();
        rows.push(SheetRow {
            ordinal,
            sheet_row: row + 1,
            values,
        });
    }
    Ok(rows)
}

/// Judge every data row of the sheet against the bound policy without
/// touching storage.
pub(crate) fn validate_sheet(
    sheet: &TabularSheet,
    schema: &FieldSchema,
    policy: &EffectivePolicy,
) -> Result<FileValidationReport> {
    let mut report = FileValidationReport::new(policy.missing_columns().to_vec());
    for row in data_rows(sheet, schema)? {
        report.record(policy.validate_row(&row));
    }
    Ok(report)
}
