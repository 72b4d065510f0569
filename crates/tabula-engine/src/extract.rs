//! Schema discovery and header capture from template workbooks.
//!
//! A template's header band defines the organization's schema: one entry
//! per physical column, labeled from the header text. The band itself is
//! captured cell by cell so exports can replay it pixel-for-pixel later.

use uuid::Uuid;

use tabula_model::{CellRef, MergedRange, SchemaField};
use tabula_storage::StyleCell;
use tabula_xlsx::TabularSheet;

use crate::error::Result;

/// Derive one schema entry per physical column under the header band.
///
/// The column count is the widest of the header rows, so bands where the
/// title row outspans the label row still cover every column.
pub fn extract_schema(
    sheet: &TabularSheet,
    template_id: Uuid,
    header_rows: u32,
) -> Vec<SchemaField> {
    let Some(width) = header_width(sheet, header_rows) else {
        return Vec::new();
    };
    let last_header = header_rows.saturating_sub(1);

    let mut fields = Vec::with_capacity(width as usize);
    for col in 0..width {
        let label = column_label(sheet, last_header, col)
            .unwrap_or_else(|| format!("field_{}", col + 1));
        fields.push(SchemaField::derive(template_id, label, col, col));
    }
    fields
}

/// Columns spanned by the header band: the widest extent over its rows,
/// merged regions included, so a label merged past the last stored cell
/// still counts.
fn header_width(sheet: &TabularSheet, header_rows: u32) -> Option<u32> {
    let stored = (0..header_rows)
        .filter_map(|row| sheet.row_extent(row))
        .max();
    let merged = sheet
        .merged
        .iter()
        .filter(|range| range.start.row < header_rows)
        .map(|range| range.end.col)
        .max();
    stored.into_iter().chain(merged).max().map(|last| last + 1)
}

/// Label of one column.
///
/// Candidates in order: the cell on the last header row, the anchor of
/// the merged region covering it, then a plain upward scan through the
/// rows above. `None` when every candidate is blank.
fn column_label(sheet: &TabularSheet, last_header: u32, col: u32) -> Option<String> {
    let direct = normalize_label(&sheet.cell_text(last_header, col));
    if !direct.is_empty() {
        return Some(direct);
    }
    if let Some(anchor) = sheet.merged_anchor(CellRef::new(last_header, col)) {
        let merged = normalize_label(&sheet.cell_text(anchor.row, anchor.col));
        if !merged.is_empty() {
            return Some(merged);
        }
    }
    for row in (0..last_header).rev() {
        let above = normalize_label(&sheet.cell_text(row, col));
        if !above.is_empty() {
            return Some(above);
        }
    }
    None
}

/// Collapse whitespace runs, newlines included, to single spaces and trim.
fn normalize_label(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Capture the header band for later replay: every cell of the rows above
/// the data cut that holds a value or a style, plus the merged regions
/// anchored in the band.
pub fn capture_header(
    sheet: &TabularSheet,
    data_start_row: u32,
) -> Result<(Vec<StyleCell>, Vec<MergedRange>)> {
    let mut styles = Vec::new();
    for row in 0..data_start_row {
        let Some(extent) = sheet.row_extent(row) else {
            continue;
        };
        for col in 0..=extent {
            let value = sheet.cell_text(row, col);
            let resolved = sheet.resolved_style(row, col);
            if value.is_empty() && resolved.is_plain() {
                continue;
            }
            styles.push(StyleCell {
                row,
                col,
                value,
                style: serde_json::to_value(&resolved)?,
            });
        }
    }
    let merges = sheet
        .merged
        .iter()
        .copied()
        .filter(|range| range.start.row < data_start_row)
        .collect();
    Ok((styles, merges))
}
