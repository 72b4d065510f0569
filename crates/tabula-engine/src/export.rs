//! Export projection: stored records written back into a workbook shaped
//! like the template they came from.
//!
//! The header band replays the capture taken at template import. When a
//! template carries no capture (legacy rows, or imports that predate
//! capture), a plain two-part header is synthesized from the schema so
//! the file still opens looking like a template.

use std::collections::HashMap;

use tabula_model::{
    normalize_decimal, CellRef, DataRecord, FieldSchema, FieldType, FieldValue, MergedRange,
};
use tabula_storage::StyleCell;
use tabula_xlsx::{ResolvedStyle, SheetWriter};

use crate::error::Result;

/// Grey band behind synthesized label rows.
const LABEL_FILL_ARGB: &str = "FFC0C0C0";

pub(crate) fn write_workbook(
    sheet_name: &str,
    schema: &FieldSchema,
    header: &[StyleCell],
    merges: &[MergedRange],
    records: &[(DataRecord, Vec<FieldValue>)],
) -> Result<Vec<u8>> {
    let mut columns = Vec::with_capacity(schema.len());
    for field in &schema.fields {
        columns.push(field.column()?);
    }

    let mut writer = SheetWriter::new(sheet_name);
    if header.is_empty() {
        synthesize_header(&mut writer, sheet_name, schema, &columns);
    } else {
        replay_header(&mut writer, header, merges);
    }

    let mut row = schema.data_start_row;
    for (_, values) in records {
        let by_key: HashMap<&str, &FieldValue> = values
            .iter()
            .map(|value| (value.storage_key.as_str(), value))
            .collect();
        for (i, field) in schema.fields.iter().enumerate() {
            let Some(value) = by_key.get(field.storage_key.as_str()) else {
                continue;
            };
            if value.value.is_empty() {
                continue;
            }
            write_value(&mut writer, row, columns[i], field.field_type, &value.value);
        }
        row += 1;
    }

    Ok(writer.finish()?)
}

/// Numbers round-trip as numeric cells when the stored text still parses
/// as one; everything else stays text.
fn write_value(writer: &mut SheetWriter, row: u32, col: u32, field_type: FieldType, raw: &str) {
    match field_type {
        FieldType::Number => match normalize_decimal(raw) {
            Some(plain) => writer.set_number(row, col, plain),
            None => writer.set_text(row, col, raw),
        },
        _ => writer.set_text(row, col, raw),
    }
}

fn replay_header(writer: &mut SheetWriter, header: &[StyleCell], merges: &[MergedRange]) {
    let mut seen: Vec<MergedRange> = Vec::new();
    for merge in merges {
        if !seen.contains(merge) {
            seen.push(*merge);
            writer.merge(*merge);
        }
    }
    for cell in header {
        let style = match serde_json::from_value::<ResolvedStyle>(cell.style.clone()) {
            Ok(style) => style,
            Err(err) => {
                log::warn!(
                    "stored style at ({}, {}) not decodable, replaying plain: {err}",
                    cell.row,
                    cell.col
                );
                ResolvedStyle::default()
            }
        };
        let style_id = writer.register_style(&style);
        writer.set_text_styled(cell.row, cell.col, cell.value.clone(), style_id);
    }
}

/// Two-part fallback header: a merged title row and a bordered label row
/// at the bottom of the band. A one-row band has no room for the title,
/// so only the labels go out.
fn synthesize_header(writer: &mut SheetWriter, title: &str, schema: &FieldSchema, columns: &[u32]) {
    let width = schema.width().max(1);
    let label_row = schema.header_rows.saturating_sub(1);

    if label_row > 0 {
        let title_style = writer.register_style(&ResolvedStyle {
            font_size_100pt: Some(1600),
            bold: true,
            h_align: Some("center".to_string()),
            v_align: Some("center".to_string()),
            ..ResolvedStyle::default()
        });
        writer.set_text_styled(0, 0, title, title_style);
        if width > 1 {
            writer.merge(MergedRange::new(
                CellRef::new(0, 0),
                CellRef::new(0, width - 1),
            ));
        }
    }
    let label_style = writer.register_style(&ResolvedStyle {
        bold: true,
        fill_rgb: Some(LABEL_FILL_ARGB.to_string()),
        border_left: true,
        border_right: true,
        border_top: true,
        border_bottom: true,
        h_align: Some("center".to_string()),
        v_align: Some("center".to_string()),
        ..ResolvedStyle::default()
    });
    for (field, &col) in schema.fields.iter().zip(columns) {
        writer.set_text_styled(label_row, col, field.label.clone(), label_style);
    }
}
