//! Streaming reader for the first worksheet of an XLSX package.
//!
//! Template discovery and batch ingestion only ever look at one sheet, so
//! the reader resolves the workbook's first `<sheet>` entry through the
//! relationship part and inflates just that worksheet plus the stylesheet
//! and shared strings it needs to decode values.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use zip::ZipArchive;

use tabula_model::{CellRef, MergedRange};

use crate::cell::{date_from_serial, CellScalar};
use crate::styles::{ResolvedStyle, Stylesheet};
use crate::XlsxError;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";

const EMPTY_CELL: CellScalar = CellScalar::Empty;

/// The first worksheet of a workbook, decoded into lookups keyed by
/// 0-based `(row, col)`.
///
/// Values live only at merged-region anchors; the other cells of a region
/// read back as [`CellScalar::Empty`]. Style indices are kept for every
/// styled cell, anchor or not, since template capture replays borders and
/// fills across whole regions.
#[derive(Debug)]
pub struct TabularSheet {
    pub name: String,
    pub merged: Vec<MergedRange>,
    pub stylesheet: Stylesheet,
    cells: BTreeMap<(u32, u32), CellScalar>,
    xfs: BTreeMap<(u32, u32), u32>,
    last_row: Option<u32>,
    last_col: Option<u32>,
}

impl TabularSheet {
    pub fn cell(&self, row: u32, col: u32) -> &CellScalar {
        self.cells.get(&(row, col)).unwrap_or(&EMPTY_CELL)
    }

    /// Canonical ingestion text of the cell, empty string when blank.
    pub fn cell_text(&self, row: u32, col: u32) -> String {
        self.cell(row, col).render()
    }

    /// Style table index recorded on the cell, 0 when unstyled.
    pub fn xf_of(&self, row: u32, col: u32) -> u32 {
        self.xfs.get(&(row, col)).copied().unwrap_or(0)
    }

    pub fn resolved_style(&self, row: u32, col: u32) -> ResolvedStyle {
        self.stylesheet.resolve(self.xf_of(row, col))
    }

    /// Anchor of the merged region covering `at`, if any.
    pub fn merged_anchor(&self, at: CellRef) -> Option<CellRef> {
        self.merged
            .iter()
            .find(|range| range.contains(at))
            .map(|range| range.anchor())
    }

    /// Whether every cell in the row is blank.
    pub fn is_row_blank(&self, row: u32) -> bool {
        self.cells
            .range((row, 0)..=(row, u32::MAX))
            .all(|(_, cell)| cell.is_blank())
    }

    /// Index of the last row holding a non-blank cell.
    pub fn last_row(&self) -> Option<u32> {
        self.last_row
    }

    /// Index of the rightmost column holding a non-blank cell.
    pub fn last_col(&self) -> Option<u32> {
        self.last_col
    }

    /// All stored cells of a row in column order.
    pub fn row_cells(&self, row: u32) -> impl Iterator<Item = (u32, &CellScalar)> {
        self.cells
            .range((row, 0)..=(row, u32::MAX))
            .map(|(&(_, col), cell)| (col, cell))
    }

    /// Index of the last column in `row` holding a value or an explicit
    /// style. Blank styled cells count, so header capture sees them.
    pub fn row_extent(&self, row: u32) -> Option<u32> {
        let valued = self
            .cells
            .range((row, 0)..=(row, u32::MAX))
            .map(|(&(_, col), _)| col)
            .max();
        let styled = self
            .xfs
            .range((row, 0)..=(row, u32::MAX))
            .map(|(&(_, col), _)| col)
            .max();
        valued.into_iter().chain(styled).max()
    }
}

pub fn read_sheet_from_path(path: impl AsRef<Path>) -> Result<TabularSheet, XlsxError> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    read_sheet_from_bytes(&bytes)
}

pub fn read_sheet_from_bytes(bytes: &[u8]) -> Result<TabularSheet, XlsxError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    let workbook_xml = read_zip_part_required(&mut archive, WORKBOOK_PART)?;
    let workbook_rels = read_zip_part_required(&mut archive, WORKBOOK_RELS_PART)?;

    let rels = parse_relationships(&workbook_rels)?;
    let (sheet_name, sheet_rel_id) = first_sheet(&workbook_xml)?;

    let sheet_part = rels
        .id_to_target
        .get(&sheet_rel_id)
        .map(|target| resolve_target(WORKBOOK_PART, target))
        .ok_or(XlsxError::NoWorksheet)?;
    let sheet_xml = read_zip_part_optional(&mut archive, &sheet_part)?
        .ok_or(XlsxError::MissingPart("worksheet"))?;

    let shared_strings = {
        let part = rels
            .shared_strings_target
            .as_deref()
            .map(|target| resolve_target(WORKBOOK_PART, target))
            .unwrap_or_else(|| "xl/sharedStrings.xml".to_string());
        match read_zip_part_optional(&mut archive, &part)? {
            Some(bytes) => parse_shared_strings(&bytes)?,
            None => Vec::new(),
        }
    };

    let stylesheet = {
        let part = rels
            .styles_target
            .as_deref()
            .map(|target| resolve_target(WORKBOOK_PART, target))
            .unwrap_or_else(|| "xl/styles.xml".to_string());
        match read_zip_part_optional(&mut archive, &part)? {
            Some(bytes) => Stylesheet::parse(std::str::from_utf8(&bytes)?)?,
            None => Stylesheet::default(),
        }
    };

    parse_worksheet(sheet_name, &sheet_xml, &shared_strings, stylesheet)
}

#[derive(Debug, Default)]
struct WorkbookRels {
    id_to_target: BTreeMap<String, String>,
    styles_target: Option<String>,
    shared_strings_target: Option<String>,
}

fn parse_relationships(bytes: &[u8]) -> Result<WorkbookRels, XlsxError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut rels = WorkbookRels::default();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                let mut id: Option<String> = None;
                let mut target: Option<String> = None;
                let mut type_: Option<String> = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"Id" => id = Some(attr.unescape_value()?.into_owned()),
                        b"Target" => target = Some(attr.unescape_value()?.into_owned()),
                        b"Type" => type_ = Some(attr.unescape_value()?.into_owned()),
                        _ => {}
                    }
                }
                let (Some(id), Some(target)) = (id, target) else {
                    continue;
                };
                match type_.as_deref() {
                    Some(t) if t.ends_with("/styles") => {
                        rels.styles_target = Some(target.clone());
                    }
                    Some(t) if t.ends_with("/sharedStrings") => {
                        rels.shared_strings_target = Some(target.clone());
                    }
                    _ => {}
                }
                rels.id_to_target.insert(id, target);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

/// Name and relationship id of the workbook's first `<sheet>` entry.
fn first_sheet(workbook_xml: &[u8]) -> Result<(String, String), XlsxError> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let mut name: Option<String> = None;
                let mut rel_id: Option<String> = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = attr.key.as_ref();
                    match key {
                        b"name" => name = Some(attr.unescape_value()?.into_owned()),
                        // `r:id` carries a namespace prefix.
                        _ if attr_local_name(key) == b"id" => {
                            rel_id = Some(attr.unescape_value()?.into_owned())
                        }
                        _ => {}
                    }
                }
                if let (Some(name), Some(rel_id)) = (name, rel_id) {
                    return Ok((name, rel_id));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Err(XlsxError::NoWorksheet)
}

fn parse_shared_strings(bytes: &[u8]) -> Result<Vec<String>, XlsxError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut table = Vec::new();
    let mut current: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"si" => {
                current = Some(String::new());
            }
            Event::Empty(e) if e.local_name().as_ref() == b"si" => {
                table.push(String::new());
                drop(e);
            }
            Event::Start(e) if current.is_some() && e.local_name().as_ref() == b"t" => {
                let text = read_text(&mut reader, b"t")?;
                if let Some(current) = current.as_mut() {
                    current.push_str(&text);
                }
            }
            // Phonetic runs annotate the string without being part of it.
            Event::Start(e)
                if current.is_some()
                    && matches!(e.local_name().as_ref(), b"rPh" | b"phoneticPr") =>
            {
                reader.read_to_end_into(e.name(), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"si" => {
                table.push(current.take().unwrap_or_default());
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(table)
}

fn parse_worksheet(
    name: String,
    sheet_xml: &[u8],
    shared_strings: &[String],
    stylesheet: Stylesheet,
) -> Result<TabularSheet, XlsxError> {
    let mut reader = Reader::from_reader(sheet_xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut cells: BTreeMap<(u32, u32), CellScalar> = BTreeMap::new();
    let mut xfs: BTreeMap<(u32, u32), u32> = BTreeMap::new();
    let mut merged: Vec<MergedRange> = Vec::new();

    let mut in_sheet_data = false;
    let mut current_ref: Option<CellRef> = None;
    let mut current_t: Option<String> = None;
    let mut current_style: u32 = 0;
    let mut current_value_text: Option<String> = None;
    let mut current_inline_text: Option<String> = None;
    let mut current_formula_text: Option<String> = None;
    let mut in_v = false;
    let mut in_f = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"sheetData" => in_sheet_data = true,
            Event::End(e) if e.local_name().as_ref() == b"sheetData" => in_sheet_data = false,
            Event::Empty(e) if e.local_name().as_ref() == b"sheetData" => {
                in_sheet_data = false;
                drop(e);
            }

            Event::Start(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                current_ref = None;
                current_t = None;
                current_style = 0;
                current_value_text = None;
                current_inline_text = None;
                current_formula_text = None;
                in_v = false;
                in_f = false;

                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"r" => {
                            let a1 = attr.unescape_value()?.into_owned();
                            current_ref = Some(
                                CellRef::from_a1(&a1)
                                    .map_err(|_| XlsxError::InvalidCellRef(a1))?,
                            );
                        }
                        b"t" => current_t = Some(attr.unescape_value()?.into_owned()),
                        b"s" => {
                            current_style =
                                attr.unescape_value()?.into_owned().parse().unwrap_or(0);
                        }
                        _ => {}
                    }
                }
            }
            Event::Empty(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                let mut cell_ref: Option<CellRef> = None;
                let mut style = 0u32;
                for attr in e.attributes() {
                    let attr = attr?;
                    match attr.key.as_ref() {
                        b"r" => {
                            let a1 = attr.unescape_value()?.into_owned();
                            cell_ref = Some(
                                CellRef::from_a1(&a1)
                                    .map_err(|_| XlsxError::InvalidCellRef(a1))?,
                            );
                        }
                        b"s" => {
                            style = attr.unescape_value()?.into_owned().parse().unwrap_or(0);
                        }
                        _ => {}
                    }
                }
                if let Some(cell_ref) = cell_ref {
                    if style != 0 {
                        xfs.insert((cell_ref.row, cell_ref.col), style);
                    }
                }
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"c" => {
                if let Some(cell_ref) = current_ref {
                    let scalar = interpret_cell_value(
                        current_t.as_deref(),
                        current_style,
                        &current_value_text,
                        &current_inline_text,
                        &current_formula_text,
                        shared_strings,
                        &stylesheet,
                    );
                    if current_style != 0 {
                        xfs.insert((cell_ref.row, cell_ref.col), current_style);
                    }
                    if scalar != CellScalar::Empty {
                        cells.insert((cell_ref.row, cell_ref.col), scalar);
                    }
                }
                current_ref = None;
                current_t = None;
                current_style = 0;
                current_value_text = None;
                current_inline_text = None;
                current_formula_text = None;
                in_v = false;
                in_f = false;
            }

            Event::Start(e)
                if in_sheet_data && current_ref.is_some() && e.local_name().as_ref() == b"v" =>
            {
                in_v = true;
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"v" => in_v = false,
            Event::Start(e)
                if in_sheet_data && current_ref.is_some() && e.local_name().as_ref() == b"f" =>
            {
                in_f = true;
            }
            Event::End(e) if in_sheet_data && e.local_name().as_ref() == b"f" => in_f = false,
            Event::Text(e) if in_sheet_data && in_v => {
                current_value_text = Some(e.unescape()?.into_owned());
            }
            Event::Text(e) if in_sheet_data && in_f => {
                current_formula_text = Some(e.unescape()?.into_owned());
            }

            Event::Start(e)
                if in_sheet_data
                    && current_ref.is_some()
                    && current_t.as_deref() == Some("inlineStr")
                    && e.local_name().as_ref() == b"is" =>
            {
                current_inline_text = Some(parse_inline_is_text(&mut reader)?);
            }
            Event::Empty(e)
                if in_sheet_data
                    && current_ref.is_some()
                    && current_t.as_deref() == Some("inlineStr")
                    && e.local_name().as_ref() == b"is" =>
            {
                current_inline_text = Some(String::new());
            }

            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"mergeCell" => {
                for attr in e.attributes() {
                    let attr = attr?;
                    if attr.key.as_ref() == b"ref" {
                        let a1 = attr.unescape_value()?.into_owned();
                        merged.push(
                            MergedRange::from_a1(&a1)
                                .map_err(|_| XlsxError::InvalidRangeRef(a1))?,
                        );
                    }
                }
            }

            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    // `mergeCells` follows `sheetData` in the part, so anchor-only storage
    // is enforced after the walk: values off the anchor are dropped while
    // their style indices stay for region-wide style capture.
    for range in &merged {
        let anchor = range.anchor();
        for row in range.start.row..=range.end.row {
            for col in range.start.col..=range.end.col {
                if (row, col) != (anchor.row, anchor.col) {
                    cells.remove(&(row, col));
                }
            }
        }
    }

    let last_row = cells
        .iter()
        .filter(|(_, cell)| !cell.is_blank())
        .map(|(&(row, _), _)| row)
        .max();
    let last_col = cells
        .iter()
        .filter(|(_, cell)| !cell.is_blank())
        .map(|(&(_, col), _)| col)
        .max();

    Ok(TabularSheet {
        name,
        merged,
        stylesheet,
        cells,
        xfs,
        last_row,
        last_col,
    })
}

fn interpret_cell_value(
    t: Option<&str>,
    style: u32,
    v_text: &Option<String>,
    inline_text: &Option<String>,
    formula_text: &Option<String>,
    shared_strings: &[String],
    stylesheet: &Stylesheet,
) -> CellScalar {
    let scalar = match t {
        Some("s") => v_text
            .as_deref()
            .and_then(|idx| idx.trim().parse::<usize>().ok())
            .and_then(|idx| shared_strings.get(idx))
            .map(|s| CellScalar::Text(s.clone()))
            .unwrap_or(CellScalar::Empty),
        Some("inlineStr") => inline_text
            .clone()
            .map(CellScalar::Text)
            .unwrap_or(CellScalar::Empty),
        Some("str") => v_text
            .clone()
            .map(CellScalar::Text)
            .unwrap_or(CellScalar::Empty),
        Some("b") => match v_text.as_deref().map(str::trim) {
            Some(raw) => CellScalar::Bool(raw == "1"),
            None => CellScalar::Empty,
        },
        Some("e") => v_text
            .clone()
            .map(CellScalar::Error)
            .unwrap_or(CellScalar::Empty),
        // `n` and untyped cells are numbers; a date format turns the
        // serial into a timestamp, everything else keeps the raw text.
        _ => match v_text.as_deref() {
            Some(raw) => {
                if stylesheet.is_date_xf(style) {
                    match raw.trim().parse::<f64>().ok().and_then(date_from_serial) {
                        Some(dt) => CellScalar::Date(dt),
                        None => CellScalar::Number(raw.to_string()),
                    }
                } else {
                    CellScalar::Number(raw.to_string())
                }
            }
            None => CellScalar::Empty,
        },
    };

    // A formula cell with no cached result still shows its source text, so
    // ingestion sees something rather than silently dropping the cell.
    if scalar == CellScalar::Empty {
        if let Some(formula) = formula_text {
            return CellScalar::Text(formula.clone());
        }
    }
    scalar
}

fn parse_inline_is_text(reader: &mut Reader<&[u8]>) -> Result<String, XlsxError> {
    let mut buf = Vec::new();
    let mut out = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                out.push_str(&read_text(reader, b"t")?);
            }
            Event::Start(e) if e.local_name().as_ref() == b"r" => {
                out.push_str(&parse_inline_r_text(reader)?);
            }
            Event::Start(e) => {
                reader.read_to_end_into(e.name(), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"is" => break,
            Event::Eof => {
                return Err(XlsxError::Invalid(
                    "unexpected EOF while parsing inline string <is>".to_string(),
                ))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn parse_inline_r_text(reader: &mut Reader<&[u8]>) -> Result<String, XlsxError> {
    let mut buf = Vec::new();
    let mut out = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => {
                out.push_str(&read_text(reader, b"t")?);
            }
            Event::Start(e) => {
                reader.read_to_end_into(e.name(), &mut Vec::new())?;
            }
            Event::End(e) if e.local_name().as_ref() == b"r" => break,
            Event::Eof => {
                return Err(XlsxError::Invalid(
                    "unexpected EOF while parsing inline string <r>".to_string(),
                ))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn read_text(reader: &mut Reader<&[u8]>, end_local: &[u8]) -> Result<String, XlsxError> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(e) => text.push_str(&e.unescape()?.into_owned()),
            Event::CData(e) => text.push_str(std::str::from_utf8(e.as_ref())?),
            Event::End(e) if e.local_name().as_ref() == end_local => break,
            Event::Eof => {
                return Err(XlsxError::Invalid(
                    "unexpected EOF while parsing <t>".to_string(),
                ))
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

fn read_zip_part_required<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &'static str,
) -> Result<Vec<u8>, XlsxError> {
    read_zip_part_optional(archive, name)?.ok_or(XlsxError::MissingPart(name))
}

fn read_zip_part_optional<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>, XlsxError> {
    match archive.by_name(name) {
        Ok(mut file) => {
            if file.is_dir() {
                return Ok(None);
            }
            let mut buf = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn attr_local_name(name: &[u8]) -> &[u8] {
    match name.iter().rposition(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

/// Resolves a relationship target against the part that declared it.
fn resolve_target(source_part: &str, target: &str) -> String {
    let target = target.split('#').next().unwrap_or(target);
    if let Some(target) = target.strip_prefix('/') {
        return normalize(target);
    }
    let base_dir = source_part.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
    normalize(&format!("{base_dir}/{target}"))
}

fn normalize(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out.join("/")
}
