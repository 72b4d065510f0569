//! From-scratch writer for single-sheet workbooks.
//!
//! Export never patches an uploaded package; it synthesizes the whole part
//! set. Text lands as inline strings so no shared-string table is needed,
//! and numbers are written as bare `<v>` text, which keeps exported values
//! byte-identical to what ingestion stored.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};

use zip::write::FileOptions;

use tabula_model::{CellRef, MergedRange};

use crate::styles::ResolvedStyle;
use crate::XlsxError;

#[derive(Debug, Clone, PartialEq)]
pub enum WriteCell {
    Text(String),
    Number(String),
    Bool(bool),
}

/// Accumulates cells, merges, and interned styles, then serializes them as
/// a complete XLSX package.
#[derive(Debug)]
pub struct SheetWriter {
    sheet_name: String,
    rows: BTreeMap<u32, BTreeMap<u32, (WriteCell, u32)>>,
    merges: Vec<MergedRange>,
    /// Registered styles; xf index is position + 1, index 0 is the default.
    styles: Vec<ResolvedStyle>,
    style_ids: HashMap<ResolvedStyle, u32>,
}

impl SheetWriter {
    pub fn new(sheet_name: impl Into<String>) -> SheetWriter {
        SheetWriter {
            sheet_name: sheet_name.into(),
            rows: BTreeMap::new(),
            merges: Vec::new(),
            styles: Vec::new(),
            style_ids: HashMap::new(),
        }
    }

    /// Interns a style and returns its xf index.
    ///
    /// The plain style is always index 0; identical definitions share one
    /// index no matter how many cells reference them.
    pub fn register_style(&mut self, style: &ResolvedStyle) -> u32 {
        if style.is_plain() {
            return 0;
        }
        if let Some(&id) = self.style_ids.get(style) {
            return id;
        }
        self.styles.push(style.clone());
        let id = self.styles.len() as u32;
        self.style_ids.insert(style.clone(), id);
        id
    }

    pub fn set_cell(&mut self, row: u32, col: u32, cell: WriteCell, style_id: u32) {
        self.rows
            .entry(row)
            .or_default()
            .insert(col, (cell, style_id));
    }

    pub fn set_text(&mut self, row: u32, col: u32, text: impl Into<String>) {
        self.set_cell(row, col, WriteCell::Text(text.into()), 0);
    }

    pub fn set_text_styled(&mut self, row: u32, col: u32, text: impl Into<String>, style_id: u32) {
        self.set_cell(row, col, WriteCell::Text(text.into()), style_id);
    }

    pub fn set_number(&mut self, row: u32, col: u32, text: impl Into<String>) {
        self.set_cell(row, col, WriteCell::Number(text.into()), 0);
    }

    pub fn set_bool(&mut self, row: u32, col: u32, value: bool) {
        self.set_cell(row, col, WriteCell::Bool(value), 0);
    }

    pub fn merge(&mut self, range: MergedRange) {
        self.merges.push(range);
    }

    pub fn finish(self) -> Result<Vec<u8>, XlsxError> {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buffer);
            let options =
                FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);

            zip.start_file("[Content_Types].xml", options)?;
            zip.write_all(CONTENT_TYPES_XML.as_bytes())?;

            zip.start_file("_rels/.rels", options)?;
            zip.write_all(ROOT_RELS_XML.as_bytes())?;

            zip.start_file("xl/workbook.xml", options)?;
            zip.write_all(self.workbook_xml().as_bytes())?;

            zip.start_file("xl/_rels/workbook.xml.rels", options)?;
            zip.write_all(WORKBOOK_RELS_XML.as_bytes())?;

            zip.start_file("xl/styles.xml", options)?;
            zip.write_all(self.styles_xml().as_bytes())?;

            zip.start_file("xl/worksheets/sheet1.xml", options)?;
            zip.write_all(self.worksheet_xml().as_bytes())?;

            zip.finish()?;
        }
        Ok(buffer.into_inner())
    }

    fn workbook_xml(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
                r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main""#,
                r#" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
                r#"<sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets></workbook>"#
            ),
            escape_attr(&self.sheet_name)
        )
    }

    fn styles_xml(&self) -> String {
        // Custom number formats get ids from 164 up, one per distinct code.
        let mut num_fmt_ids: HashMap<&str, u32> = HashMap::new();
        let mut num_fmts: Vec<(u32, &str)> = Vec::new();
        for style in &self.styles {
            if let Some(code) = style.num_fmt.as_deref() {
                if !num_fmt_ids.contains_key(code) {
                    let id = 164 + num_fmts.len() as u32;
                    num_fmt_ids.insert(code, id);
                    num_fmts.push((id, code));
                }
            }
        }

        type FontKey = (Option<String>, Option<u16>, bool);
        let mut font_ids: HashMap<FontKey, u32> = HashMap::new();
        let mut fonts: Vec<FontKey> = vec![(None, None, false)];
        font_ids.insert((None, None, false), 0);

        let mut fill_ids: HashMap<String, u32> = HashMap::new();
        let mut fills: Vec<Option<String>> = vec![None, None];

        type BorderKey = (bool, bool, bool, bool);
        let mut border_ids: HashMap<BorderKey, u32> = HashMap::new();
        let mut borders: Vec<BorderKey> = vec![(false, false, false, false)];
        border_ids.insert((false, false, false, false), 0);

        let mut xfs: Vec<String> = Vec::new();
        for style in &self.styles {
            let font_key = (style.font_name.clone(), style.font_size_100pt, style.bold);
            let font_id = *font_ids.entry(font_key.clone()).or_insert_with(|| {
                fonts.push(font_key);
                (fonts.len() - 1) as u32
            });

            let fill_id = match style.fill_rgb.as_deref() {
                Some(rgb) => *fill_ids.entry(rgb.to_string()).or_insert_with(|| {
                    fills.push(Some(rgb.to_string()));
                    (fills.len() - 1) as u32
                }),
                None => 0,
            };

            let border_key = (
                style.border_left,
                style.border_right,
                style.border_top,
                style.border_bottom,
            );
            let border_id = *border_ids.entry(border_key).or_insert_with(|| {
                borders.push(border_key);
                (borders.len() - 1) as u32
            });

            let num_fmt_id = style
                .num_fmt
                .as_deref()
                .and_then(|code| num_fmt_ids.get(code).copied())
                .unwrap_or(0);

            let mut xf = String::new();
            xf.push_str(&format!(
                r#"<xf numFmtId="{num_fmt_id}" fontId="{font_id}" fillId="{fill_id}" borderId="{border_id}" xfId="0""#
            ));
            if num_fmt_id != 0 {
                xf.push_str(r#" applyNumberFormat="1""#);
            }
            if font_id != 0 {
                xf.push_str(r#" applyFont="1""#);
            }
            if fill_id != 0 {
                xf.push_str(r#" applyFill="1""#);
            }
            if border_id != 0 {
                xf.push_str(r#" applyBorder="1""#);
            }
            if style.h_align.is_some() || style.v_align.is_some() {
                xf.push_str(r#" applyAlignment="1">"#);
                xf.push_str("<alignment");
                if let Some(h) = &style.h_align {
                    xf.push_str(&format!(r#" horizontal="{}""#, escape_attr(h)));
                }
                if let Some(v) = &style.v_align {
                    xf.push_str(&format!(r#" vertical="{}""#, escape_attr(v)));
                }
                xf.push_str("/></xf>");
            } else {
                xf.push_str("/>");
            }
            xfs.push(xf);
        }

        let mut out = String::new();
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        out.push_str(
            r#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        );

        if !num_fmts.is_empty() {
            out.push_str(&format!(r#"<numFmts count="{}">"#, num_fmts.len()));
            for (id, code) in &num_fmts {
                out.push_str(&format!(
                    r#"<numFmt numFmtId="{id}" formatCode="{}"/>"#,
                    escape_attr(code)
                ));
            }
            out.push_str("</numFmts>");
        }

        out.push_str(&format!(r#"<fonts count="{}">"#, fonts.len()));
        for (name, size, bold) in &fonts {
            out.push_str("<font>");
            if *bold {
                out.push_str("<b/>");
            }
            match size {
                Some(size) => {
                    out.push_str(&format!(r#"<sz val="{:.2}"/>"#, *size as f32 / 100.0))
                }
                None => out.push_str(r#"<sz val="11"/>"#),
            }
            match name {
                Some(name) => {
                    out.push_str(&format!(r#"<name val="{}"/>"#, escape_attr(name)))
                }
                None => out.push_str(r#"<name val="Calibri"/>"#),
            }
            out.push_str("</font>");
        }
        out.push_str("</fonts>");

        out.push_str(&format!(r#"<fills count="{}">"#, fills.len()));
        out.push_str(r#"<fill><patternFill patternType="none"/></fill>"#);
        out.push_str(r#"<fill><patternFill patternType="gray125"/></fill>"#);
        for rgb in fills.iter().skip(2).flatten() {
            out.push_str(&format!(
                r#"<fill><patternFill patternType="solid"><fgColor rgb="{}"/><bgColor indexed="64"/></patternFill></fill>"#,
                escape_attr(rgb)
            ));
        }
        out.push_str("</fills>");

        out.push_str(&format!(r#"<borders count="{}">"#, borders.len()));
        for (left, right, top, bottom) in &borders {
            out.push_str("<border>");
            for (edge, present) in [
                ("left", left),
                ("right", right),
                ("top", top),
                ("bottom", bottom),
            ] {
                if *present {
                    out.push_str(&format!(r#"<{edge} style="thin"/>"#));
                } else {
                    out.push_str(&format!("<{edge}/>"));
                }
            }
            out.push_str("<diagonal/></border>");
        }
        out.push_str("</borders>");

        out.push_str(
            r#"<cellStyleXfs count="1"><xf numFmtId="0" fontId="0" fillId="0" borderId="0"/></cellStyleXfs>"#,
        );

        out.push_str(&format!(r#"<cellXfs count="{}">"#, xfs.len() + 1));
        out.push_str(r#"<xf numFmtId="0" fontId="0" fillId="0" borderId="0" xfId="0"/>"#);
        for xf in &xfs {
            out.push_str(xf);
        }
        out.push_str("</cellXfs>");

        out.push_str(r#"<cellStyles count="1"><cellStyle name="Normal" xfId="0" builtinId="0"/></cellStyles>"#);
        out.push_str("</styleSheet>");
        out
    }

    fn worksheet_xml(&self) -> String {
        let mut out = String::new();
        out.push_str(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#);
        out.push_str(
            r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        );

        let dimension = self.dimension();
        out.push_str(&format!(r#"<dimension ref="{dimension}"/>"#));

        out.push_str("<sheetData>");
        for (&row, cells) in &self.rows {
            out.push_str(&format!(r#"<row r="{}">"#, row + 1));
            for (&col, (cell, style_id)) in cells {
                let a1 = CellRef::new(row, col).to_a1();
                match cell {
                    WriteCell::Text(text) => {
                        out.push_str(&format!(r#"<c r="{a1}""#));
                        if *style_id != 0 {
                            out.push_str(&format!(r#" s="{style_id}""#));
                        }
                        out.push_str(r#" t="inlineStr"><is><t"#);
                        if needs_space_preserve(text) {
                            out.push_str(r#" xml:space="preserve""#);
                        }
                        out.push('>');
                        out.push_str(&escape_text(text));
                        out.push_str("</t></is></c>");
                    }
                    WriteCell::Number(raw) => {
                        out.push_str(&format!(r#"<c r="{a1}""#));
                        if *style_id != 0 {
                            out.push_str(&format!(r#" s="{style_id}""#));
                        }
                        out.push_str("><v>");
                        out.push_str(&escape_text(raw));
                        out.push_str("</v></c>");
                    }
                    WriteCell::Bool(value) => {
                        out.push_str(&format!(r#"<c r="{a1}""#));
                        if *style_id != 0 {
                            out.push_str(&format!(r#" s="{style_id}""#));
                        }
                        out.push_str(r#" t="b"><v>"#);
                        out.push_str(if *value { "1" } else { "0" });
                        out.push_str("</v></c>");
                    }
                }
            }
            out.push_str("</row>");
        }
        out.push_str("</sheetData>");

        if !self.merges.is_empty() {
            out.push_str(&format!(r#"<mergeCells count="{}">"#, self.merges.len()));
            for merge in &self.merges {
                out.push_str(&format!(r#"<mergeCell ref="{merge}"/>"#));
            }
            out.push_str("</mergeCells>");
        }

        out.push_str("</worksheet>");
        out
    }

    fn dimension(&self) -> String {
        let mut min: Option<(u32, u32)> = None;
        let mut max: Option<(u32, u32)> = None;
        for (&row, cells) in &self.rows {
            for &col in cells.keys() {
                let (min_row, min_col) = min.unwrap_or((row, col));
                min = Some((min_row.min(row), min_col.min(col)));
                let (max_row, max_col) = max.unwrap_or((row, col));
                max = Some((max_row.max(row), max_col.max(col)));
            }
        }
        match (min, max) {
            (Some((r0, c0)), Some((r1, c1))) => {
                let start = CellRef::new(r0, c0).to_a1();
                let end = CellRef::new(r1, c1).to_a1();
                if start == end {
                    start
                } else {
                    format!("{start}:{end}")
                }
            }
            _ => "A1".to_string(),
        }
    }
}

const CONTENT_TYPES_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
    r#"<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>"#,
    r#"<Default Extension="xml" ContentType="application/xml"/>"#,
    r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    r#"<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
    r#"<Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/>"#,
    r#"</Types>"#
);

const ROOT_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>"#,
    r#"</Relationships>"#
);

const WORKBOOK_RELS_XML: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>"#,
    r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
    r#"</Relationships>"#
);

fn needs_space_preserve(s: &str) -> bool {
    s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace)
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s)
        .replace('\"', "&quot;")
        .replace('\'', "&apos;")
}
