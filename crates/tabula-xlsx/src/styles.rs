//! Stylesheet (`xl/styles.xml`) parsing and date-format detection.
//!
//! Only the slice of the stylesheet that template capture and export replay
//! care about is modeled: fonts (name, size, bold), solid fills, border
//! presence per edge, alignment, and number formats. Everything else in the
//! part is ignored.

use std::collections::HashMap;

use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::XlsxError;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FontSpec {
    pub name: Option<String>,
    /// Size in hundredths of a point; 1100 is the common 11pt default.
    pub size_100pt: Option<u16>,
    pub bold: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillSpec {
    /// ARGB hex of a solid fill, absent for `none`/pattern fills.
    pub solid_rgb: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BorderSpec {
    pub left: bool,
    pub right: bool,
    pub top: bool,
    pub bottom: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XfSpec {
    pub font_id: u32,
    pub fill_id: u32,
    pub border_id: u32,
    pub num_fmt_id: u32,
    pub h_align: Option<String>,
    pub v_align: Option<String>,
}

/// A cell format with all stylesheet indirection flattened away.
///
/// This is the shape captured per template cell and replayed on export, so
/// it serializes to JSON for storage. `Eq`/`Hash` let the writer intern
/// identical definitions into one xf.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolvedStyle {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub font_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub font_size_100pt: Option<u16>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub bold: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fill_rgb: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub border_left: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub border_right: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub border_top: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub border_bottom: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub h_align: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub v_align: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub num_fmt: Option<String>,
}

impl ResolvedStyle {
    pub fn is_plain(&self) -> bool {
        *self == ResolvedStyle::default()
    }
}

/// Parsed `xl/styles.xml`, indexed the way cell `s` attributes index it.
#[derive(Debug, Clone)]
pub struct Stylesheet {
    pub num_fmts: HashMap<u32, String>,
    pub fonts: Vec<FontSpec>,
    pub fills: Vec<FillSpec>,
    pub borders: Vec<BorderSpec>,
    pub cell_xfs: Vec<XfSpec>,
}

impl Default for Stylesheet {
    fn default() -> Self {
        Stylesheet {
            num_fmts: HashMap::new(),
            fonts: vec![FontSpec::default()],
            fills: vec![FillSpec::default()],
            borders: vec![BorderSpec::default()],
            cell_xfs: vec![XfSpec::default()],
        }
    }
}

impl Stylesheet {
    pub fn parse(xml: &str) -> Result<Stylesheet, XlsxError> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();

        let mut sheet = Stylesheet {
            num_fmts: HashMap::new(),
            fonts: Vec::new(),
            fills: Vec::new(),
            borders: Vec::new(),
            cell_xfs: Vec::new(),
        };

        if let Some(num_fmts) = child(&root, "numFmts") {
            for fmt in element_children(&num_fmts, "numFmt") {
                let id = fmt.attribute("numFmtId").and_then(|v| v.parse::<u32>().ok());
                let code = fmt.attribute("formatCode");
                if let (Some(id), Some(code)) = (id, code) {
                    sheet.num_fmts.insert(id, code.to_string());
                }
            }
        }

        if let Some(fonts) = child(&root, "fonts") {
            for font in element_children(&fonts, "font") {
                sheet.fonts.push(parse_font(&font));
            }
        }
        if sheet.fonts.is_empty() {
            sheet.fonts.push(FontSpec::default());
        }
        // Normalize fonts against index 0 so resolved styles carry only
        // deltas from the workbook default; a cell in the default font
        // resolves to the plain style no matter what that default is.
        let base = sheet.fonts[0].clone();
        for font in &mut sheet.fonts {
            if font.name == base.name {
                font.name = None;
            }
            if font.size_100pt == base.size_100pt {
                font.size_100pt = None;
            }
        }

        if let Some(fills) = child(&root, "fills") {
            for fill in element_children(&fills, "fill") {
                sheet.fills.push(parse_fill(&fill));
            }
        }
        if sheet.fills.is_empty() {
            sheet.fills.push(FillSpec::default());
        }

        if let Some(borders) = child(&root, "borders") {
            for border in element_children(&borders, "border") {
                sheet.borders.push(parse_border(&border));
            }
        }
        if sheet.borders.is_empty() {
            sheet.borders.push(BorderSpec::default());
        }

        if let Some(xfs) = child(&root, "cellXfs") {
            for xf in element_children(&xfs, "xf") {
                sheet.cell_xfs.push(parse_xf(&xf));
            }
        }
        if sheet.cell_xfs.is_empty() {
            sheet.cell_xfs.push(XfSpec::default());
        }

        Ok(sheet)
    }

    /// Flattens the xf at `xf_id` into a [`ResolvedStyle`].
    ///
    /// Out-of-range ids resolve to the plain style rather than erroring;
    /// real files reference missing table entries often enough that hard
    /// failure would reject otherwise usable uploads.
    pub fn resolve(&self, xf_id: u32) -> ResolvedStyle {
        let Some(xf) = self.cell_xfs.get(xf_id as usize) else {
            return ResolvedStyle::default();
        };
        let font = self.fonts.get(xf.font_id as usize);
        let fill = self.fills.get(xf.fill_id as usize);
        let border = self.borders.get(xf.border_id as usize);

        ResolvedStyle {
            font_name: font.and_then(|f| f.name.clone()),
            font_size_100pt: font.and_then(|f| f.size_100pt),
            bold: font.is_some_and(|f| f.bold),
            fill_rgb: fill.and_then(|f| f.solid_rgb.clone()),
            border_left: border.is_some_and(|b| b.left),
            border_right: border.is_some_and(|b| b.right),
            border_top: border.is_some_and(|b| b.top),
            border_bottom: border.is_some_and(|b| b.bottom),
            h_align: xf.h_align.clone(),
            v_align: xf.v_align.clone(),
            num_fmt: self.num_fmt_code(xf.num_fmt_id),
        }
    }

    /// Whether the xf at `xf_id` formats numbers as dates.
    pub fn is_date_xf(&self, xf_id: u32) -> bool {
        let Some(xf) = self.cell_xfs.get(xf_id as usize) else {
            return false;
        };
        self.is_date_format(xf.num_fmt_id)
    }

    fn num_fmt_code(&self, num_fmt_id: u32) -> Option<String> {
        if num_fmt_id == 0 {
            return None;
        }
        self.num_fmts.get(&num_fmt_id).cloned()
    }

    fn is_date_format(&self, num_fmt_id: u32) -> bool {
        if is_builtin_date_format(num_fmt_id) {
            return true;
        }
        match self.num_fmts.get(&num_fmt_id) {
            Some(code) => format_code_is_datelike(code),
            None => false,
        }
    }
}

/// Builtin number-format ids that Excel renders as dates or times.
fn is_builtin_date_format(id: u32) -> bool {
    matches!(id, 14..=22 | 27..=36 | 45..=47 | 50..=58)
}

/// Heuristic for custom format codes: after stripping color/condition
/// blocks, quoted literals, and escaped characters, any remaining
/// y/m/d/h/s token means the format is date-like.
fn format_code_is_datelike(code: &str) -> bool {
    let mut stripped = String::with_capacity(code.len());
    let mut chars = code.chars();
    while let Some(c) = chars.next() {
        match c {
            '[' => {
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                }
            }
            '"' => {
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                }
            }
            '\\' => {
                let _ = chars.next();
            }
            _ => stripped.push(c.to_ascii_lowercase()),
        }
    }
    stripped
        .chars()
        .any(|c| matches!(c, 'y' | 'm' | 'd' | 'h' | 's'))
}

fn child<'a>(node: &Node<'a, 'a>, name: &str) -> Option<Node<'a, 'a>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn element_children<'a>(node: &Node<'a, 'a>, name: &'a str) -> impl Iterator<Item = Node<'a, 'a>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn parse_font(el: &Node<'_, '_>) -> FontSpec {
    let name = child(el, "name")
        .and_then(|n| n.attribute("val"))
        .map(str::to_string);
    let size_100pt = child(el, "sz")
        .and_then(|sz| sz.attribute("val"))
        .and_then(|v| v.parse::<f32>().ok())
        .map(|v| (v * 100.0).round() as u16);
    let bold = child(el, "b").is_some();
    FontSpec {
        name,
        size_100pt,
        bold,
    }
}

fn parse_fill(el: &Node<'_, '_>) -> FillSpec {
    let Some(pattern) = child(el, "patternFill") else {
        return FillSpec::default();
    };
    if pattern.attribute("patternType") != Some("solid") {
        return FillSpec::default();
    }
    let solid_rgb = child(&pattern, "fgColor")
        .and_then(|c| c.attribute("rgb"))
        .map(str::to_string);
    FillSpec { solid_rgb }
}

fn parse_border(el: &Node<'_, '_>) -> BorderSpec {
    let edge_present = |name: &str| {
        child(el, name)
            .and_then(|edge| edge.attribute("style").map(|s| s != "none"))
            .unwrap_or(false)
    };
    BorderSpec {
        left: edge_present("left"),
        right: edge_present("right"),
        top: edge_present("top"),
        bottom: edge_present("bottom"),
    }
}

fn parse_xf(el: &Node<'_, '_>) -> XfSpec {
    let id_attr = |name: &str| {
        el.attribute(name)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
    };
    let alignment = child(el, "alignment");
    XfSpec {
        font_id: id_attr("fontId"),
        fill_id: id_attr("fillId"),
        border_id: id_attr("borderId"),
        num_fmt_id: id_attr("numFmtId"),
        h_align: alignment
            .and_then(|a| a.attribute("horizontal"))
            .map(str::to_string),
        v_align: alignment
            .and_then(|a| a.attribute("vertical"))
            .map(str::to_string),
    }
}
