//! XLSX reading and writing for Tabula.
//!
//! The reader deliberately covers only what template discovery and batch
//! ingestion need from a workbook: the first worksheet's cell values, the
//! style index of each cell, merged regions, and the stylesheet those
//! indices point into. Values are kept in their textual form wherever
//! precision matters (see [`CellScalar::Number`]), so a 20-digit identifier
//! survives the trip through a spreadsheet unchanged.
//!
//! The writer produces a fresh single-sheet package from scratch. It does
//! not patch an existing file; export always synthesizes the full part set.

use std::io;

use thiserror::Error;

pub mod cell;
pub mod read;
pub mod styles;
pub mod write;

pub use cell::{date_from_serial, CellScalar};
pub use read::{read_sheet_from_bytes, read_sheet_from_path, TabularSheet};
pub use styles::{BorderSpec, FillSpec, FontSpec, ResolvedStyle, Stylesheet, XfSpec};
pub use write::{SheetWriter, WriteCell};

/// Errors surfaced while reading or writing an XLSX package.
#[derive(Debug, Error)]
pub enum XlsxError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("ZIP container error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("XML attribute error: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),
    #[error("XML document error: {0}")]
    XmlDom(#[from] roxmltree::Error),
    #[error("invalid UTF-8 in part: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("missing required part: {0}")]
    MissingPart(&'static str),
    #[error("workbook has no worksheets")]
    NoWorksheet,
    #[error("invalid cell reference `{0}`")]
    InvalidCellRef(String),
    #[error("invalid range reference `{0}`")]
    InvalidRangeRef(String),
    #[error("invalid package content: {0}")]
    Invalid(String),
}

impl From<tabula_model::RefParseError> for XlsxError {
    fn from(err: tabula_model::RefParseError) -> Self {
        XlsxError::InvalidCellRef(err.to_string())
    }
}

impl From<tabula_model::RangeParseError> for XlsxError {
    fn from(err: tabula_model::RangeParseError) -> Self {
        XlsxError::InvalidRangeRef(err.to_string())
    }
}
