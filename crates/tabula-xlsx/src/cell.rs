//! Scalar cell values as ingestion sees them.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use tabula_model::normalize_decimal;

/// A single worksheet cell, decoded from the sheet XML.
///
/// Numeric cells keep the *textual* form from the file rather than an `f64`.
/// Spreadsheet numbers routinely carry identifiers longer than the 15-16
/// significant digits a double can hold, and ingestion stores text anyway,
/// so parsing to a float would silently corrupt them.
#[derive(Debug, Clone, PartialEq)]
pub enum CellScalar {
    Empty,
    Text(String),
    /// Raw decimal text exactly as serialized in `<v>`.
    Number(String),
    Bool(bool),
    Date(NaiveDateTime),
    /// Spreadsheet error literal, e.g. `#DIV/0!`.
    Error(String),
}

impl CellScalar {
    /// Whether this cell contributes nothing to a row.
    ///
    /// Whitespace-only text counts as blank; a zero or `false` does not.
    pub fn is_blank(&self) -> bool {
        match self {
            CellScalar::Empty => true,
            CellScalar::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// The canonical text stored for this cell during ingestion.
    ///
    /// Numbers are normalized to plain decimal notation (no exponent, no
    /// trailing fraction zeros); text that does not parse as a number is
    /// passed through untouched. Dates render as `YYYY-MM-DD`, gaining a
    /// ` HH:MM:SS` suffix only when the time of day is nonzero.
    pub fn render(&self) -> String {
        match self {
            CellScalar::Empty => String::new(),
            CellScalar::Text(s) => s.clone(),
            CellScalar::Number(raw) => {
                normalize_decimal(raw).unwrap_or_else(|| raw.clone())
            }
            CellScalar::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            CellScalar::Date(dt) => {
                if dt.time() == NaiveTime::MIN {
                    dt.format("%Y-%m-%d").to_string()
                } else {
                    dt.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            }
            CellScalar::Error(code) => code.clone(),
        }
    }
}

/// Converts an Excel serial date to a calendar timestamp.
///
/// Serial 1 is 1900-01-01 in the 1900 date system. Serials from 61 up are
/// shifted back one day to absorb Excel's phantom 1900-02-29 (serial 60,
/// which lands on Feb 28 here). The fractional part is the time of day,
/// rounded to whole seconds and carried into the next day when rounding
/// lands exactly on midnight.
pub fn date_from_serial(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let mut days = serial.trunc() as i64;
    let frac = serial - serial.trunc();
    let mut secs = (frac * 86_400.0).round() as i64;
    if secs >= 86_400 {
        days += 1;
        secs = 0;
    }
    if days >= 60 {
        days -= 1;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 31)?;
    let date = epoch.checked_add_signed(Duration::days(days))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs as u32, 0)?;
    Some(date.and_time(time))
}

/// True when a timestamp carries no time-of-day component.
pub fn is_midnight(dt: &NaiveDateTime) -> bool {
    dt.time().num_seconds_from_midnight() == 0
}
