//! Spreadsheet column letters and cell coordinates.
//!
//! Columns are addressed two ways: 0-indexed integers inside the engine and
//! base-26 letter strings (`A`, `B`, …, `Z`, `AA`, …) in schemas and storage
//! keys. The letter alphabet has no zero digit (`A` = 1, `Z` = 26), so the
//! conversion is not positional base-26 arithmetic in the usual sense.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors from [`letter_to_col`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ColumnLetterError {
    #[error("empty column letters")]
    Empty,
    #[error("non-letter character {0:?} in column letters")]
    NonLetter(char),
    #[error("column letters out of range")]
    Overflow,
}

/// Convert a 0-indexed column to its letter form (`0` → `A`, `27` → `AB`).
pub fn col_to_letter(col: u32) -> String {
    let mut n = col + 1;
    let mut out = Vec::<u8>::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).expect("column letters are always valid UTF-8")
}

/// Convert column letters to a 0-indexed column (`"A"` → `0`, `"AB"` → `27`).
///
/// Lowercase input is accepted; anything other than ASCII letters is an
/// error, as is an empty string or a value that overflows `u32`.
pub fn letter_to_col(letters: &str) -> Result<u32, ColumnLetterError> {
    if letters.is_empty() {
        return Err(ColumnLetterError::Empty);
    }
    let mut col: u32 = 0;
    for c in letters.chars() {
        if !c.is_ascii_alphabetic() {
            return Err(ColumnLetterError::NonLetter(c));
        }
        let v = (c.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
        col = col
            .checked_mul(26)
            .and_then(|c| c.checked_add(v))
            .ok_or(ColumnLetterError::Overflow)?;
    }
    Ok(col - 1)
}

/// A 0-indexed (row, column) position within a sheet.
///
/// Excel displays rows 1-based, so `CellRef { row: 4, col: 0 }` is `A5`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

/// Errors from [`CellRef::from_a1`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RefParseError {
    #[error("empty cell reference")]
    Empty,
    #[error("invalid column in cell reference: {0}")]
    Column(#[from] ColumnLetterError),
    #[error("invalid row in cell reference")]
    InvalidRow,
}

impl CellRef {
    #[inline]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Render in A1 notation (`CellRef::new(4, 0)` → `"A5"`).
    pub fn to_a1(self) -> String {
        format!("{}{}", col_to_letter(self.col), self.row + 1)
    }

    /// Parse an A1 reference as found in worksheet XML (`"B5"`, `"AH12"`).
    pub fn from_a1(a1: &str) -> Result<Self, RefParseError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(RefParseError::Empty);
        }
        let split = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
        let col = letter_to_col(&s[..split])?;
        let row_1_based: u32 = s[split..].parse().map_err(|_| RefParseError::InvalidRow)?;
        if row_1_based == 0 {
            return Err(RefParseError::InvalidRow);
        }
        Ok(Self {
            row: row_1_based - 1,
            col,
        })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// An inclusive rectangular merged region, normalized so that
/// `start.row <= end.row` and `start.col <= end.col`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergedRange {
    pub start: CellRef,
    pub end: CellRef,
}

/// Errors from [`MergedRange::from_a1`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RangeParseError {
    #[error("empty range reference")]
    Empty,
    #[error("invalid cell reference in range: {0}")]
    Cell(#[from] RefParseError),
}

impl MergedRange {
    pub const fn new(a: CellRef, b: CellRef) -> Self {
        let start_row = if a.row <= b.row { a.row } else { b.row };
        let end_row = if a.row <= b.row { b.row } else { a.row };
        let start_col = if a.col <= b.col { a.col } else { b.col };
        let end_col = if a.col <= b.col { b.col } else { a.col };
        Self {
            start: CellRef::new(start_row, start_col),
            end: CellRef::new(end_row, end_col),
        }
    }

    /// The top-left cell, which is where a merged region stores its value.
    #[inline]
    pub const fn anchor(&self) -> CellRef {
        self.start
    }

    #[inline]
    pub const fn contains(&self, cell: CellRef) -> bool {
        cell.row >= self.start.row
            && cell.row <= self.end.row
            && cell.col >= self.start.col
            && cell.col <= self.end.col
    }

    #[inline]
    pub const fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }

    /// Parse `"A1:C4"`; a single reference is accepted as a one-cell range.
    pub fn from_a1(a1: &str) -> Result<Self, RangeParseError> {
        let s = a1.trim();
        if s.is_empty() {
            return Err(RangeParseError::Empty);
        }
        match s.split_once(':') {
            None => {
                let cell = CellRef::from_a1(s)?;
                Ok(Self::new(cell, cell))
            }
            Some((a, b)) => Ok(Self::new(CellRef::from_a1(a)?, CellRef::from_a1(b)?)),
        }
    }
}

impl fmt::Display for MergedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_roundtrip() {
        for (col, letters) in [
            (0, "A"),
            (1, "B"),
            (25, "Z"),
            (26, "AA"),
            (27, "AB"),
            (51, "AZ"),
            (52, "BA"),
            (19, "T"),
            (33, "AH"),
            (701, "ZZ"),
            (702, "AAA"),
            (16_383, "XFD"),
        ] {
            assert_eq!(col_to_letter(col), letters);
            assert_eq!(letter_to_col(letters).unwrap(), col);
        }
    }

    #[test]
    fn letters_accept_lowercase() {
        assert_eq!(letter_to_col("ah").unwrap(), 33);
        assert_eq!(letter_to_col("aH").unwrap(), 33);
    }

    #[test]
    fn letters_reject_garbage() {
        assert_eq!(letter_to_col(""), Err(ColumnLetterError::Empty));
        assert_eq!(letter_to_col("A1"), Err(ColumnLetterError::NonLetter('1')));
        assert_eq!(letter_to_col("é"), Err(ColumnLetterError::NonLetter('é')));
        assert_eq!(
            letter_to_col("AAAAAAAAAA"),
            Err(ColumnLetterError::Overflow)
        );
    }

    #[test]
    fn exhaustive_roundtrip_low_range() {
        for col in 0..2_000 {
            assert_eq!(letter_to_col(&col_to_letter(col)).unwrap(), col);
        }
    }

    #[test]
    fn a1_parsing() {
        assert_eq!(CellRef::from_a1("A1").unwrap(), CellRef::new(0, 0));
        assert_eq!(CellRef::from_a1("B5").unwrap(), CellRef::new(4, 1));
        assert_eq!(CellRef::new(11, 33).to_a1(), "AH12");
        assert!(CellRef::from_a1("A0").is_err());
        assert!(CellRef::from_a1("12").is_err());
        assert!(CellRef::from_a1("").is_err());
    }

    #[test]
    fn merged_range_contains_and_anchor() {
        let r = MergedRange::from_a1("B2:D4").unwrap();
        assert_eq!(r.anchor(), CellRef::new(1, 1));
        assert!(r.contains(CellRef::new(3, 3)));
        assert!(!r.contains(CellRef::new(0, 1)));
        assert_eq!(r.width(), 3);

        let single = MergedRange::from_a1("C3").unwrap();
        assert_eq!(single.anchor(), single.end);
    }
}
