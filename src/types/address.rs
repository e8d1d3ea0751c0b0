//! A1-style cell address parsing.
//!
//! Accepted forms:
//!
//! - `C3`, `$C$3`: a single cell on the active sheet
//! - `Sheet1!C3`: a single cell on a named sheet
//! - `'My Sheet'!B2:B5`: a rectangular range on a quoted sheet name
//!
//! Rows and columns are stored 0-based.

use std::fmt;
use std::str::FromStr;

use crate::{CellgateError, Result};

/// A 0-based cell coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

/// A parsed cell or range address with an optional sheet qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellAddress {
    /// Sheet name; `None` targets the active sheet.
    pub sheet: Option<String>,
    /// Top-left cell.
    pub start: CellRef,
    /// Bottom-right cell. Equal to `start` for a single cell.
    pub end: CellRef,
}

impl CellAddress {
    /// Parse an address string.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || CellgateError::InvalidAddress(input.to_string());
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid());
        }

        let (sheet, reference) = match trimmed.rfind('!') {
            Some(idx) => {
                let raw_sheet = &trimmed[..idx];
                let sheet = unquote_sheet(raw_sheet).ok_or_else(invalid)?;
                (Some(sheet), &trimmed[idx + 1..])
            }
            None => (None, trimmed),
        };

        let (start, end) = match reference.split_once(':') {
            Some((a, b)) => {
                let a = parse_cell(a).ok_or_else(invalid)?;
                let b = parse_cell(b).ok_or_else(invalid)?;
                (
                    CellRef {
                        row: a.row.min(b.row),
                        col: a.col.min(b.col),
                    },
                    CellRef {
                        row: a.row.max(b.row),
                        col: a.col.max(b.col),
                    },
                )
            }
            None => {
                let cell = parse_cell(reference).ok_or_else(invalid)?;
                (cell, cell)
            }
        };

        Ok(Self { sheet, start, end })
    }

    /// Whether the address denotes exactly one cell.
    pub fn is_single_cell(&self) -> bool {
        self.start == self.end
    }

    pub fn rows(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn cols(&self) -> u32 {
        self.end.col - self.start.col + 1
    }
}

impl FromStr for CellAddress {
    type Err = CellgateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            if sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                write!(f, "{sheet}!")?;
            } else {
                write!(f, "'{}'!", sheet.replace('\'', "''"))?;
            }
        }
        write!(f, "{}", format_cell(self.start))?;
        if !self.is_single_cell() {
            write!(f, ":{}", format_cell(self.end))?;
        }
        Ok(())
    }
}

fn unquote_sheet(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        let inner = &raw[1..raw.len() - 1];
        return (!inner.is_empty()).then(|| inner.replace("''", "'"));
    }
    (!raw.is_empty()).then(|| raw.to_string())
}

fn parse_cell(raw: &str) -> Option<CellRef> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != '$').collect();
    let split = cleaned.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cleaned.split_at(split);
    if letters.is_empty() || letters.len() > 3 || !letters.chars().all(|c| c.is_ascii_alphabetic())
    {
        return None;
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let col = letters
        .chars()
        .fold(0u32, |acc, c| acc * 26 + (c.to_ascii_uppercase() as u32 - 'A' as u32 + 1));
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }
    Some(CellRef {
        row: row - 1,
        col: col - 1,
    })
}

fn format_cell(cell: CellRef) -> String {
    let mut letters = Vec::new();
    let mut n = cell.col + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        n = (n - 1) / 26;
    }
    letters.reverse();
    format!("{}{}", letters.into_iter().collect::<String>(), cell.row + 1)
}
