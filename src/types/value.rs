//! Cell and output value types.

use serde::{Deserialize, Serialize};

/// A single cell value as exchanged with the calculation engine.
///
/// Serializes untagged: `null`, `true`, `12.5`, `"text"`. An input set
/// containing [`CellValue::Empty`] means "clear this cell".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Convert a JSON value into a cell value without coercion.
    ///
    /// Arrays and objects have no cell representation and are rendered as
    /// their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Empty,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Self::Empty, Self::Number),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl std::fmt::Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Value read for an output: a scalar for a single cell, a row-major grid
/// for a rectangular range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Range(Vec<Vec<CellValue>>),
    Scalar(CellValue),
}

impl OutputValue {
    pub fn as_scalar(&self) -> Option<&CellValue> {
        match self {
            Self::Scalar(v) => Some(v),
            Self::Range(_) => None,
        }
    }

    pub fn as_range(&self) -> Option<&[Vec<CellValue>]> {
        match self {
            Self::Range(rows) => Some(rows),
            Self::Scalar(_) => None,
        }
    }
}

/// Tabular data fetched for a remote table sheet (row-major).
pub type TableData = Vec<Vec<CellValue>>;
