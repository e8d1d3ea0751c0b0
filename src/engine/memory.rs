//! In-memory grid engine.
//!
//! Documents are JSON:
//!
//! ```json
//! {
//!   "sheets": [
//!     { "name": "Sheet1", "cells": { "A1": 1, "B2": "label" } }
//!   ],
//!   "tables": [
//!     { "table_id": "rates", "sheet": "Rates", "source_url": "https://example.com/rates" }
//!   ]
//! }
//! ```
//!
//! There is no formula language. Computed cells are produced by an optional
//! [`RecalcFn`] hook that runs on every [`Workbook::recalculate`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{CalcEngine, RemoteTable, Workbook};
use crate::types::{CellAddress, CellRef, CellValue, TableData};
use crate::{CellgateError, Result};

/// Recalculation hook for [`MemoryWorkbook`].
pub type RecalcFn = Arc<dyn Fn(&mut MemoryWorkbook) -> Result<()> + Send + Sync>;

/// Engine producing [`MemoryWorkbook`] handles.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    recalc: Option<RecalcFn>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a recalculation hook shared by every loaded workbook.
    pub fn with_recalc<F>(mut self, recalc: F) -> Self
    where
        F: Fn(&mut MemoryWorkbook) -> Result<()> + Send + Sync + 'static,
    {
        self.recalc = Some(Arc::new(recalc));
        self
    }

    fn build_workbook(&self, doc: DocumentData) -> Result<MemoryWorkbook> {
        if doc.sheets.is_empty() {
            return Err(CellgateError::Engine("document has no sheets".into()));
        }
        let mut sheets = Vec::with_capacity(doc.sheets.len());
        for sheet in doc.sheets {
            let mut cells = BTreeMap::new();
            for (a1, value) in sheet.cells {
                let addr = CellAddress::parse(&a1)
                    .map_err(|_| CellgateError::Engine(format!("bad cell key {a1}")))?;
                cells.insert((addr.start.row, addr.start.col), value);
            }
            sheets.push(MemorySheet {
                name: sheet.name,
                cells,
            });
        }
        let active = doc
            .active
            .and_then(|name| sheets.iter().position(|s| s.name == name))
            .unwrap_or(0);
        Ok(MemoryWorkbook {
            sheets,
            active,
            tables: doc.tables,
            recalc: self.recalc.clone(),
        })
    }
}

impl CalcEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self, source: &str) -> Result<Box<dyn Workbook>> {
        let doc: DocumentData = serde_json::from_str(source)
            .map_err(|e| CellgateError::Engine(format!("failed to parse document: {e}")))?;
        Ok(Box::new(self.build_workbook(doc)?))
    }

    fn restore(&self, snapshot: &[u8]) -> Result<Box<dyn Workbook>> {
        let doc: DocumentData = serde_json::from_slice(snapshot)
            .map_err(|e| CellgateError::Engine(format!("failed to parse snapshot: {e}")))?;
        Ok(Box::new(self.build_workbook(doc)?))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DocumentData {
    sheets: Vec<SheetData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tables: Vec<RemoteTable>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SheetData {
    name: String,
    #[serde(default)]
    cells: BTreeMap<String, CellValue>,
}

struct MemorySheet {
    name: String,
    cells: BTreeMap<(u32, u32), CellValue>,
}

/// A workbook held entirely in memory.
pub struct MemoryWorkbook {
    sheets: Vec<MemorySheet>,
    active: usize,
    tables: Vec<RemoteTable>,
    recalc: Option<RecalcFn>,
}

impl MemoryWorkbook {
    fn sheet(&self, name: &str) -> Result<&MemorySheet> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| CellgateError::SheetNotFound(name.to_string()))
    }

    fn sheet_mut(&mut self, name: &str) -> Result<&mut MemorySheet> {
        self.sheets
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| CellgateError::SheetNotFound(name.to_string()))
    }

    /// Read a cell by A1 reference. Missing cells read as empty.
    pub fn value(&self, sheet: &str, a1: &str) -> Result<CellValue> {
        let addr = CellAddress::parse(a1)?;
        self.get_cell(sheet, addr.start.row, addr.start.col)
    }

    /// Write a cell by A1 reference.
    pub fn set_value(&mut self, sheet: &str, a1: &str, value: impl Into<CellValue>) -> Result<()> {
        let addr = CellAddress::parse(a1)?;
        self.set_cell(sheet, addr.start.row, addr.start.col, &value.into())
    }

    /// Read a numeric cell, treating empty as zero.
    pub fn number(&self, sheet: &str, a1: &str) -> Result<f64> {
        match self.value(sheet, a1)? {
            CellValue::Number(n) => Ok(n),
            CellValue::Empty => Ok(0.0),
            CellValue::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
            CellValue::Text(t) => Err(CellgateError::Engine(format!(
                "{sheet}!{a1} is not numeric: {t}"
            ))),
        }
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    fn to_document(&self) -> DocumentData {
        DocumentData {
            sheets: self
                .sheets
                .iter()
                .map(|sheet| SheetData {
                    name: sheet.name.clone(),
                    cells: sheet
                        .cells
                        .iter()
                        .map(|(&(row, col), value)| {
                            let cell = CellRef { row, col };
                            let addr = CellAddress {
                                sheet: None,
                                start: cell,
                                end: cell,
                            };
                            (addr.to_string(), value.clone())
                        })
                        .collect(),
                })
                .collect(),
            active: Some(self.sheets[self.active].name.clone()),
            tables: self.tables.clone(),
        }
    }
}

impl Workbook for MemoryWorkbook {
    fn has_sheet(&self, name: &str) -> bool {
        self.sheets.iter().any(|s| s.name == name)
    }

    fn active_sheet(&self) -> String {
        self.sheets[self.active].name.clone()
    }

    fn set_active_sheet(&mut self, name: &str) -> Result<()> {
        self.active = self
            .sheets
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| CellgateError::SheetNotFound(name.to_string()))?;
        Ok(())
    }

    fn set_cell(&mut self, sheet: &str, row: u32, col: u32, value: &CellValue) -> Result<()> {
        let sheet = self.sheet_mut(sheet)?;
        if value.is_empty() {
            sheet.cells.remove(&(row, col));
        } else {
            sheet.cells.insert((row, col), value.clone());
        }
        Ok(())
    }

    fn recalculate(&mut self) -> Result<()> {
        match self.recalc.clone() {
            Some(recalc) => recalc(self),
            None => Ok(()),
        }
    }

    fn get_cell(&self, sheet: &str, row: u32, col: u32) -> Result<CellValue> {
        Ok(self
            .sheet(sheet)?
            .cells
            .get(&(row, col))
            .cloned()
            .unwrap_or_default())
    }

    fn remote_tables(&self) -> Vec<RemoteTable> {
        self.tables.clone()
    }

    fn load_table(&mut self, table: &RemoteTable, data: &TableData) -> Result<()> {
        let sheet = self.sheet_mut(&table.sheet)?;
        sheet.cells.clear();
        for (r, row) in data.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    sheet.cells.insert((r as u32, c as u32), value.clone());
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(Some(serde_json::to_vec(&self.to_document())?))
    }
}
