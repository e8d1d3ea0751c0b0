//! Calculation engine interface.
//!
//! The formula engine is an external collaborator. Cellgate only needs to
//! load a document, write cells, recalculate and read cells or ranges, which
//! is what [`CalcEngine`] and [`Workbook`] capture.
//!
//! Engine calls are synchronous. The gateway only invokes them while holding
//! the per-service guard, so implementations never see concurrent calls on
//! the same [`Workbook`].
//!
//! [`MemoryEngine`] is a small in-memory implementation for tests and for
//! documents whose outputs are computed by a Rust hook instead of formulas.

pub mod memory;

pub use memory::{MemoryEngine, MemoryWorkbook, RecalcFn};

use serde::{Deserialize, Serialize};

use crate::types::{CellValue, TableData};
use crate::{CellgateError, Result};

/// A sheet whose data comes from an external system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteTable {
    pub table_id: String,
    /// Sheet the fetched rows are written into, starting at A1.
    pub sheet: String,
    pub source_url: String,
}

/// A loaded, mutable spreadsheet document.
pub trait Workbook: Send {
    /// Whether a sheet with this name exists.
    fn has_sheet(&self, name: &str) -> bool;

    /// Name of the currently active sheet.
    fn active_sheet(&self) -> String;

    /// Make `name` the active sheet.
    fn set_active_sheet(&mut self, name: &str) -> Result<()>;

    /// Write a value; [`CellValue::Empty`] clears the cell.
    fn set_cell(&mut self, sheet: &str, row: u32, col: u32, value: &CellValue) -> Result<()>;

    /// Recompute dependent cells after inputs were written.
    fn recalculate(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read a computed value.
    fn get_cell(&self, sheet: &str, row: u32, col: u32) -> Result<CellValue>;

    /// Read a rectangular block of computed values, row-major.
    fn get_range(
        &self,
        sheet: &str,
        row: u32,
        col: u32,
        rows: u32,
        cols: u32,
    ) -> Result<Vec<Vec<CellValue>>> {
        (row..row + rows)
            .map(|r| {
                (col..col + cols)
                    .map(|c| self.get_cell(sheet, r, c))
                    .collect::<Result<Vec<_>>>()
            })
            .collect()
    }

    /// Sheets backed by remote data.
    fn remote_tables(&self) -> Vec<RemoteTable> {
        Vec::new()
    }

    /// Populate a remote table sheet with fetched rows.
    fn load_table(&mut self, table: &RemoteTable, _data: &TableData) -> Result<()> {
        Err(CellgateError::Engine(format!(
            "engine does not support remote table {}",
            table.table_id
        )))
    }

    /// Serialize the document for the distributed cache.
    ///
    /// `None` means the document cannot be snapshotted.
    fn snapshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Factory for [`Workbook`] handles.
pub trait CalcEngine: Send + Sync {
    /// Engine name for logging/debugging.
    fn name(&self) -> &str;

    /// Parse a raw document source.
    fn load(&self, source: &str) -> Result<Box<dyn Workbook>>;

    /// Rebuild a document from a [`Workbook::snapshot`].
    fn restore(&self, _snapshot: &[u8]) -> Result<Box<dyn Workbook>> {
        Err(CellgateError::Engine(format!(
            "engine {} does not support snapshots",
            self.name()
        )))
    }
}
