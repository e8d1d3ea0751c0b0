//! Calculation executor.
//!
//! Writes an input set into a document, recalculates, and reads the declared
//! outputs. Callers hold the per-service guard for the whole call.

use tracing::trace;

use crate::engine::Workbook;
use crate::types::{CellAddress, CellValue, InputSet, OutputResult, OutputValue, ServiceDefinition};
use crate::{CellgateError, Result};

/// Run one calculation against `workbook`.
///
/// Inputs are written in declaration order and outputs are returned in
/// declaration order: a scalar for a single cell, a row-major 2-D array for
/// a range. [`CellValue::Empty`](crate::types::CellValue::Empty) clears a
/// cell. Every written cell gets its previous value back before returning,
/// so an input absent from `inputs` always sees the document's own value and
/// never a value left behind by an earlier call on a reused handle.
pub fn execute(
    workbook: &mut dyn Workbook,
    service: &ServiceDefinition,
    inputs: &InputSet,
) -> Result<Vec<OutputResult>> {
    let mut written = Vec::new();
    let result = calculate(workbook, service, inputs, &mut written);
    let restored = restore(workbook, written);
    match (result, restored) {
        (Ok(outputs), Ok(())) => Ok(outputs),
        (Err(e), _) | (Ok(_), Err(e)) => Err(e),
    }
}

/// A cell overwritten by an input, with the value it held before.
struct WrittenCell {
    sheet: String,
    row: u32,
    col: u32,
    previous: CellValue,
}

fn calculate(
    workbook: &mut dyn Workbook,
    service: &ServiceDefinition,
    inputs: &InputSet,
    written: &mut Vec<WrittenCell>,
) -> Result<Vec<OutputResult>> {
    let mut current_sheet: Option<String> = None;

    for def in &service.inputs {
        let Some(value) = inputs.get(&def.name) else {
            continue;
        };
        let addr = CellAddress::parse(&def.address)?;
        let sheet = resolve_sheet(workbook, &addr)?;

        if current_sheet.as_deref() != Some(sheet.as_str()) {
            if workbook.active_sheet() != sheet {
                workbook.set_active_sheet(&sheet)?;
            }
            current_sheet = Some(sheet.clone());
        }

        let (row, col) = (addr.start.row, addr.start.col);
        let previous = workbook.get_cell(&sheet, row, col)?;
        trace!(input = %def.name, sheet = %sheet, "writing input");
        workbook.set_cell(&sheet, row, col, value)?;
        written.push(WrittenCell {
            sheet,
            row,
            col,
            previous,
        });
    }

    workbook.recalculate()?;

    service
        .outputs
        .iter()
        .map(|def| {
            let addr = CellAddress::parse(&def.address)?;
            let sheet = resolve_sheet(workbook, &addr)?;
            let value = if addr.is_single_cell() {
                OutputValue::Scalar(workbook.get_cell(&sheet, addr.start.row, addr.start.col)?)
            } else {
                OutputValue::Range(workbook.get_range(
                    &sheet,
                    addr.start.row,
                    addr.start.col,
                    addr.rows(),
                    addr.cols(),
                )?)
            };
            Ok(OutputResult {
                name: def.name.clone(),
                value,
                format_hint: def.format_hint.clone(),
            })
        })
        .collect()
}

/// Put overwritten cells back, newest first so a cell written twice ends on
/// its original value.
fn restore(workbook: &mut dyn Workbook, written: Vec<WrittenCell>) -> Result<()> {
    for cell in written.into_iter().rev() {
        workbook.set_cell(&cell.sheet, cell.row, cell.col, &cell.previous)?;
    }
    Ok(())
}

/// Sheet named by `addr`, or the active sheet for a bare reference.
///
/// A named sheet that does not exist is an error, never a fallback.
fn resolve_sheet(workbook: &dyn Workbook, addr: &CellAddress) -> Result<String> {
    match &addr.sheet {
        Some(name) if workbook.has_sheet(name) => Ok(name.clone()),
        Some(name) => Err(CellgateError::SheetNotFound(name.clone())),
        None => Ok(workbook.active_sheet()),
    }
}
