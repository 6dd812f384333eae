//! Per-sheet row classification and summary counts

use serde::Serialize;

use crate::config::ColumnConfig;
use crate::error::TallyError;
use crate::reader::{CellValue, ColumnRef, Table};

/// Classification of a single data row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Entirely blank row (no name, no phone)
    Skip,
    Succeeded,
    Failed,
    Pending,
}

/// Aggregated counts for one sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryRecord {
    pub title: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
}

impl SummaryRecord {
    /// Pending is derived, so `total == succeeded + failed + pending` always holds
    pub fn new(title: impl Into<String>, total: usize, succeeded: usize, failed: usize) -> Self {
        debug_assert!(succeeded + failed <= total);
        Self {
            title: title.into(),
            total,
            succeeded,
            failed,
            pending: total.saturating_sub(succeeded + failed),
        }
    }

    /// `[title, total, succeeded, failed, pending]` as output cells
    pub fn to_row(&self) -> Vec<CellValue> {
        vec![
            CellValue::from(self.title.as_str()),
            CellValue::from(self.total),
            CellValue::from(self.succeeded),
            CellValue::from(self.failed),
            CellValue::from(self.pending),
        ]
    }
}

/// Columns the classifier reads, resolved once per sheet
#[derive(Debug, Clone)]
pub struct RowColumns {
    pub name: ColumnRef,
    pub phone: ColumnRef,
    pub succeeded: ColumnRef,
    pub failed: ColumnRef,
}

impl RowColumns {
    /// Resolve every required column; the first missing one is reported
    pub fn resolve(table: &Table, columns: &ColumnConfig) -> Result<Self, TallyError> {
        Ok(Self {
            name: table.require_column(&columns.name)?,
            phone: table.require_column(&columns.phone)?,
            succeeded: table.require_column(&columns.succeeded)?,
            failed: table.require_column(&columns.failed)?,
        })
    }
}

/// Classify one data row.
///
/// A blank name next to a populated phone is fatal, while a populated name
/// with a blank phone is accepted.
pub fn classify_row(
    table: &Table,
    row_number: usize,
    row: &[CellValue],
    columns: &RowColumns,
) -> Result<Category, TallyError> {
    let name_blank = columns.name.get(row).is_blank();
    let phone_blank = columns.phone.get(row).is_blank();

    if name_blank && phone_blank {
        return Ok(Category::Skip);
    }
    if name_blank {
        return Err(TallyError::InvalidRow {
            table: table.title().to_string(),
            row: row_number,
            column: columns.name.name.clone(),
        });
    }

    let succeeded = columns.succeeded.get(row).is_flag_set();
    let failed = columns.failed.get(row).is_flag_set();

    match (succeeded, failed) {
        (true, true) => Err(TallyError::InvalidContent {
            table: table.title().to_string(),
            row: row_number,
        }),
        (true, false) => Ok(Category::Succeeded),
        (false, true) => Ok(Category::Failed),
        (false, false) => Ok(Category::Pending),
    }
}

/// Classify every data row of `table` into a [`SummaryRecord`]
pub fn summarize(table: &Table, columns: &RowColumns) -> Result<SummaryRecord, TallyError> {
    let mut total = 0;
    let mut succeeded = 0;
    let mut failed = 0;

    for (row_number, row) in table.data_rows() {
        match classify_row(table, row_number, row, columns)? {
            Category::Skip => continue,
            Category::Succeeded => succeeded += 1,
            Category::Failed => failed += 1,
            Category::Pending => {}
        }
        total += 1;
    }

    Ok(SummaryRecord::new(table.title(), total, succeeded, failed))
}

/// Check that two columns of corresponding sheets describe the same number of rows
pub fn ensure_matching_counts(
    left: &Table,
    left_column: &ColumnRef,
    right: &Table,
    right_column: &ColumnRef,
) -> Result<usize, TallyError> {
    let left_count = left.count_nonblank(left_column, true);
    let right_count = right.count_nonblank(right_column, true);

    if left_count != right_count {
        return Err(TallyError::RowCountMismatch {
            left: format!("{}/{}", left.title(), left_column.name),
            right: format!("{}/{}", right.title(), right_column.name),
            left_count,
            right_count,
        });
    }
    Ok(left_count)
}
