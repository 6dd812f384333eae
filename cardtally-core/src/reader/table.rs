//! Header-indexed view over a sheet's cell grid
//!
//! Row 1 is the header row. Positions are 1-based throughout, matching the
//! row and column numbers a user sees in the spreadsheet application.

use crate::error::TallyError;

use super::workbook::CellValue;

static EMPTY: CellValue = CellValue::Empty;

/// A column resolved against a table's header row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub name: String,
    /// 1-based column position
    pub index: usize,
}

impl ColumnRef {
    /// Cell of this column within a row slice (`Empty` when the row is short)
    pub fn get<'a>(&self, row: &'a [CellValue]) -> &'a CellValue {
        self.index
            .checked_sub(1)
            .and_then(|i| row.get(i))
            .unwrap_or(&EMPTY)
    }
}

/// A named rectangular grid of cells
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    title: String,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    pub fn new(title: impl Into<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self {
            title: title.into(),
            rows,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Number of rows, header included
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Cell at a 1-based position; `Empty` outside the grid
    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        if row == 0 || col == 0 {
            return &EMPTY;
        }
        self.rows
            .get(row - 1)
            .and_then(|r| r.get(col - 1))
            .unwrap_or(&EMPTY)
    }

    pub fn header(&self) -> &[CellValue] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append a row at the bottom of the table
    pub fn push_row(&mut self, row: Vec<CellValue>) {
        self.rows.push(row);
    }

    /// Find the first header cell equal to `name`, scanning left to right
    pub fn resolve_column(&self, name: &str) -> Option<ColumnRef> {
        self.header()
            .iter()
            .position(|cell| matches!(cell, CellValue::Text(text) if text == name))
            .map(|pos| ColumnRef {
                name: name.to_string(),
                index: pos + 1,
            })
    }

    /// Like [`Table::resolve_column`], but a missing column is an error
    pub fn require_column(&self, name: &str) -> Result<ColumnRef, TallyError> {
        self.resolve_column(name)
            .ok_or_else(|| TallyError::MissingColumn {
                table: self.title.clone(),
                column: name.to_string(),
            })
    }

    /// Rows with their 1-based row numbers, optionally starting at the header
    pub fn rows(&self, skip_header: bool) -> impl Iterator<Item = (usize, &[CellValue])> {
        let skip = usize::from(skip_header);
        self.rows
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, row)| (i + 1, row.as_slice()))
    }

    /// Data rows (row 2 onwards)
    pub fn data_rows(&self) -> impl Iterator<Item = (usize, &[CellValue])> {
        self.rows(true)
    }

    /// Count rows whose cell in `column` is not blank
    pub fn count_nonblank(&self, column: &ColumnRef, skip_header: bool) -> usize {
        self.rows(skip_header)
            .filter(|(_, row)| !column.get(row).is_blank())
            .count()
    }

    /// First non-blank value of `column` in row order
    pub fn first_nonblank(&self, column: &ColumnRef, skip_header: bool) -> Option<&CellValue> {
        self.rows(skip_header)
            .map(|(_, row)| column.get(row))
            .find(|cell| !cell.is_blank())
    }
}
