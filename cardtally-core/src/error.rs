//! Error taxonomy for structurally or semantically invalid input sheets

use thiserror::Error;

/// Errors raised while interpreting sheet contents.
///
/// Every variant is fatal for the sheet (or file) being processed. Nothing is
/// retried or downgraded to a warning; the input is expected to be fixed by
/// hand and the run repeated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TallyError {
    /// A required header column is absent from the sheet
    #[error("[{table}] missing required column '{column}'")]
    MissingColumn { table: String, column: String },

    /// A sheet present in one workbook has no counterpart in the other
    #[error("{workbook}: no sheet named '{table}'")]
    MissingTable { workbook: String, table: String },

    /// Two columns that must describe the same rows disagree on their count
    #[error("row count mismatch: '{left}' has {left_count} rows, '{right}' has {right_count}")]
    RowCountMismatch {
        left: String,
        right: String,
        left_count: usize,
        right_count: usize,
    },

    /// Name cell is blank while the rest of the row is populated
    #[error("[{table}] ({column}-{row}) invalid cell: blank name in populated row")]
    InvalidRow {
        table: String,
        row: usize,
        column: String,
    },

    /// Succeeded and failed flags are both set on the same row
    #[error("[{table}] row {row}: invalid content, both succeeded and failed flags are set")]
    InvalidContent { table: String, row: usize },

    /// Sheet title does not follow the `date-location[-operator]` convention
    #[error("invalid sheet title '{title}': {reason}")]
    InvalidTitle { title: String, reason: String },
}

impl TallyError {
    /// Name of the sheet the error refers to, if any
    pub fn table(&self) -> Option<&str> {
        match self {
            TallyError::MissingColumn { table, .. }
            | TallyError::InvalidRow { table, .. }
            | TallyError::InvalidContent { table, .. } => Some(table),
            TallyError::InvalidTitle { title, .. } => Some(title),
            TallyError::MissingTable { table, .. } => Some(table),
            TallyError::RowCountMismatch { .. } => None,
        }
    }

    /// Structural errors abort the whole file rather than a single sheet
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            TallyError::MissingColumn { .. }
                | TallyError::MissingTable { .. }
                | TallyError::RowCountMismatch { .. }
        )
    }
}
