//! cardtally: summaries and reports for resident-card issuance sheets
//!
//! Each input workbook holds one sheet per collection event, titled
//! `date-location[-operator]`. This library tallies every sheet, keeps a
//! summary sheet in each workbook up to date, and writes cross-workbook
//! count and per-operator reports.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod reader;
pub mod report;
pub mod session;
pub mod title;
pub mod writer;

pub use aggregate::{Category, RowColumns, SummaryRecord};
pub use config::{ColumnConfig, TallyConfig, TitleConfig};
pub use error::TallyError;
pub use pipeline::{
    check_cell_value, count_report, get_cell_value, performance_report, reconcile,
    regenerate_summary, total_rows, validate_headers,
};
pub use reader::{CellValue, Table};
pub use report::OutputTable;
pub use session::{WorkbookHandle, WorkbookSession};
pub use title::{TitleKey, TitleParser};
