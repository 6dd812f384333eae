//! Workbook data structures

use std::fmt;
use std::path::PathBuf;

use super::table::Table;

/// A workbook loaded into memory, sheets in workbook order
#[derive(Debug, Clone)]
pub struct Workbook {
    pub path: PathBuf,
    pub tables: Vec<Table>,
}

impl Workbook {
    /// Get a sheet by name
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.title() == name)
    }

    /// Get all sheet names
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.title()).collect()
    }
}

/// Cell value types
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Check if the cell is empty
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Absent, or text that is empty after trimming
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Number(_) => false,
            CellValue::Text(s) => s.trim().is_empty(),
        }
    }

    /// True when the cell's text trims to `"1"` (numeric 1 included)
    pub fn is_flag_set(&self) -> bool {
        match self {
            CellValue::Empty => false,
            CellValue::Number(n) => *n == 1.0,
            CellValue::Text(s) => s.trim() == "1",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            // f64 Display already drops a zero fraction (1.0 -> "1")
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<usize> for CellValue {
    fn from(n: usize) -> Self {
        CellValue::Number(n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_cells() {
        assert!(CellValue::Empty.is_blank());
        assert!(CellValue::Text("   ".to_string()).is_blank());
        assert!(!CellValue::Text(" x ".to_string()).is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
    }

    #[test]
    fn test_flag_detection() {
        assert!(CellValue::Number(1.0).is_flag_set());
        assert!(CellValue::Text(" 1 ".to_string()).is_flag_set());
        assert!(!CellValue::Text("1.0".to_string()).is_flag_set());
        assert!(!CellValue::Number(0.0).is_flag_set());
        assert!(!CellValue::Empty.is_flag_set());
    }

    #[test]
    fn test_display() {
        assert_eq!(CellValue::Number(3.0).to_string(), "3");
        assert_eq!(CellValue::Number(2.5).to_string(), "2.5");
        assert_eq!(CellValue::Empty.to_string(), "");
        assert_eq!(CellValue::from("点位").to_string(), "点位");
    }
}
