//! Excel/ODS file reader using calamine

use anyhow::{Context, Result};
use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};
use std::path::Path;

pub mod table;
pub mod workbook;

pub use table::{ColumnRef, Table};
pub use workbook::{CellValue, Workbook};

/// Read a workbook from a file path
pub fn read_workbook<P: AsRef<Path>>(path: P) -> Result<Workbook> {
    let path = path.as_ref();
    let mut excel: Sheets<_> = open_workbook_auto(path)
        .with_context(|| format!("Failed to open workbook: {}", path.display()))?;

    let sheet_names = excel.sheet_names();
    let mut tables = Vec::with_capacity(sheet_names.len());

    for sheet_name in &sheet_names {
        let range = excel.worksheet_range(sheet_name).with_context(|| {
            format!("Failed to read sheet '{}' in {}", sheet_name, path.display())
        })?;
        tables.push(parse_table(sheet_name, &range));
    }

    log::debug!("Loaded {} sheets from {}", tables.len(), path.display());

    Ok(Workbook {
        path: path.to_path_buf(),
        tables,
    })
}

/// Convert a calamine range into a dense grid anchored at A1
fn parse_table(name: &str, range: &Range<Data>) -> Table {
    let Some((max_row, max_col)) = range.end() else {
        return Table::new(name, Vec::new());
    };

    let mut rows = Vec::with_capacity(max_row as usize + 1);
    for row in 0..=max_row {
        let mut cells = Vec::with_capacity(max_col as usize + 1);
        for col in 0..=max_col {
            let value = range
                .get_value((row, col))
                .map(parse_cell_value)
                .unwrap_or(CellValue::Empty);
            cells.push(value);
        }
        // Trailing empties carry no information
        while matches!(cells.last(), Some(CellValue::Empty)) {
            cells.pop();
        }
        rows.push(cells);
    }

    Table::new(name, rows)
}

fn parse_cell_value(data: &Data) -> CellValue {
    match data {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Text(if *b { "TRUE" } else { "FALSE" }.to_string()),
        Data::Error(e) => CellValue::Text(e.to_string()),
        Data::Empty => CellValue::Empty,
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) => CellValue::Text(s.clone()),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::CellErrorType;

    #[test]
    fn test_parse_cell_value() {
        assert_eq!(parse_cell_value(&Data::Int(7)), CellValue::Number(7.0));
        assert_eq!(parse_cell_value(&Data::Float(1.5)), CellValue::Number(1.5));
        assert_eq!(
            parse_cell_value(&Data::String("张三".to_string())),
            CellValue::Text("张三".to_string())
        );
        assert_eq!(
            parse_cell_value(&Data::Bool(true)),
            CellValue::Text("TRUE".to_string())
        );
        assert_eq!(parse_cell_value(&Data::Empty), CellValue::Empty);
        assert_eq!(
            parse_cell_value(&Data::Error(CellErrorType::Div0)),
            CellValue::Text("#DIV/0!".to_string())
        );
        assert_eq!(
            parse_cell_value(&Data::Error(CellErrorType::NA)),
            CellValue::Text("#N/A".to_string())
        );
    }

    #[test]
    fn test_parse_table_anchors_at_a1() {
        // Data starting at B2 still lands at row 2 / column 2
        let mut range = Range::new((1, 1), (2, 2));
        range.set_value((1, 1), Data::String("姓名".to_string()));
        range.set_value((2, 2), Data::Int(1));

        let table = parse_table("Sheet1", &range);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.cell(2, 2), &CellValue::Text("姓名".to_string()));
        assert_eq!(table.cell(3, 3), &CellValue::Number(1.0));
        assert!(table.cell(1, 1).is_empty());
    }

    #[test]
    fn test_parse_empty_range() {
        let range: Range<Data> = Range::empty();
        let table = parse_table("Blank", &range);
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.title(), "Blank");
    }
}
