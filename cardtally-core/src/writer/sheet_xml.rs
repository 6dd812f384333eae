//! SpreadsheetML parts generated from output tables

use anyhow::Result;
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Cursor;

use crate::reader::CellValue;
use crate::report::OutputTable;

pub(crate) const SPREADSHEETML_NS: &str =
    "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
pub(crate) const RELATIONSHIPS_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
pub(crate) const PACKAGE_RELATIONSHIPS_NS: &str =
    "http://schemas.openxmlformats.org/package/2006/relationships";
pub(crate) const CONTENT_TYPES_NS: &str =
    "http://schemas.openxmlformats.org/package/2006/content-types";
pub(crate) const WORKSHEET_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
pub(crate) const WORKSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";

/// Convert a 1-based column number to letters (1 -> A, 27 -> AA)
pub fn column_letter(mut col: usize) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

pub(crate) fn xml_writer() -> Result<Writer<Cursor<Vec<u8>>>> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), Some("yes"))))?;
    Ok(writer)
}

/// Worksheet part for `table`: column widths, header row, then data rows.
///
/// Blank separator rows produce no `<row>` element.
pub fn worksheet_xml(table: &OutputTable) -> Result<Vec<u8>> {
    let mut writer = xml_writer()?;

    let mut root = BytesStart::new("worksheet");
    root.push_attribute(("xmlns", SPREADSHEETML_NS));
    writer.write_event(Event::Start(root))?;

    if !table.column_widths.is_empty() {
        writer.write_event(Event::Start(BytesStart::new("cols")))?;
        for (i, width) in table.column_widths.iter().enumerate() {
            let index = (i + 1).to_string();
            let width = width.to_string();
            let mut col = BytesStart::new("col");
            col.push_attribute(("min", index.as_str()));
            col.push_attribute(("max", index.as_str()));
            col.push_attribute(("width", width.as_str()));
            col.push_attribute(("customWidth", "1"));
            writer.write_event(Event::Empty(col))?;
        }
        writer.write_event(Event::End(BytesEnd::new("cols")))?;
    }

    writer.write_event(Event::Start(BytesStart::new("sheetData")))?;
    for (i, row) in table.all_rows().enumerate() {
        if row.iter().all(CellValue::is_empty) {
            continue;
        }
        let row_number = (i + 1).to_string();
        let mut row_el = BytesStart::new("row");
        row_el.push_attribute(("r", row_number.as_str()));
        writer.write_event(Event::Start(row_el))?;

        for (j, cell) in row.iter().enumerate() {
            let reference = format!("{}{}", column_letter(j + 1), row_number);
            write_cell(&mut writer, &reference, cell)?;
        }
        writer.write_event(Event::End(BytesEnd::new("row")))?;
    }
    writer.write_event(Event::End(BytesEnd::new("sheetData")))?;
    writer.write_event(Event::End(BytesEnd::new("worksheet")))?;

    Ok(writer.into_inner().into_inner())
}

fn write_cell(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    reference: &str,
    cell: &CellValue,
) -> Result<()> {
    let mut c = BytesStart::new("c");
    c.push_attribute(("r", reference));

    match cell {
        CellValue::Empty => return Ok(()),
        CellValue::Number(n) if n.is_finite() => {
            writer.write_event(Event::Start(c))?;
            writer.write_event(Event::Start(BytesStart::new("v")))?;
            writer.write_event(Event::Text(BytesText::new(&n.to_string())))?;
            writer.write_event(Event::End(BytesEnd::new("v")))?;
        }
        other => {
            // Text is stored inline, the package has no shared string table
            c.push_attribute(("t", "inlineStr"));
            writer.write_event(Event::Start(c))?;
            writer.write_event(Event::Start(BytesStart::new("is")))?;
            let mut t = BytesStart::new("t");
            t.push_attribute(("xml:space", "preserve"));
            writer.write_event(Event::Start(t))?;
            writer.write_event(Event::Text(BytesText::new(&other.to_string())))?;
            writer.write_event(Event::End(BytesEnd::new("t")))?;
            writer.write_event(Event::End(BytesEnd::new("is")))?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new("c")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::build_count_report;

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(703), "AAA");
    }

    #[test]
    fn test_worksheet_xml() -> Result<()> {
        let rows = vec![("A&B".to_string(), 3)];
        let table = build_count_report("counts", &rows, 3);
        let xml = String::from_utf8(worksheet_xml(&table)?)?;

        assert!(xml.contains(r#"<col min="1" max="1" width="30" customWidth="1"/>"#));
        assert!(xml.contains(
            r#"<c r="A2" t="inlineStr"><is><t xml:space="preserve">A&amp;B</t></is></c>"#
        ));
        assert!(xml.contains(r#"<c r="B2"><v>3</v></c>"#));
        // Separator row 3 is omitted, totals land on row 4
        assert!(!xml.contains(r#"<row r="3">"#));
        assert!(xml.contains(r#"<row r="4">"#));
        Ok(())
    }
}
