//! Writing new workbooks and rewriting sheets of existing ones

mod sheet_xml;
mod xlsx_writer;

pub use sheet_xml::{column_letter, worksheet_xml};
pub use xlsx_writer::{WorkbookModifications, modify_workbook_xlsx};

use anyhow::{Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::report::OutputTable;
use sheet_xml::{
    CONTENT_TYPES_NS, PACKAGE_RELATIONSHIPS_NS, RELATIONSHIPS_NS, SPREADSHEETML_NS,
    WORKSHEET_CONTENT_TYPE, WORKSHEET_REL_TYPE, xml_writer,
};

/// Longest sheet name Excel accepts
pub const MAX_SHEET_NAME_LEN: usize = 31;
const FORBIDDEN_SHEET_CHARS: [char; 7] = ['[', ']', ':', '*', '?', '/', '\\'];

/// Check a sheet name against Excel's naming rules
pub fn validate_sheet_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        anyhow::bail!("Sheet name must not be empty");
    }
    if name.chars().count() > MAX_SHEET_NAME_LEN {
        anyhow::bail!(
            "Sheet name '{}' exceeds {} characters",
            name,
            MAX_SHEET_NAME_LEN
        );
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_SHEET_CHARS.contains(c)) {
        anyhow::bail!("Sheet name '{}' contains forbidden character '{}'", name, c);
    }
    Ok(())
}

/// Key under which Excel considers two sheet names equal
pub fn sheet_name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Whether Excel treats `a` and `b` as the same sheet name
pub fn same_sheet_name(a: &str, b: &str) -> bool {
    sheet_name_key(a) == sheet_name_key(b)
}

/// Turn arbitrary text (e.g. a file stem) into a valid sheet name
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if FORBIDDEN_SHEET_CHARS.contains(&c) { '_' } else { c })
        .take(MAX_SHEET_NAME_LEN)
        .collect();
    if cleaned.trim().is_empty() {
        "Sheet".to_string()
    } else {
        cleaned
    }
}

/// Modify a workbook file (supports multiple operations).
///
/// The result is staged next to `output_path` and moved into place only once
/// fully written, so `input_path` and `output_path` may be the same file.
pub fn modify_workbook<P: AsRef<Path>>(
    input_path: P,
    output_path: P,
    modifications: &WorkbookModifications,
) -> Result<()> {
    let input = input_path.as_ref();

    for table in &modifications.append_sheets {
        validate_sheet_name(&table.name)?;
    }

    // Determine file type by extension
    match input.extension().and_then(|s| s.to_str()) {
        Some("xlsx") => write_staged(output_path.as_ref(), |file| {
            modify_workbook_xlsx(input, file, modifications)
        }),
        _ => anyhow::bail!(
            "Unsupported file format for modification: {}",
            input.display()
        ),
    }
}

/// Write a new workbook holding `tables`, one sheet each, in order
pub fn create_workbook<P: AsRef<Path>>(path: P, tables: &[OutputTable]) -> Result<()> {
    if tables.is_empty() {
        anyhow::bail!("A workbook needs at least one sheet");
    }
    let mut seen = HashSet::new();
    for table in tables {
        validate_sheet_name(&table.name)?;
        if !seen.insert(sheet_name_key(&table.name)) {
            anyhow::bail!("Duplicate sheet name '{}'", table.name);
        }
    }

    let path = path.as_ref();
    write_staged(path, |file| write_new_package(file, tables))?;
    log::info!("Wrote {} sheets to {}", tables.len(), path.display());
    Ok(())
}

fn write_new_package(file: File, tables: &[OutputTable]) -> Result<()> {
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default();

    zip.start_file("[Content_Types].xml", options)?;
    zip.write_all(&content_types_xml(tables.len())?)?;

    zip.start_file("_rels/.rels", options)?;
    zip.write_all(&package_rels_xml()?)?;

    zip.start_file("xl/workbook.xml", options)?;
    zip.write_all(&workbook_xml(tables)?)?;

    zip.start_file("xl/_rels/workbook.xml.rels", options)?;
    zip.write_all(&workbook_rels_xml(tables.len())?)?;

    for (i, table) in tables.iter().enumerate() {
        zip.start_file(format!("xl/worksheets/sheet{}.xml", i + 1), options)?;
        zip.write_all(&worksheet_xml(table)?)?;
    }

    zip.finish()?.flush()?;
    Ok(())
}

fn content_types_xml(sheet_count: usize) -> Result<Vec<u8>> {
    let mut writer = xml_writer()?;
    let mut root = BytesStart::new("Types");
    root.push_attribute(("xmlns", CONTENT_TYPES_NS));
    writer.write_event(Event::Start(root))?;

    for (extension, content_type) in [
        ("rels", "application/vnd.openxmlformats-package.relationships+xml"),
        ("xml", "application/xml"),
    ] {
        let mut el = BytesStart::new("Default");
        el.push_attribute(("Extension", extension));
        el.push_attribute(("ContentType", content_type));
        writer.write_event(Event::Empty(el))?;
    }

    let mut workbook = BytesStart::new("Override");
    workbook.push_attribute(("PartName", "/xl/workbook.xml"));
    workbook.push_attribute((
        "ContentType",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml",
    ));
    writer.write_event(Event::Empty(workbook))?;

    for i in 1..=sheet_count {
        let part_name = format!("/xl/worksheets/sheet{}.xml", i);
        let mut el = BytesStart::new("Override");
        el.push_attribute(("PartName", part_name.as_str()));
        el.push_attribute(("ContentType", WORKSHEET_CONTENT_TYPE));
        writer.write_event(Event::Empty(el))?;
    }

    writer.write_event(Event::End(BytesEnd::new("Types")))?;
    Ok(writer.into_inner().into_inner())
}

fn package_rels_xml() -> Result<Vec<u8>> {
    let mut writer = xml_writer()?;
    let mut root = BytesStart::new("Relationships");
    root.push_attribute(("xmlns", PACKAGE_RELATIONSHIPS_NS));
    writer.write_event(Event::Start(root))?;

    let mut rel = BytesStart::new("Relationship");
    rel.push_attribute(("Id", "rId1"));
    rel.push_attribute((
        "Type",
        "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument",
    ));
    rel.push_attribute(("Target", "xl/workbook.xml"));
    writer.write_event(Event::Empty(rel))?;

    writer.write_event(Event::End(BytesEnd::new("Relationships")))?;
    Ok(writer.into_inner().into_inner())
}

fn workbook_xml(tables: &[OutputTable]) -> Result<Vec<u8>> {
    let mut writer = xml_writer()?;
    let mut root = BytesStart::new("workbook");
    root.push_attribute(("xmlns", SPREADSHEETML_NS));
    root.push_attribute(("xmlns:r", RELATIONSHIPS_NS));
    writer.write_event(Event::Start(root))?;
    writer.write_event(Event::Start(BytesStart::new("sheets")))?;

    for (i, table) in tables.iter().enumerate() {
        let sheet_id = (i + 1).to_string();
        let rel_id = format!("rId{}", i + 1);
        let mut el = BytesStart::new("sheet");
        el.push_attribute(("name", table.name.as_str()));
        el.push_attribute(("sheetId", sheet_id.as_str()));
        el.push_attribute(("r:id", rel_id.as_str()));
        writer.write_event(Event::Empty(el))?;
    }

    writer.write_event(Event::End(BytesEnd::new("sheets")))?;
    writer.write_event(Event::End(BytesEnd::new("workbook")))?;
    Ok(writer.into_inner().into_inner())
}

fn workbook_rels_xml(sheet_count: usize) -> Result<Vec<u8>> {
    let mut writer = xml_writer()?;
    let mut root = BytesStart::new("Relationships");
    root.push_attribute(("xmlns", PACKAGE_RELATIONSHIPS_NS));
    writer.write_event(Event::Start(root))?;

    for i in 1..=sheet_count {
        let id = format!("rId{}", i);
        let target = format!("worksheets/sheet{}.xml", i);
        let mut rel = BytesStart::new("Relationship");
        rel.push_attribute(("Id", id.as_str()));
        rel.push_attribute(("Type", WORKSHEET_REL_TYPE));
        rel.push_attribute(("Target", target.as_str()));
        writer.write_event(Event::Empty(rel))?;
    }

    writer.write_event(Event::End(BytesEnd::new("Relationships")))?;
    Ok(writer.into_inner().into_inner())
}

/// Sibling path the output is staged at before being renamed into place
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Run `write` against a staging file, then rename it over `path`.
///
/// On failure the staging file is removed and `path` is left untouched.
fn write_staged(path: &Path, write: impl FnOnce(File) -> Result<()>) -> Result<()> {
    let staging = staging_path(path);
    let file = File::create(&staging)
        .with_context(|| format!("Failed to create {}", staging.display()))?;

    let result = write(file).and_then(|()| {
        fs::rename(&staging, path)
            .with_context(|| format!("Failed to move output into {}", path.display()))
    });
    if result.is_err() {
        let _ = fs::remove_file(&staging);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sheet_name() {
        assert!(validate_sheet_name("05.03-Park-Zhang").is_ok());
        assert!(validate_sheet_name("汇总").is_ok());
        assert!(validate_sheet_name("").is_err());
        assert!(validate_sheet_name("a/b").is_err());
        assert!(validate_sheet_name(&"x".repeat(32)).is_err());
    }

    #[test]
    fn test_sanitize_sheet_name() {
        assert_eq!(sanitize_sheet_name("2022 [final]"), "2022 _final_");
        assert_eq!(sanitize_sheet_name(&"长".repeat(40)).chars().count(), 31);
        assert_eq!(sanitize_sheet_name(""), "Sheet");
    }

    #[test]
    fn test_sheet_names_compare_case_insensitively() {
        assert!(same_sheet_name("Hall", "HALL"));
        assert!(same_sheet_name("汇总", "汇总"));
        assert!(!same_sheet_name("Hall", "Hall2"));
    }

    #[test]
    fn test_modify_rejects_unsupported_format() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("progress.ods");
        fs::write(&input, b"")?;
        let err = modify_workbook(&input, &input, &WorkbookModifications::default()).unwrap_err();
        assert!(err.to_string().contains("Unsupported file format"));
        Ok(())
    }

    #[test]
    fn test_staging_path() {
        assert_eq!(
            staging_path(Path::new("/tmp/report.xlsx")),
            PathBuf::from("/tmp/report.xlsx.partial")
        );
    }

    #[test]
    fn test_create_workbook_rejects_bad_input() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.xlsx");

        assert!(create_workbook(&path, &[]).is_err());

        let a = OutputTable::new("same", &["x"], &[10.0]);
        assert!(create_workbook(&path, &[a.clone(), a]).is_err());

        let upper = OutputTable::new("Hall", &["x"], &[10.0]);
        let lower = OutputTable::new("hall", &["x"], &[10.0]);
        assert!(create_workbook(&path, &[upper, lower]).is_err());
        assert!(!path.exists());
        Ok(())
    }
}
