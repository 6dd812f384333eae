//! XLSX writer functionality for removing, appending and reordering sheets

use anyhow::{Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use super::sheet_xml::{WORKSHEET_CONTENT_TYPE, WORKSHEET_REL_TYPE, worksheet_xml};
use crate::report::OutputTable;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const CALC_CHAIN_PART: &str = "xl/calcChain.xml";

/// Struct used to define modifications to be applied to a workbook
#[derive(Debug, Default)]
pub struct WorkbookModifications {
    pub remove_sheets: HashSet<String>,
    /// New sheets, appended after the existing ones
    pub append_sheets: Vec<OutputTable>,
    /// Final sheet order by name; unlisted sheets follow in their current order
    pub sheet_order: Option<Vec<String>>,
}

impl WorkbookModifications {
    pub fn is_empty(&self) -> bool {
        self.remove_sheets.is_empty() && self.append_sheets.is_empty() && self.sheet_order.is_none()
    }
}

/// A `<sheet>` element of workbook.xml
#[derive(Debug, Clone)]
struct SheetEntry {
    name: String,
    sheet_id: u32,
    rel_id: String,
    /// All attributes in document order, values unescaped
    attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Relationship {
    id: String,
    target: String,
}

/// Modify an XLSX file by applying specified modifications
pub fn modify_workbook_xlsx<W: Write + Seek>(
    input_path: &Path,
    output: W,
    modifications: &WorkbookModifications,
) -> Result<()> {
    let file = File::open(input_path)
        .with_context(|| format!("Failed to open workbook: {}", input_path.display()))?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let mut zip_writer = ZipWriter::new(output);
    let options = SimpleFileOptions::default();

    let workbook_xml = read_file_from_zip(&mut archive, WORKBOOK_PART)?;
    let rels_xml = read_file_from_zip(&mut archive, WORKBOOK_RELS_PART)?;
    let sheets = parse_sheet_entries(&workbook_xml)?;
    let rels = parse_relationships(&rels_xml)?;
    let existing_parts: HashSet<String> = archive.file_names().map(str::to_string).collect();

    // Parts and relationships dropped with removed sheets
    let mut removed_parts = HashSet::new();
    let mut removed_rel_ids = HashSet::new();
    for sheet in sheets
        .iter()
        .filter(|s| modifications.remove_sheets.contains(&s.name))
    {
        removed_rel_ids.insert(sheet.rel_id.clone());
        if let Some(rel) = rels.iter().find(|r| r.id == sheet.rel_id) {
            let part = resolve_target(&rel.target);
            removed_parts.insert(part_rels_path(&part));
            removed_parts.insert(part);
        }
    }
    if !removed_rel_ids.is_empty() {
        // calcChain indexes cells by sheet; Excel rebuilds it when absent
        removed_parts.insert(CALC_CHAIN_PART.to_string());
        for rel in &rels {
            if resolve_target(&rel.target) == CALC_CHAIN_PART {
                removed_rel_ids.insert(rel.id.clone());
            }
        }
    }

    let mut final_sheets: Vec<SheetEntry> = sheets
        .iter()
        .filter(|s| !modifications.remove_sheets.contains(&s.name))
        .cloned()
        .collect();

    // Allocate part names, relationship ids and sheet ids for new sheets
    let mut used_parts = existing_parts.clone();
    let mut used_rel_ids: HashSet<String> = rels.iter().map(|r| r.id.clone()).collect();
    let mut next_sheet_id = sheets.iter().map(|s| s.sheet_id).max().unwrap_or(0) + 1;
    let mut new_parts = Vec::new();
    let mut new_rels = Vec::new();

    for table in &modifications.append_sheets {
        if final_sheets
            .iter()
            .any(|s| super::same_sheet_name(&s.name, &table.name))
        {
            anyhow::bail!(
                "Sheet '{}' already exists in {}",
                table.name,
                input_path.display()
            );
        }

        let part = next_free(&used_parts, |n| format!("xl/worksheets/sheet{}.xml", n));
        used_parts.insert(part.clone());
        let rel_id = next_free(&used_rel_ids, |n| format!("rId{}", n));
        used_rel_ids.insert(rel_id.clone());

        let sheet_id = next_sheet_id;
        next_sheet_id += 1;

        final_sheets.push(SheetEntry {
            name: table.name.clone(),
            sheet_id,
            rel_id: rel_id.clone(),
            attrs: vec![
                ("name".to_string(), table.name.clone()),
                ("sheetId".to_string(), sheet_id.to_string()),
                ("r:id".to_string(), rel_id.clone()),
            ],
        });
        new_rels.push(Relationship {
            id: rel_id,
            target: part.trim_start_matches("xl/").to_string(),
        });
        new_parts.push((part, table));
    }

    if let Some(order) = &modifications.sheet_order {
        final_sheets.sort_by_key(|s| order.iter().position(|n| *n == s.name).unwrap_or(usize::MAX));
    }

    if final_sheets.is_empty() {
        anyhow::bail!("Workbook {} would have no sheets left", input_path.display());
    }

    let local_ids: Vec<Option<usize>> = sheets
        .iter()
        .map(|old| final_sheets.iter().position(|s| s.rel_id == old.rel_id))
        .collect();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = file.name().to_string();

        if removed_parts.contains(&name) {
            continue;
        }

        let content = match name.as_str() {
            WORKBOOK_PART => {
                rewrite_workbook_xml(&workbook_xml, &final_sheets, &local_ids)?.into_bytes()
            }
            WORKBOOK_RELS_PART => {
                rewrite_relationships(&rels_xml, &removed_rel_ids, &new_rels)?.into_bytes()
            }
            CONTENT_TYPES_PART => {
                let mut content = String::new();
                file.read_to_string(&mut content)?;
                let added: Vec<&str> = new_parts.iter().map(|(p, _)| p.as_str()).collect();
                rewrite_content_types(&content, &removed_parts, &added)?.into_bytes()
            }
            _ => {
                let mut buffer = Vec::new();
                file.read_to_end(&mut buffer)?;
                buffer
            }
        };

        zip_writer.start_file(name.as_str(), options)?;
        zip_writer.write_all(&content)?;
    }

    for (part, table) in &new_parts {
        zip_writer.start_file(part.as_str(), options)?;
        zip_writer.write_all(&worksheet_xml(table)?)?;
    }

    zip_writer.finish()?;
    Ok(())
}

// Helper functions

fn read_file_from_zip(archive: &mut ZipArchive<BufReader<File>>, filename: &str) -> Result<String> {
    let mut file = archive
        .by_name(filename)
        .with_context(|| format!("Missing package part {}", filename))?;
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(content)
}

/// First candidate produced by `make(1..)` that is not in `used`
fn next_free(used: &HashSet<String>, make: impl Fn(usize) -> String) -> String {
    (1..)
        .map(make)
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_default()
}

/// Resolve a relationship target of workbook.xml.rels to a package part path
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

/// `xl/worksheets/sheet1.xml` -> `xl/worksheets/_rels/sheet1.xml.rels`
fn part_rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

fn attributes_of(e: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8(attr.key.as_ref().to_vec())?;
        let value = attr.unescape_value()?.into_owned();
        attrs.push((key, value));
    }
    Ok(attrs)
}

fn parse_sheet_entries(workbook_xml: &str) -> Result<Vec<SheetEntry>> {
    let mut reader = Reader::from_str(workbook_xml);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"sheet" => {
                let attrs = attributes_of(&e)?;
                let mut entry = SheetEntry {
                    name: String::new(),
                    sheet_id: 0,
                    rel_id: String::new(),
                    attrs: Vec::new(),
                };
                for (key, value) in &attrs {
                    match key.as_str() {
                        "name" => entry.name = value.clone(),
                        "sheetId" => entry.sheet_id = value.parse()?,
                        // r:id, whatever the relationships prefix is bound to
                        k if k.ends_with(":id") => entry.rel_id = value.clone(),
                        _ => {}
                    }
                }
                entry.attrs = attrs;
                sheets.push(entry);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("Error parsing XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

fn parse_relationships(rels_xml: &str) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_str(rels_xml);
    let mut buf = Vec::new();
    let mut rels = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"Relationship" => {
                let mut rel = Relationship {
                    id: String::new(),
                    target: String::new(),
                };
                for (key, value) in attributes_of(&e)? {
                    match key.as_str() {
                        "Id" => rel.id = value,
                        "Target" => rel.target = value,
                        _ => {}
                    }
                }
                rels.push(rel);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(anyhow::anyhow!("Error parsing XML: {}", e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

fn write_sheet_entries(writer: &mut Writer<Cursor<Vec<u8>>>, sheets: &[SheetEntry]) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new("sheets")))?;
    for sheet in sheets {
        let mut el = BytesStart::new("sheet");
        for (key, value) in &sheet.attrs {
            el.push_attribute((key.as_str(), value.as_str()));
        }
        writer.write_event(Event::Empty(el))?;
    }
    writer.write_event(Event::End(BytesEnd::new("sheets")))?;
    Ok(())
}

/// Replace the `<sheets>` list and drop view attributes that index into it.
///
/// `local_ids[i]` is the new position of the sheet that was at position `i`,
/// or `None` if it was removed. Sheet-scoped defined names follow their sheet
/// and are dropped with it.
fn rewrite_workbook_xml(
    xml: &str,
    sheets: &[SheetEntry],
    local_ids: &[Option<usize>],
) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();
    let mut inside_sheets = false;
    let mut skipping_name = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"sheets" => {
                inside_sheets = true;
                write_sheet_entries(&mut writer, sheets)?;
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"sheets" => {
                write_sheet_entries(&mut writer, sheets)?;
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"sheets" => {
                inside_sheets = false;
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"workbookView" => {
                writer.write_event(Event::Start(without_view_indices(&e)?))?;
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"workbookView" => {
                writer.write_event(Event::Empty(without_view_indices(&e)?))?;
            }
            Ok(Event::Start(e)) if e.name().as_ref() == b"definedName" => {
                match remap_local_sheet_id(&e, local_ids)? {
                    Some(name) => writer.write_event(Event::Start(name))?,
                    None => skipping_name = true,
                }
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"definedName" => {
                if let Some(name) = remap_local_sheet_id(&e, local_ids)? {
                    writer.write_event(Event::Empty(name))?;
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"definedName" => {
                if !std::mem::take(&mut skipping_name) {
                    writer.write_event(Event::End(e))?;
                }
            }
            Ok(Event::Eof) => break,
            Ok(e) => {
                if !inside_sheets && !skipping_name {
                    writer.write_event(e)?;
                }
            }
            Err(e) => return Err(anyhow::anyhow!("Error parsing XML: {}", e)),
        }
        buf.clear();
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

fn without_view_indices(e: &BytesStart) -> Result<BytesStart<'static>> {
    let mut view = BytesStart::new("workbookView");
    for attr in e.attributes() {
        let attr = attr?;
        if !matches!(attr.key.as_ref(), b"activeTab" | b"firstSheet") {
            view.push_attribute(attr);
        }
    }
    Ok(view)
}

/// `definedName` with its `localSheetId` moved to the sheet's new position,
/// or `None` when the sheet it is scoped to no longer exists
fn remap_local_sheet_id(
    e: &BytesStart,
    local_ids: &[Option<usize>],
) -> Result<Option<BytesStart<'static>>> {
    let mut name = BytesStart::new("definedName");
    for (key, value) in attributes_of(e)? {
        if key == "localSheetId" {
            let old: usize = value.parse()?;
            let Some(new) = local_ids.get(old).copied().flatten() else {
                return Ok(None);
            };
            name.push_attribute((key.as_str(), new.to_string().as_str()));
        } else {
            name.push_attribute((key.as_str(), value.as_str()));
        }
    }
    Ok(Some(name))
}

fn rewrite_relationships(
    xml: &str,
    removed_ids: &HashSet<String>,
    added: &[Relationship],
) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) if e.name().as_ref() == b"Relationship" => {
                let id = attributes_of(&e)?
                    .into_iter()
                    .find(|(k, _)| k == "Id")
                    .map(|(_, v)| v)
                    .unwrap_or_default();

                if !removed_ids.contains(&id) {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"Relationships" => {
                for rel in added {
                    let mut el = BytesStart::new("Relationship");
                    el.push_attribute(("Id", rel.id.as_str()));
                    el.push_attribute(("Type", WORKSHEET_REL_TYPE));
                    el.push_attribute(("Target", rel.target.as_str()));
                    writer.write_event(Event::Empty(el))?;
                }
                writer.write_event(Event::End(e))?;
            }
            Ok(Event::Eof) => break,
            Ok(e) => writer.write_event(e)?,
            Err(e) => return Err(anyhow::anyhow!("Error parsing XML: {}", e)),
        }
        buf.clear();
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

fn rewrite_content_types(
    xml: &str,
    removed_parts: &HashSet<String>,
    added_parts: &[&str],
) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e)) if e.name().as_ref() == b"Override" => {
                let part_name = attributes_of(&e)?
                    .into_iter()
                    .find(|(k, _)| k == "PartName")
                    .map(|(_, v)| v)
                    .unwrap_or_default();

                // Skip overrides of parts we're removing
                if !removed_parts.contains(part_name.trim_start_matches('/')) {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"Types" => {
                for part in added_parts {
                    let part_name = format!("/{}", part);
                    let mut el = BytesStart::new("Override");
                    el.push_attribute(("PartName", part_name.as_str()));
                    el.push_attribute(("ContentType", WORKSHEET_CONTENT_TYPE));
                    writer.write_event(Event::Empty(el))?;
                }
                writer.write_event(Event::End(e))?;
            }
            Ok(Event::Eof) => break,
            Ok(e) => writer.write_event(e)?,
            Err(e) => return Err(anyhow::anyhow!("Error parsing XML: {}", e)),
        }
        buf.clear();
    }

    let result = writer.into_inner().into_inner();
    Ok(String::from_utf8(result)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><bookViews><workbookView activeTab="2" windowWidth="100"/></bookViews><sheets><sheet name="A &amp; B" sheetId="1" r:id="rId1"/><sheet name="汇总" sheetId="4" state="hidden" r:id="rId2"/></sheets></workbook>"#;

    fn entries() -> Vec<SheetEntry> {
        parse_sheet_entries(WORKBOOK).unwrap()
    }

    #[test]
    fn test_parse_sheet_entries() {
        let sheets = entries();
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0].name, "A & B");
        assert_eq!(sheets[1].sheet_id, 4);
        assert_eq!(sheets[1].rel_id, "rId2");
    }

    #[test]
    fn test_rewrite_workbook_reorders_and_keeps_attributes() -> Result<()> {
        let mut sheets = entries();
        sheets.reverse();
        let xml = rewrite_workbook_xml(WORKBOOK, &sheets, &[Some(1), Some(0)])?;

        let summary = xml.find(r#"name="汇总""#).unwrap();
        let first = xml.find(r#"name="A &amp; B""#).unwrap();
        assert!(summary < first);
        assert!(xml.contains(r#"state="hidden""#));
        assert!(!xml.contains("activeTab"));
        assert!(xml.contains(r#"windowWidth="100""#));
        Ok(())
    }

    #[test]
    fn test_defined_names_follow_their_sheet() -> Result<()> {
        let xml = r#"<workbook><bookViews><workbookView activeTab="1"><extLst><ext uri="x"/></extLst></workbookView></bookViews><sheets><sheet name="a" sheetId="1" r:id="rId1"/><sheet name="b" sheetId="2" r:id="rId2"/><sheet name="c" sheetId="3" r:id="rId3"/></sheets><definedNames><definedName name="_xlnm.Print_Area" localSheetId="0">'a'!$A$1:$C$2</definedName><definedName name="_xlnm._FilterDatabase" localSheetId="1" hidden="1">'b'!$A$1:$B$9</definedName><definedName name="Rate">'c'!$A$1</definedName></definedNames></workbook>"#;
        let sheets = parse_sheet_entries(xml)?;
        // b removed, c moved to the front, a second
        let reordered = vec![sheets[2].clone(), sheets[0].clone()];
        let out = rewrite_workbook_xml(xml, &reordered, &[Some(1), None, Some(0)])?;

        assert!(out.contains(
            r#"<definedName name="_xlnm.Print_Area" localSheetId="1">'a'!$A$1:$C$2</definedName>"#
        ));
        assert!(!out.contains("_FilterDatabase"));
        assert!(!out.contains("'b'!"));
        assert!(out.contains(r#"<definedName name="Rate">'c'!$A$1</definedName>"#));
        assert!(out.contains(
            r#"<bookViews><workbookView><extLst><ext uri="x"/></extLst></workbookView></bookViews>"#
        ));
        Ok(())
    }

    #[test]
    fn test_rewrite_relationships() -> Result<()> {
        let rels = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="t" Target="worksheets/sheet1.xml"/><Relationship Id="rId2" Type="t" Target="/xl/worksheets/sheet2.xml"/></Relationships>"#;
        let parsed = parse_relationships(rels)?;
        assert_eq!(resolve_target(&parsed[1].target), "xl/worksheets/sheet2.xml");

        let removed: HashSet<String> = ["rId1".to_string()].into_iter().collect();
        let added = vec![Relationship {
            id: "rId3".to_string(),
            target: "worksheets/sheet3.xml".to_string(),
        }];
        let xml = rewrite_relationships(rels, &removed, &added)?;

        assert!(!xml.contains(r#"Id="rId1""#));
        assert!(xml.contains(r#"Id="rId2""#));
        assert!(xml.contains(r#"Target="worksheets/sheet3.xml""#));
        Ok(())
    }

    #[test]
    fn test_rewrite_content_types() -> Result<()> {
        let types = r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Override PartName="/xl/worksheets/sheet1.xml" ContentType="x"/><Override PartName="/xl/calcChain.xml" ContentType="y"/></Types>"#;
        let removed: HashSet<String> = [CALC_CHAIN_PART.to_string()].into_iter().collect();
        let xml = rewrite_content_types(types, &removed, &["xl/worksheets/sheet2.xml"])?;

        assert!(xml.contains("/xl/worksheets/sheet1.xml"));
        assert!(!xml.contains("calcChain"));
        assert!(xml.contains(r#"PartName="/xl/worksheets/sheet2.xml""#));
        Ok(())
    }

    #[test]
    fn test_part_paths() {
        assert_eq!(
            part_rels_path("xl/worksheets/sheet1.xml"),
            "xl/worksheets/_rels/sheet1.xml.rels"
        );
        let used: HashSet<String> = ["rId1".to_string(), "rId2".to_string()].into_iter().collect();
        assert_eq!(next_free(&used, |n| format!("rId{}", n)), "rId3");
    }
}
