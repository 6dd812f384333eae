//! End-to-end flows over workbooks: in-place summary, count report,
//! per-operator report, and cross-workbook reconciliation

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::aggregate::{RowColumns, SummaryRecord, ensure_matching_counts, summarize};
use crate::config::{ColumnConfig, TallyConfig};
use crate::error::TallyError;
use crate::reader::{CellValue, Table};
use crate::report::{
    OutputTable, SUMMARY_HEADER, SUMMARY_WIDTHS, build_count_report, build_grouped_report,
    build_summary,
};
use crate::session::WorkbookSession;
use crate::title::TitleParser;
use crate::writer::{self, MAX_SHEET_NAME_LEN};

/// Resolve the required columns of every sheet, failing on the first sheet
/// that lacks one
pub fn validate_headers<'a, I>(
    tables: I,
    columns: &ColumnConfig,
) -> Result<Vec<RowColumns>, TallyError>
where
    I: IntoIterator<Item = &'a Table>,
{
    tables
        .into_iter()
        .map(|table| {
            table.require_column(&columns.serial)?;
            RowColumns::resolve(table, columns)
        })
        .collect()
}

/// Rebuild the summary sheet of the workbook at `path` and sort its sheets by date.
///
/// The old summary sheet is dropped, every remaining sheet is summarized, the
/// new summary is appended, and sheets are ordered with the summary first.
/// Any error leaves both the file and an already-open handle as they were.
pub fn regenerate_summary(
    session: &mut WorkbookSession,
    path: &Path,
    config: &TallyConfig,
) -> Result<Vec<SummaryRecord>> {
    let parser = TitleParser::new(config.titles.clone());

    session
        .with_workbook(path, |wb| {
            log::info!("Processing {}", path.display());

            let sheets: Vec<&Table> = wb
                .tables()
                .iter()
                .filter(|t| !parser.is_summary(t.title()))
                .collect();
            let columns = validate_headers(sheets.iter().copied(), &config.columns)?;
            let records = sheets
                .iter()
                .zip(&columns)
                .map(|(table, cols)| summarize(table, cols))
                .collect::<Result<Vec<_>, _>>()?;
            for table in &sheets {
                parser.sort_key(table.title())?;
            }

            let Some(summary) = build_summary(parser.summary_title(), &records) else {
                log::warn!("No sheets to summarize in {}, leaving it unchanged", path.display());
                return Ok(records);
            };

            wb.with_rollback(|wb| {
                wb.remove_table(parser.summary_title());
                wb.add_table(summary)?;
                wb.try_reorder_tables(|table| parser.sort_key(table.title()))?;
                log::info!("Sorted {}", path.display());
                wb.save(path)
            })?;
            Ok(records)
        })
        .with_context(|| format!("Failed to summarize {}", path.display()))
}

/// Non-blank rows of `column` across every sheet except the summary sheet
pub fn total_rows(
    session: &mut WorkbookSession,
    path: &Path,
    column: &str,
    config: &TallyConfig,
) -> Result<usize> {
    let parser = TitleParser::new(config.titles.clone());
    session.with_workbook(path, |wb| Ok(column_total(wb.tables(), column, &parser)?))
}

fn column_total(tables: &[Table], column: &str, parser: &TitleParser) -> Result<usize, TallyError> {
    let mut total = 0;
    for table in tables {
        if parser.is_summary(table.title()) {
            continue;
        }
        let col = table.require_column(column)?;
        total += table.count_nonblank(&col, true);
    }
    Ok(total)
}

/// Value of one cell of a named sheet
pub fn get_cell_value(
    session: &mut WorkbookSession,
    path: &Path,
    table: &str,
    row: usize,
    col: usize,
) -> Result<CellValue> {
    session.with_workbook(path, |wb| {
        wb.get_cell(table, row, col)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("{}: no sheet named '{}'", path.display(), table))
    })
}

/// Whether every sheet holds `expected` at the given cell
pub fn check_cell_value(
    session: &mut WorkbookSession,
    path: &Path,
    row: usize,
    col: usize,
    expected: &CellValue,
) -> Result<bool> {
    session.with_workbook(path, |wb| {
        Ok(wb.tables().iter().all(|t| t.cell(row, col) == expected))
    })
}

/// Write one row-count sheet per input workbook to `output`.
///
/// Dated sheets are listed in date order. The grand total is the
/// [`total_rows`] figure and so also covers sheets whose titles carry no date.
/// Nothing is written when `paths` is empty.
pub fn count_report<P: AsRef<Path>>(
    session: &mut WorkbookSession,
    paths: &[P],
    column: &str,
    config: &TallyConfig,
    output: &Path,
) -> Result<Vec<OutputTable>> {
    let parser = TitleParser::new(config.titles.clone());
    let mut names = HashSet::new();
    let mut tables = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let (rows, grand_total) = session.with_workbook(path, |wb| {
            let mut dated = Vec::new();
            for table in wb.tables() {
                if parser.is_summary(table.title()) {
                    continue;
                }
                let Ok(date) = parser.sort_key(table.title()) else {
                    log::debug!("Not listing undated sheet '{}'", table.title());
                    continue;
                };
                let col = table.require_column(column)?;
                dated.push((date, table.title().to_string(), table.count_nonblank(&col, true)));
            }
            dated.sort_by_key(|(date, _, _)| *date);
            let rows: Vec<(String, usize)> = dated
                .into_iter()
                .map(|(_, title, count)| (title, count))
                .collect();
            Ok((rows, column_total(wb.tables(), column, &parser)?))
        })?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = unique_sheet_name(&stem, &mut names);
        tables.push(build_count_report(&name, &rows, grand_total));
    }

    if tables.is_empty() {
        log::warn!("No workbooks to count, {} not written", output.display());
        return Ok(tables);
    }
    writer::create_workbook(output, &tables)?;
    Ok(tables)
}

/// Write one sheet per operator to `output`, listing the summary of every
/// dated sheet across `paths`, with a blank line between ISO weeks
pub fn performance_report<P: AsRef<Path>>(
    session: &mut WorkbookSession,
    paths: &[P],
    config: &TallyConfig,
    output: &Path,
) -> Result<BTreeMap<String, OutputTable>> {
    let parser = TitleParser::new(config.titles.clone());
    let mut entries = Vec::new();

    for path in paths {
        let path = path.as_ref();
        let mut file_entries = session
            .with_workbook(path, |wb| {
                let mut found = Vec::new();
                for table in wb.tables() {
                    if parser.is_summary(table.title()) {
                        continue;
                    }
                    let key = parser.parse(table.title())?;
                    let columns = RowColumns::resolve(table, &config.columns)?;
                    let record = summarize(table, &columns)?;
                    found.push((key, record.to_row()));
                }
                Ok(found)
            })
            .with_context(|| format!("Failed to read {}", path.display()))?;
        entries.append(&mut file_entries);
    }

    let report = build_grouped_report(entries, &SUMMARY_HEADER, &SUMMARY_WIDTHS);
    if report.is_empty() {
        log::warn!("No dated sheets found, {} not written", output.display());
        return Ok(report);
    }

    let tables: Vec<OutputTable> = report.values().cloned().collect();
    writer::create_workbook(output, &tables)?;
    Ok(report)
}

/// Check that every sheet of `left` has a counterpart of the same title in
/// `right` with as many non-blank rows in the paired columns.
///
/// Returns the matched `(title, count)` pairs in `left`'s sheet order.
pub fn reconcile(
    session: &mut WorkbookSession,
    left: &Path,
    right: &Path,
    left_column: &str,
    right_column: &str,
    config: &TallyConfig,
) -> Result<Vec<(String, usize)>> {
    let parser = TitleParser::new(config.titles.clone());
    let left_tables: Vec<Table> = session.with_workbook(left, |wb| {
        Ok(wb
            .tables()
            .iter()
            .filter(|t| !parser.is_summary(t.title()))
            .cloned()
            .collect())
    })?;

    session.with_workbook(right, |wb| {
        let mut matched = Vec::with_capacity(left_tables.len());
        for left_table in &left_tables {
            let right_table = wb.table(left_table.title()).ok_or_else(|| TallyError::MissingTable {
                workbook: right.display().to_string(),
                table: left_table.title().to_string(),
            })?;

            let lc = left_table.require_column(left_column)?;
            let rc = right_table.require_column(right_column)?;
            let count = ensure_matching_counts(left_table, &lc, right_table, &rc)?;
            matched.push((left_table.title().to_string(), count));
        }

        if let Some(extra) = wb.tables().iter().find(|t| {
            !parser.is_summary(t.title()) && !left_tables.iter().any(|l| l.title() == t.title())
        }) {
            return Err(TallyError::MissingTable {
                workbook: left.display().to_string(),
                table: extra.title().to_string(),
            }
            .into());
        }
        Ok(matched)
    })
}

/// Sheet name derived from `base` that is not yet in `taken`
fn unique_sheet_name(base: &str, taken: &mut HashSet<String>) -> String {
    let base = writer::sanitize_sheet_name(base);
    let mut candidate = base.clone();
    let mut n = 2;
    while taken.contains(&writer::sheet_name_key(&candidate)) {
        let suffix = format!("_{}", n);
        let keep = MAX_SHEET_NAME_LEN.saturating_sub(suffix.chars().count());
        candidate = base.chars().take(keep).chain(suffix.chars()).collect();
        n += 1;
    }
    taken.insert(writer::sheet_name_key(&candidate));
    candidate
}
