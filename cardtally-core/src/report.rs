//! Assembly of output tables: per-workbook summary, per-operator report, row counts

use chrono::Datelike;
use std::collections::BTreeMap;

use crate::aggregate::SummaryRecord;
use crate::reader::CellValue;
use crate::title::TitleKey;

/// Label of the grand-total row
pub const TOTAL_LABEL: &str = "总计";

pub const SUMMARY_HEADER: [&str; 5] =
    ["点位", "总数", "已领数量", "失败数量", "未领数量"];
pub const SUMMARY_WIDTHS: [f64; 5] = [30.0, 10.0, 10.0, 10.0, 10.0];

pub const COUNT_HEADER: [&str; 2] = ["点位", "数量"];
pub const COUNT_WIDTHS: [f64; 2] = [30.0, 10.0];

/// A table ready to be written as a worksheet.
///
/// An empty row is written as a blank separator line.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTable {
    pub name: String,
    pub header: Vec<String>,
    /// Column widths in character units, first column first
    pub column_widths: Vec<f64>,
    pub rows: Vec<Vec<CellValue>>,
}

impl OutputTable {
    pub fn new(name: impl Into<String>, header: &[&str], column_widths: &[f64]) -> Self {
        Self {
            name: name.into(),
            header: header.iter().map(|h| h.to_string()).collect(),
            column_widths: column_widths.to_vec(),
            rows: Vec::new(),
        }
    }

    pub fn push_separator(&mut self) {
        self.rows.push(Vec::new());
    }

    /// Header followed by the data rows, as written to the sheet
    pub fn all_rows(&self) -> impl Iterator<Item = Vec<CellValue>> + '_ {
        let header = (!self.header.is_empty())
            .then(|| self.header.iter().map(|h| CellValue::from(h.as_str())).collect::<Vec<_>>());
        header.into_iter().chain(self.rows.iter().cloned())
    }
}

/// Summary sheet: one row per record, a blank line, then the column-wise totals.
///
/// Returns `None` for no records; nothing should be written in that case.
pub fn build_summary(name: &str, records: &[SummaryRecord]) -> Option<OutputTable> {
    if records.is_empty() {
        return None;
    }

    let mut table = OutputTable::new(name, &SUMMARY_HEADER, &SUMMARY_WIDTHS);
    table.rows.extend(records.iter().map(SummaryRecord::to_row));

    let sum = |f: fn(&SummaryRecord) -> usize| records.iter().map(f).sum::<usize>();
    table.push_separator();
    table.rows.push(vec![
        CellValue::from(TOTAL_LABEL),
        CellValue::from(sum(|r| r.total)),
        CellValue::from(sum(|r| r.succeeded)),
        CellValue::from(sum(|r| r.failed)),
        CellValue::from(sum(|r| r.pending)),
    ]);

    Some(table)
}

/// Group rows by operator, date-ordered within each group, with a blank line
/// wherever consecutive rows fall in different ISO weeks
pub fn build_grouped_report(
    entries: Vec<(TitleKey, Vec<CellValue>)>,
    header: &[&str],
    column_widths: &[f64],
) -> BTreeMap<String, OutputTable> {
    let mut groups: BTreeMap<String, Vec<(TitleKey, Vec<CellValue>)>> = BTreeMap::new();
    for (key, row) in entries {
        groups.entry(key.operator.clone()).or_default().push((key, row));
    }

    groups
        .into_iter()
        .map(|(operator, mut group)| {
            group.sort_by_key(|(key, _)| key.date);

            let mut table = OutputTable::new(operator.as_str(), header, column_widths);
            let mut previous_week = None;
            for (key, row) in group {
                let week = key.date.iso_week();
                if previous_week.is_some_and(|w| w != week) {
                    table.push_separator();
                }
                previous_week = Some(week);
                table.rows.push(row);
            }
            (operator, table)
        })
        .collect()
}

/// Row counts of one file's sheets, a blank line, then the supplied grand total.
///
/// `grand_total` comes from the whole file and is not re-derived from `rows`,
/// which may omit filtered sheets.
pub fn build_count_report(name: &str, rows: &[(String, usize)], grand_total: usize) -> OutputTable {
    let mut table = OutputTable::new(name, &COUNT_HEADER, &COUNT_WIDTHS);
    table.rows.extend(
        rows.iter()
            .map(|(title, count)| vec![CellValue::from(title.as_str()), CellValue::from(*count)]),
    );
    table.push_separator();
    table
        .rows
        .push(vec![CellValue::from(TOTAL_LABEL), CellValue::from(grand_total)]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn key(month: u32, day: u32, operator: &str) -> TitleKey {
        TitleKey {
            date: NaiveDate::from_ymd_opt(2022, month, day).unwrap(),
            location: "Park".to_string(),
            operator: operator.to_string(),
        }
    }

    fn label(s: &str) -> Vec<CellValue> {
        vec![CellValue::from(s)]
    }

    #[test]
    fn test_build_summary_empty_is_noop() {
        assert_eq!(build_summary("汇总", &[]), None);
    }

    #[test]
    fn test_build_summary_totals() {
        let records = vec![
            SummaryRecord::new("01.03-A", 5, 2, 1),
            SummaryRecord::new("02.03-B", 4, 3, 0),
        ];
        let table = build_summary("汇总", &records).unwrap();

        assert_eq!(table.name, "汇总");
        assert_eq!(table.header, SUMMARY_HEADER.map(String::from).to_vec());
        assert_eq!(table.rows.len(), 4);
        assert!(table.rows[2].is_empty());
        assert_eq!(
            table.rows[3],
            vec![
                CellValue::from(TOTAL_LABEL),
                CellValue::Number(9.0),
                CellValue::Number(5.0),
                CellValue::Number(1.0),
                CellValue::Number(3.0),
            ]
        );
    }

    #[test]
    fn test_grouped_report_week_separators() {
        // 2022-03-07 is a Monday
        let entries = vec![
            (key(3, 9, "Wu"), label("09.03")),
            (key(3, 7, "Wu"), label("07.03")),
            (key(3, 14, "Wu"), label("14.03")),
            (key(3, 1, "Qian"), label("01.03")),
            (key(3, 13, "Wu"), label("13.03")),
        ];
        let report = build_grouped_report(entries, &SUMMARY_HEADER, &SUMMARY_WIDTHS);

        assert_eq!(report.keys().collect::<Vec<_>>(), vec!["Qian", "Wu"]);
        assert_eq!(report["Qian"].rows, vec![label("01.03")]);
        assert_eq!(
            report["Wu"].rows,
            vec![
                label("07.03"),
                label("09.03"),
                label("13.03"),
                Vec::new(),
                label("14.03"),
            ]
        );
        assert_eq!(report["Wu"].name, "Wu");
    }

    #[test]
    fn test_grouped_report_first_row_has_no_separator() {
        let entries = vec![(key(6, 1, "Zhou"), label("a"))];
        let report = build_grouped_report(entries, &COUNT_HEADER, &COUNT_WIDTHS);
        assert_eq!(report["Zhou"].rows, vec![label("a")]);
    }

    #[test]
    fn test_count_report_uses_supplied_total() {
        let rows = vec![("01.03-A".to_string(), 3), ("02.03-B".to_string(), 4)];
        let table = build_count_report("progress", &rows, 12);

        assert_eq!(table.rows.len(), 4);
        assert!(table.rows[2].is_empty());
        assert_eq!(
            table.rows[3],
            vec![CellValue::from(TOTAL_LABEL), CellValue::Number(12.0)]
        );
    }

    #[test]
    fn test_all_rows_prepends_header() {
        let table = build_count_report("x", &[], 0);
        let rows: Vec<_> = table.all_rows().collect();
        assert_eq!(rows[0], vec![CellValue::from("点位"), CellValue::from("数量")]);
        assert_eq!(rows.len(), 3);
    }
}
