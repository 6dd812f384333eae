//! Open workbooks, cached per path for the duration of one run

use anyhow::Result;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::reader::{self, CellValue, Table};
use crate::report::OutputTable;
use crate::writer::{self, WorkbookModifications};

/// One open workbook with its pending (unsaved) sheet changes
#[derive(Debug, Clone)]
pub struct WorkbookHandle {
    path: PathBuf,
    tables: Vec<Table>,
    removed: HashSet<String>,
    appended: Vec<OutputTable>,
    reordered: bool,
}

impl WorkbookHandle {
    /// Load every sheet of the workbook at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let workbook = reader::read_workbook(path)?;
        Ok(Self {
            path: workbook.path,
            tables: workbook.tables,
            removed: HashSet::new(),
            appended: Vec::new(),
            reordered: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sheets in their current order
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.title() == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.title()).collect()
    }

    /// Cell at a 1-based position of the named sheet
    pub fn get_cell(&self, table: &str, row: usize, col: usize) -> Option<&CellValue> {
        self.table(table).map(|t| t.cell(row, col))
    }

    pub fn is_modified(&self) -> bool {
        self.reordered || !self.removed.is_empty() || !self.appended.is_empty()
    }

    /// Remove a sheet by name; returns whether it existed
    pub fn remove_table(&mut self, name: &str) -> bool {
        let Some(pos) = self.tables.iter().position(|t| t.title() == name) else {
            return false;
        };
        self.tables.remove(pos);

        if let Some(appended) = self.appended.iter().position(|t| t.name == name) {
            self.appended.remove(appended);
        } else {
            self.removed.insert(name.to_string());
        }
        true
    }

    /// Append a new sheet after the existing ones
    pub fn add_table(&mut self, table: OutputTable) -> Result<()> {
        writer::validate_sheet_name(&table.name)?;
        if self
            .tables
            .iter()
            .any(|t| writer::same_sheet_name(t.title(), &table.name))
        {
            anyhow::bail!(
                "Sheet '{}' already exists in {}",
                table.name,
                self.path.display()
            );
        }
        self.tables
            .push(Table::new(table.name.as_str(), table.all_rows().collect()));
        self.appended.push(table);
        Ok(())
    }

    /// Stable-sort sheets with `compare`
    pub fn reorder_tables<F>(&mut self, compare: F)
    where
        F: FnMut(&Table, &Table) -> Ordering,
    {
        self.tables.sort_by(compare);
        self.reordered = true;
    }

    /// Stable-sort sheets by a fallible key; on error the order is unchanged
    pub fn try_reorder_tables<K, E, F>(&mut self, mut key: F) -> Result<(), E>
    where
        K: Ord,
        F: FnMut(&Table) -> Result<K, E>,
    {
        let keys = self
            .tables
            .iter()
            .map(&mut key)
            .collect::<Result<Vec<K>, E>>()?;

        let mut keyed: Vec<(K, Table)> = keys.into_iter().zip(self.tables.drain(..)).collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        self.tables = keyed.into_iter().map(|(_, table)| table).collect();
        self.reordered = true;
        Ok(())
    }

    /// Run `f`, restoring the sheets and pending changes as they were if it fails
    pub fn with_rollback<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let snapshot = self.clone();
        let result = f(self);
        if result.is_err() {
            *self = snapshot;
        }
        result
    }

    /// Write the workbook, pending changes applied, to `path`
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let modifications = WorkbookModifications {
            remove_sheets: self.removed.clone(),
            append_sheets: self.appended.clone(),
            sheet_order: Some(self.tables.iter().map(|t| t.title().to_string()).collect()),
        };
        writer::modify_workbook(self.path.as_path(), path, &modifications)?;

        if path == self.path.as_path() {
            // The source now holds every change
            self.removed.clear();
            self.appended.clear();
            self.reordered = false;
        }
        log::info!("Saved {}", path.display());
        Ok(())
    }
}

/// Path-keyed cache of open workbooks.
///
/// Opening the same path twice yields the same handle until it is closed.
#[derive(Debug, Default)]
pub struct WorkbookSession {
    open: HashMap<PathBuf, WorkbookHandle>,
}

impl WorkbookSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path`, or return the handle already open for it
    pub fn open<P: AsRef<Path>>(&mut self, path: P) -> Result<&mut WorkbookHandle> {
        let path = path.as_ref();
        match self.open.entry(path.to_path_buf()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let handle = WorkbookHandle::load(path)?;
                log::debug!("Opened {}", path.display());
                Ok(entry.insert(handle))
            }
        }
    }

    /// Drop the cached handle for `path`; unsaved changes are discarded
    pub fn close<P: AsRef<Path>>(&mut self, path: P) -> bool {
        let closed = self.open.remove(path.as_ref()).is_some();
        if closed {
            log::debug!("Closed {}", path.as_ref().display());
        }
        closed
    }

    pub fn is_open<P: AsRef<Path>>(&self, path: P) -> bool {
        self.open.contains_key(path.as_ref())
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Run `f` against the workbook at `path`.
    ///
    /// A workbook opened by this call is closed again on every exit path,
    /// including when `f` fails. A workbook that was already open stays open.
    pub fn with_workbook<P, T, F>(&mut self, path: P, f: F) -> Result<T>
    where
        P: AsRef<Path>,
        F: FnOnce(&mut WorkbookHandle) -> Result<T>,
    {
        let path = path.as_ref();
        let was_open = self.is_open(path);

        let result = match self.open(path) {
            Ok(handle) => f(handle),
            Err(e) => Err(e),
        };

        if !was_open {
            self.close(path);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{COUNT_HEADER, COUNT_WIDTHS};

    fn handle(titles: &[&str]) -> WorkbookHandle {
        WorkbookHandle {
            path: PathBuf::from("in-memory.xlsx"),
            tables: titles.iter().map(|t| Table::new(*t, Vec::new())).collect(),
            removed: HashSet::new(),
            appended: Vec::new(),
            reordered: false,
        }
    }

    #[test]
    fn test_remove_table() {
        let mut wb = handle(&["a", "b"]);
        assert!(wb.remove_table("a"));
        assert!(!wb.remove_table("a"));
        assert_eq!(wb.table_names(), vec!["b"]);
        assert!(wb.removed.contains("a"));
        assert!(wb.is_modified());
    }

    #[test]
    fn test_add_then_remove_leaves_no_trace() -> Result<()> {
        let mut wb = handle(&["a"]);
        wb.add_table(OutputTable::new("new", &COUNT_HEADER, &COUNT_WIDTHS))?;
        assert_eq!(
            wb.get_cell("new", 1, 2),
            Some(&CellValue::from("数量"))
        );
        assert!(wb.add_table(OutputTable::new("a", &[], &[])).is_err());
        assert!(wb.add_table(OutputTable::new("NEW", &[], &[])).is_err());

        assert!(wb.remove_table("new"));
        assert!(wb.appended.is_empty());
        assert!(wb.removed.is_empty());
        Ok(())
    }

    #[test]
    fn test_reorder_tables() {
        let mut wb = handle(&["b", "c", "a"]);
        wb.reorder_tables(|x, y| x.title().cmp(y.title()));
        assert_eq!(wb.table_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_try_reorder_tables_keeps_order_on_error() {
        let mut wb = handle(&["2", "x", "1"]);
        let result = wb.try_reorder_tables(|t| t.title().parse::<u32>());
        assert!(result.is_err());
        assert_eq!(wb.table_names(), vec!["2", "x", "1"]);
        assert!(!wb.is_modified());

        let mut wb = handle(&["2", "1", "2"]);
        wb.try_reorder_tables(|t| t.title().parse::<u32>()).unwrap();
        assert_eq!(wb.table_names(), vec!["1", "2", "2"]);
    }

    #[test]
    fn test_with_rollback_restores_on_error() {
        let mut wb = handle(&["a", "b"]);
        let result: Result<()> = wb.with_rollback(|wb| {
            wb.remove_table("a");
            wb.add_table(OutputTable::new("c", &COUNT_HEADER, &COUNT_WIDTHS))?;
            anyhow::bail!("late failure")
        });
        assert!(result.is_err());
        assert_eq!(wb.table_names(), vec!["a", "b"]);
        assert!(!wb.is_modified());

        wb.with_rollback(|wb| Ok(wb.remove_table("b"))).unwrap();
        assert_eq!(wb.table_names(), vec!["a"]);
    }

    #[test]
    fn test_with_workbook_releases_on_error() {
        let mut session = WorkbookSession::new();
        let result: Result<()> = session.with_workbook("does-not-exist.xlsx", |_| Ok(()));
        assert!(result.is_err());
        assert_eq!(session.open_count(), 0);
    }
}
