//! Spreadsheet normalisation: workbook → [`Table`] → prompt text.
//!
//! The first worksheet is read with its first row as the header. Cells are
//! rendered to text exactly as stored: no rounding, no type coercion, no
//! locale formatting. The serialised form is a pipe table, which models read
//! reliably and which preserves row and column order.

use calamine::{open_workbook_auto, Data, Reader};
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;

/// Tabular data: named columns, rows in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Build from raw rows where the first row holds the column names.
    ///
    /// Blank header cells are named `Unnamed: <i>` (0-based column index).
    /// Rows shorter than the header are padded with empty cells.
    pub fn from_header_rows(mut raw: Vec<Vec<String>>) -> Self {
        if raw.is_empty() {
            return Self::default();
        }
        let header = raw.remove(0);
        let width = raw.iter().map(Vec::len).chain([header.len()]).max().unwrap_or(0);

        let columns = (0..width)
            .map(|i| match header.get(i) {
                Some(name) if !name.trim().is_empty() => name.clone(),
                _ => format!("Unnamed: {i}"),
            })
            .collect();

        let rows = raw
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();

        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }
}

/// Reads the tabular content of a spreadsheet file.
pub trait WorkbookReader: Send + Sync {
    /// Blocking; called from `spawn_blocking`. Errors become
    /// [`crate::error::UnitError::DocumentFormat`].
    fn read_table(&self, path: &Path) -> Result<Table, String>;
}

/// [`WorkbookReader`] for xlsx / xls / xlsm / xlsb / ods via calamine.
#[derive(Debug, Default, Clone, Copy)]
pub struct CalamineReader;

impl WorkbookReader for CalamineReader {
    fn read_table(&self, path: &Path) -> Result<Table, String> {
        let mut workbook =
            open_workbook_auto(path).map_err(|e| format!("cannot open spreadsheet: {e}"))?;

        let first = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| "workbook has no worksheets".to_string())?;

        let range = workbook
            .worksheet_range(&first)
            .map_err(|e| format!("cannot read worksheet '{first}': {e}"))?;

        let raw: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        debug!("Worksheet '{}': {} raw rows", first, raw.len());

        Ok(Table::from_header_rows(raw))
    }
}

/// Text of one cell, as stored.
pub(crate) fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Error(e) => format!("#ERR:{e:?}"),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

/// Serialise a table as a pipe table with a leading row-index column.
///
/// Deterministic: the same table always yields the same text.
pub fn normalize(table: &Table) -> String {
    let mut out = String::new();
    let header: Vec<String> = std::iter::once(String::new())
        .chain(table.columns.iter().map(|c| escape(c)))
        .collect();
    let _ = writeln!(out, "| {} |", header.join(" | "));
    let _ = writeln!(
        out,
        "|{}",
        header.iter().map(|_| " --- |").collect::<String>()
    );
    for (i, row) in table.rows.iter().enumerate() {
        let cells: Vec<String> = std::iter::once(i.to_string())
            .chain(row.iter().map(|c| escape(c)))
            .collect();
        let _ = writeln!(out, "| {} |", cells.join(" | "));
    }
    out
}

fn escape(cell: &str) -> String {
    cell.replace('|', "\\|").replace(['\r', '\n'], " ")
}
