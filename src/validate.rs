//! Post-load comparison of a table against a live data model.
//!
//! The destination is paged by its first column (the primary key) in fixed
//! batches; each batch is compared with the model's values for the same keys.

use std::collections::HashMap;

use log::debug;

use crate::{
    error::{MigrationError, Result},
    gateway::{self, SqlExecutor, SqlRow, sql},
};

pub const DEFAULT_STEP: u64 = 10_000;

/// The host data model a loaded table is checked against.
pub trait DataModel {
    /// Human-readable name used in reports.
    fn label(&self) -> String;

    fn count(&self, db: &mut dyn SqlExecutor) -> Result<u64>;

    /// Rows for `keys`, projected to `columns` (first column is the key).
    fn fetch(&self, db: &mut dyn SqlExecutor, columns: &[String], keys: &[String]) -> Result<Vec<SqlRow>>;
}

/// A data model backed by another table of the same database.
#[derive(Debug, Clone)]
pub struct TableModel {
    table: String,
}

impl TableModel {
    pub fn new(table: &str) -> Self {
        TableModel {
            table: table.to_string(),
        }
    }
}

impl DataModel for TableModel {
    fn label(&self) -> String {
        format!("table {}", self.table)
    }

    fn count(&self, db: &mut dyn SqlExecutor) -> Result<u64> {
        count_rows(db, &self.table)
    }

    fn fetch(&self, db: &mut dyn SqlExecutor, columns: &[String], keys: &[String]) -> Result<Vec<SqlRow>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let statement = sql::select_by_keys(&self.table, columns, keys)?;
        gateway::query(db, &statement)
    }
}

pub fn count_rows(db: &mut dyn SqlExecutor, table: &str) -> Result<u64> {
    let statement = sql::count_rows(table)?;
    let rows = gateway::query(db, &statement)?;
    let value = rows
        .first()
        .and_then(|row| row.first())
        .and_then(|cell| cell.as_deref())
        .unwrap_or("0");
    value.trim().parse().map_err(|_| MigrationError::InvalidValue {
        value: value.to_string(),
        context: format!("row count of {table}"),
    })
}

/// Fails when the model's row count differs from the table's.
pub fn check_count(db: &mut dyn SqlExecutor, table: &str, model: &dyn DataModel, total: u64) -> Result<()> {
    let expected = model.count(db)?;
    if expected == total {
        Ok(())
    } else {
        Err(MigrationError::ValidationMismatch {
            table: table.to_string(),
            detail: format!("{total} row(s) loaded, {} expects {expected}", model.label()),
        })
    }
}

/// Compares one page of `table` with the model and returns the page size.
pub fn compare_batch(
    db: &mut dyn SqlExecutor,
    table: &str,
    model: &dyn DataModel,
    columns: &[String],
    step: u64,
    offset: u64,
) -> Result<usize> {
    let statement = sql::select_page(table, columns, step, offset)?;
    let page = gateway::query(db, &statement)?;
    let keys = page.iter().map(key_of).collect::<Vec<_>>();
    let existing = model.fetch(db, columns, &keys)?;
    debug!(
        "Comparing {} row(s) of {table} at offset {offset} with {}",
        page.len(),
        model.label()
    );

    let loaded = by_key(&page);
    let expected = by_key(&existing);
    if loaded == expected {
        return Ok(page.len());
    }
    let detail = match keys
        .iter()
        .find(|key| loaded.get(key.as_str()) != expected.get(key.as_str()))
    {
        Some(key) => format!(
            "row {key} differs: loaded {:?}, {} has {:?}",
            loaded.get(key.as_str()),
            model.label(),
            expected.get(key.as_str())
        ),
        None => format!(
            "{} returned {} row(s) not present in this batch",
            model.label(),
            expected.len().saturating_sub(loaded.len())
        ),
    };
    Err(MigrationError::ValidationMismatch {
        table: table.to_string(),
        detail,
    })
}

fn key_of(row: &SqlRow) -> String {
    row.first().cloned().flatten().unwrap_or_default()
}

fn by_key(rows: &[SqlRow]) -> HashMap<String, &[Option<String>]> {
    rows.iter()
        .map(|row| (key_of(row), row.get(1..).unwrap_or_default()))
        .collect()
}
