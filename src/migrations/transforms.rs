//! Building blocks shared by the built-in migrations.

use indexmap::IndexMap;

use crate::{
    cache::{CacheValue, Caches},
    dialect::{DEFANGED_QUOTE, NULL_MARKER, NULL_PLACEHOLDER},
    error::{MigrationError, Result},
    io_utils,
};

/// Column positions recovered from a parsed schema dump.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    dataset: String,
    positions: IndexMap<String, usize>,
}

impl ColumnIndex {
    /// Reads the ordered cache `schema__<name>`.
    pub fn from_schema(caches: &Caches, name: &str) -> Result<Self> {
        let dataset = io_utils::schema_key(name);
        let schema = caches.get(&dataset)?;
        let positions = schema
            .keys()
            .enumerate()
            .map(|(idx, column)| (column.to_string(), idx))
            .collect();
        Ok(ColumnIndex { dataset, positions })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, column: &str) -> Result<usize> {
        self.positions
            .get(column)
            .copied()
            .ok_or_else(|| MigrationError::MissingColumn {
                dataset: self.dataset.clone(),
                column: column.to_string(),
            })
    }

    pub fn positions(&self, columns: &[&str]) -> Result<Vec<usize>> {
        columns.iter().map(|column| self.position(column)).collect()
    }
}

/// What a column does with the bulk NULL marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullPolicy {
    /// Pass the value through untouched.
    Keep,
    /// NULL becomes the empty string (non-nullable text).
    Empty,
    /// NULL is written back as SQL NULL.
    Placeholder,
}

impl NullPolicy {
    pub fn apply(self, value: String) -> String {
        if !is_bulk_null(&value) {
            return value;
        }
        match self {
            NullPolicy::Keep => value,
            NullPolicy::Empty => String::new(),
            NullPolicy::Placeholder => NULL_PLACEHOLDER.to_string(),
        }
    }
}

pub fn is_bulk_null(value: &str) -> bool {
    value == NULL_MARKER
}

/// Encloses free text for the bulk loader. The loader writer turns the
/// defanged quotes back into escaped ones.
pub fn enclose_free_text(value: &str) -> String {
    let mut enclosed = String::with_capacity(value.len() + 2);
    enclosed.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => enclosed.push_str("\\\\"),
            '\n' => enclosed.push_str("\\n"),
            '\r' => enclosed.push_str("\\r"),
            '"' => enclosed.push_str(DEFANGED_QUOTE),
            other => enclosed.push(other),
        }
    }
    enclosed.push('"');
    enclosed
}

/// Like [`enclose_free_text`], but leaves the NULL placeholder bare.
pub fn enclose_unless_null(value: String) -> String {
    if value == NULL_PLACEHOLDER {
        value
    } else {
        enclose_free_text(&value)
    }
}

pub fn check_arity(row: &[String], expected: usize) -> Result<()> {
    if row.len() == expected {
        Ok(())
    } else {
        Err(MigrationError::ArityMismatch {
            expected,
            found: row.len(),
        })
    }
}

/// Looks `key` up in a parsed dataset, falling back to `default` on a miss.
pub fn lookup_or(caches: &Caches, dataset: &str, key: &str, default: &str) -> Result<String> {
    Ok(caches
        .get(dataset)?
        .get(key)
        .map(CacheValue::to_field)
        .unwrap_or_else(|| default.to_string()))
}
