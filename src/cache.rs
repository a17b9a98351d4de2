//! In-memory lookups materialized from delimited files.
//!
//! A dataset is read fully into a key → value mapping before the transforms
//! that consult it run. Mappings are immutable once loaded; later duplicate
//! keys overwrite earlier ones.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use indexmap::IndexMap;
use itertools::Either;
use log::debug;

use crate::{
    dialect::{BulkDialect, BulkReader},
    error::{MigrationError, Result},
};

/// Value side of one cached entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// The row had a single column.
    Empty,
    Text(String),
    Integer(i64),
    /// Every column after the key.
    Columns(Vec<String>),
}

impl CacheValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CacheValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CacheValue::Integer(value) => Some(*value),
            CacheValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    /// Renders the value the way it would appear in a bulk file.
    pub fn to_field(&self) -> String {
        match self {
            CacheValue::Empty => String::new(),
            CacheValue::Text(text) => text.clone(),
            CacheValue::Integer(value) => value.to_string(),
            CacheValue::Columns(columns) => columns.join(","),
        }
    }
}

/// Keyed lookup, optionally remembering insertion order.
#[derive(Debug, Clone)]
pub enum ParsedData {
    Ordered(IndexMap<String, CacheValue>),
    Unordered(HashMap<String, CacheValue>),
}

impl ParsedData {
    pub fn new(preserve_order: bool) -> Self {
        if preserve_order {
            ParsedData::Ordered(IndexMap::new())
        } else {
            ParsedData::Unordered(HashMap::new())
        }
    }

    pub fn get(&self, key: &str) -> Option<&CacheValue> {
        match self {
            ParsedData::Ordered(map) => map.get(key),
            ParsedData::Unordered(map) => map.get(key),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: String, value: CacheValue) {
        match self {
            ParsedData::Ordered(map) => {
                map.insert(key, value);
            }
            ParsedData::Unordered(map) => {
                map.insert(key, value);
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ParsedData::Ordered(map) => map.len(),
            ParsedData::Unordered(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion order for ordered data, arbitrary order otherwise.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        match self {
            ParsedData::Ordered(map) => Either::Left(map.keys().map(String::as_str)),
            ParsedData::Unordered(map) => Either::Right(map.keys().map(String::as_str)),
        }
    }

    /// Insertion position of `key`; only meaningful for ordered data.
    pub fn position(&self, key: &str) -> Option<usize> {
        match self {
            ParsedData::Ordered(map) => map.get_index_of(key),
            ParsedData::Unordered(_) => None,
        }
    }
}

/// Builds an entry from a row; `None` skips the row.
pub type RowLoader = fn(&[String]) -> Result<Option<(String, CacheValue)>>;

#[derive(Debug)]
pub struct ParseOutcome {
    pub source: PathBuf,
    pub data: ParsedData,
    /// Rows read from the file.
    pub total: usize,
    /// Distinct keys kept.
    pub count: usize,
    pub elapsed: Duration,
}

pub fn load_as_mapping(
    path: &Path,
    dialect: &BulkDialect,
    loader: Option<RowLoader>,
    preserve_order: bool,
) -> Result<ParseOutcome> {
    let start = Instant::now();
    let mut reader = BulkReader::open(path, dialect)?;
    let mut data = ParsedData::new(preserve_order);
    let mut total = 0usize;
    while let Some(row) = reader.read_row()? {
        total += 1;
        let entry = match loader {
            Some(load) => load(&row).map_err(|err| err.at_row(path, total))?,
            None => positional_entry(row),
        };
        if let Some((key, value)) = entry {
            data.insert(key, value);
        }
    }
    let count = data.len();
    debug!("Parsed {count}/{total} row(s) from {:?}", path);
    Ok(ParseOutcome {
        source: path.to_path_buf(),
        data,
        total,
        count,
        elapsed: start.elapsed(),
    })
}

fn positional_entry(mut row: Vec<String>) -> Option<(String, CacheValue)> {
    if row.len() == 1 && row[0].is_empty() {
        return None;
    }
    let value = match row.len() {
        1 => CacheValue::Empty,
        2 => CacheValue::Text(row.pop().unwrap_or_default()),
        _ => CacheValue::Columns(row.split_off(1)),
    };
    let key = row.swap_remove(0);
    Some((key, value))
}

/// Rows a mangle stage kept in memory instead of writing to a file.
pub type MangledRows = Vec<Vec<String>>;

/// Every dataset visible to transforms, by name.
#[derive(Debug, Default)]
pub struct Caches {
    parsed: IndexMap<String, ParsedData>,
    mangled: IndexMap<String, MangledRows>,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Result<&ParsedData> {
        self.parsed
            .get(name)
            .ok_or_else(|| MigrationError::MissingDataset(name.to_string()))
    }

    pub fn insert(&mut self, name: impl Into<String>, data: ParsedData) {
        self.parsed.insert(name.into(), data);
    }

    pub fn remove(&mut self, name: &str) -> Option<ParsedData> {
        self.parsed.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parsed.contains_key(name) || self.mangled.contains_key(name)
    }

    pub fn mangled(&self, name: &str) -> Result<&MangledRows> {
        self.mangled
            .get(name)
            .ok_or_else(|| MigrationError::MissingDataset(name.to_string()))
    }

    pub fn insert_mangled(&mut self, name: impl Into<String>, rows: MangledRows) {
        self.mangled.insert(name.into(), rows);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parsed
            .keys()
            .chain(self.mangled.keys())
            .map(String::as_str)
    }
}
