//! Streaming row transforms.
//!
//! A transform is a fold over the rows of one source file. The engine reads
//! rows strictly in file order, threads the accumulator through the fold and
//! writes every row the fold emits. It never sorts: folds that depend on
//! grouping rely on the `ORDER BY` of the dump that produced the file.

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use log::debug;

use crate::{
    cache::{Caches, MangledRows},
    dialect::{BulkDialect, BulkReader, BulkWriter},
    error::Result,
};

pub type Row = Vec<String>;

/// A transform with explicit state.
pub trait RowFold {
    type State;

    /// Initial accumulator, built once per run.
    fn start(&self, caches: &Caches) -> Result<Self::State>;

    /// Consumes one row; returns the next state and the row to emit, if any.
    fn fold(&self, state: Self::State, row: Row, caches: &Caches)
    -> Result<(Self::State, Option<Row>)>;
}

/// Adapts a stateless per-row function into a [`RowFold`].
pub struct MapRows<F>(pub F);

impl<F> MapRows<F>
where
    F: Fn(Row, &Caches) -> Result<Option<Row>>,
{
    pub fn new(map: F) -> Self {
        MapRows(map)
    }
}

impl<F> RowFold for MapRows<F>
where
    F: Fn(Row, &Caches) -> Result<Option<Row>>,
{
    type State = ();

    fn start(&self, _caches: &Caches) -> Result<()> {
        Ok(())
    }

    fn fold(&self, _state: (), row: Row, caches: &Caches) -> Result<((), Option<Row>)> {
        (self.0)(row, caches).map(|emitted| ((), emitted))
    }
}

/// Object-safe view of any [`RowFold`], used by migration descriptors.
pub trait Transform {
    fn run(
        &self,
        rows: &mut dyn Iterator<Item = Result<Row>>,
        caches: &Caches,
        emit: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()>;
}

impl<T: RowFold> Transform for T {
    fn run(
        &self,
        rows: &mut dyn Iterator<Item = Result<Row>>,
        caches: &Caches,
        emit: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()> {
        let mut state = self.start(caches)?;
        for row in rows {
            let (next, emitted) = self.fold(state, row?, caches)?;
            state = next;
            if let Some(row) = emitted {
                emit(row)?;
            }
        }
        Ok(())
    }
}

/// Emits the first row of each run of rows sharing `key_column`, when
/// `accept` says so. Later rows of the same run are suppressed.
pub struct KeepFirstPerKey<F> {
    pub key_column: usize,
    pub accept: F,
}

impl<F> KeepFirstPerKey<F>
where
    F: Fn(&Row, &Caches) -> Result<Option<Row>>,
{
    pub fn new(key_column: usize, accept: F) -> Self {
        KeepFirstPerKey { key_column, accept }
    }
}

impl<F> RowFold for KeepFirstPerKey<F>
where
    F: Fn(&Row, &Caches) -> Result<Option<Row>>,
{
    /// Key of the current run.
    type State = Option<String>;

    fn start(&self, _caches: &Caches) -> Result<Self::State> {
        Ok(None)
    }

    fn fold(
        &self,
        last_key: Self::State,
        row: Row,
        caches: &Caches,
    ) -> Result<(Self::State, Option<Row>)> {
        let key = row.get(self.key_column).cloned().unwrap_or_default();
        if last_key.as_deref() == Some(key.as_str()) {
            return Ok((last_key, None));
        }
        let emitted = (self.accept)(&row, caches)?;
        Ok((Some(key), emitted))
    }
}

#[derive(Debug)]
pub struct MangleOutcome {
    pub source: PathBuf,
    /// `None` when rows were kept in memory.
    pub target: Option<PathBuf>,
    /// Rows emitted.
    pub count: usize,
    /// Rows read.
    pub total: usize,
    /// Emitted rows, only populated for in-memory results.
    pub rows: MangledRows,
    pub elapsed: Duration,
}

/// One source → target transform run.
#[derive(Debug, Clone)]
pub struct Mangler {
    pub source: PathBuf,
    pub target: Option<PathBuf>,
    pub reader: BulkDialect,
    pub writer: BulkDialect,
}

impl Mangler {
    pub fn new(source: &Path, target: Option<&Path>) -> Self {
        Mangler {
            source: source.to_path_buf(),
            target: target.map(Path::to_path_buf),
            reader: BulkDialect::default(),
            writer: BulkDialect::loader(),
        }
    }

    pub fn with_reader(mut self, reader: BulkDialect) -> Self {
        self.reader = reader;
        self
    }

    pub fn with_writer(mut self, writer: BulkDialect) -> Self {
        self.writer = writer;
        self
    }

    pub fn mangle(&self, transform: &dyn Transform, caches: &Caches) -> Result<MangleOutcome> {
        let start = Instant::now();
        let mut reader = BulkReader::open(&self.source, &self.reader)?;
        let mut total = 0usize;
        let mut count = 0usize;
        let mut kept = MangledRows::new();
        let mut writer = match &self.target {
            Some(path) => Some(BulkWriter::create(path, &self.writer)?),
            None => None,
        };

        let source = self.source.as_path();
        let mut rows = std::iter::from_fn(|| {
            let next = reader.read_row().transpose()?;
            total += 1;
            Some(next)
        });
        let outcome = transform.run(&mut rows, caches, &mut |row| {
            count += 1;
            match writer.as_mut() {
                Some(writer) => writer.write_row(&row),
                None => {
                    kept.push(row);
                    Ok(())
                }
            }
        });
        drop(rows);
        outcome.map_err(|err| err.at_row(source, total))?;

        if let Some(writer) = writer {
            writer.into_inner()?;
        }
        debug!("Mangled {count}/{total} row(s) from {:?}", self.source);
        Ok(MangleOutcome {
            source: self.source.clone(),
            target: self.target.clone(),
            count,
            total,
            rows: kept,
            elapsed: start.elapsed(),
        })
    }
}
