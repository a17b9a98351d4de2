//! Error taxonomy for the migration pipeline.
//!
//! Library code returns [`MigrationError`]; the command-line layer wraps it in
//! `anyhow` with additional context. Database failures carry the statement
//! that produced them so a failed stage can be diagnosed and re-run by hand.

use std::{io, path::PathBuf};

use thiserror::Error;

/// Coarse classification of database failures the pipeline reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// The referenced table does not exist.
    NoSuchTable,
    /// The referenced column (or key) does not exist.
    NoSuchColumn,
    Other,
}

/// An error reported by a [`crate::gateway::SqlExecutor`].
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DbError {
    pub kind: DbErrorKind,
    pub code: Option<u16>,
    pub message: String,
}

impl DbError {
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Target table '{table}' contains data and force not specified")]
    DestinationNotEmpty { table: String },

    #[error("Target table '{table}' does not exist")]
    DestinationMissing { table: String },

    #[error("Malformed migration descriptor '{migration}': {detail}")]
    MalformedDescriptor { migration: String, detail: String },

    #[error("Unknown migration '{name}' (available: {available})")]
    UnknownMigration { name: String, available: String },

    #[error("Setting '{0}' is required by this migration")]
    MissingSetting(&'static str),

    #[error("Dataset '{0}' has not been parsed")]
    MissingDataset(String),

    #[error("Column '{column}' not found in {dataset}")]
    MissingColumn { dataset: String, column: String },

    #[error("Row has {found} column(s), expected {expected}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("Invalid value '{value}' for {context}")]
    InvalidValue { value: String, context: String },

    #[error("Validation of '{table}' failed: {detail}")]
    ValidationMismatch { table: String, detail: String },

    #[error("Invalid SQL identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Database error while executing `{statement}`: {source}")]
    Database {
        statement: String,
        #[source]
        source: DbError,
    },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to {action} text using {encoding}")]
    Encoding {
        action: &'static str,
        encoding: &'static str,
    },

    #[error("Row {row} of {path:?}: {source}")]
    Row {
        path: PathBuf,
        row: usize,
        #[source]
        source: Box<MigrationError>,
    },
}

impl MigrationError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        MigrationError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        MigrationError::Csv {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn at_row(self, path: impl Into<PathBuf>, row: usize) -> Self {
        MigrationError::Row {
            path: path.into(),
            row,
            source: Box::new(self),
        }
    }

    /// Returns the underlying database error kind, looking through row context.
    pub fn db_kind(&self) -> Option<DbErrorKind> {
        match self {
            MigrationError::Database { source, .. } => Some(source.kind),
            MigrationError::Row { source, .. } => source.db_kind(),
            _ => None,
        }
    }
}

pub type Result<T, E = MigrationError> = std::result::Result<T, E>;
