//! Bulk export/import gateway over a database capability.
//!
//! The pipeline never talks to a database driver directly. It goes through
//! [`SqlExecutor`], a three-method capability, and this module turns dump,
//! load and DDL requests into statements for the database's bulk-file
//! dialect.

pub mod scoped;
pub mod sql;

#[cfg(feature = "mysql")]
pub mod mysql;

use std::{path::Path, time::Instant};

use log::{debug, info, warn};

use crate::{
    dialect::BulkDialect,
    error::{DbError, DbErrorKind, MigrationError, Result},
    report::{CreateReport, DumpReport, LoadReport},
};

pub use sql::{Comparison, OrderBy, Predicate};

/// A textual result row; `None` is SQL `NULL`.
pub type SqlRow = Vec<Option<String>>;

/// The database capability the pipeline needs.
pub trait SqlExecutor {
    /// Executes a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str) -> Result<u64, DbError>;
    /// Runs a query and returns its rows as text.
    fn query(&mut self, sql: &str) -> Result<Vec<SqlRow>, DbError>;
    /// Name of the active database/schema.
    fn database_name(&self) -> &str;
}

impl<E: SqlExecutor + ?Sized> SqlExecutor for Box<E> {
    fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        (**self).execute(sql)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<SqlRow>, DbError> {
        (**self).query(sql)
    }

    fn database_name(&self) -> &str {
        (**self).database_name()
    }
}

pub(crate) fn execute<E: SqlExecutor + ?Sized>(db: &mut E, sql: &str) -> Result<u64> {
    debug!("{sql}");
    db.execute(sql).map_err(|source| MigrationError::Database {
        statement: sql.to_string(),
        source,
    })
}

pub(crate) fn query<E: SqlExecutor + ?Sized>(db: &mut E, sql: &str) -> Result<Vec<SqlRow>> {
    debug!("{sql}");
    db.query(sql).map_err(|source| MigrationError::Database {
        statement: sql.to_string(),
        source,
    })
}

/// What to export and how.
#[derive(Debug, Clone)]
pub struct DumpSpec {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub filter: Vec<Predicate>,
    pub order_by: Vec<OrderBy>,
    /// Enclosure for text fields; `None` writes fields bare.
    pub enclose: Option<u8>,
}

impl DumpSpec {
    pub fn table(table: &str) -> Self {
        DumpSpec {
            table: table.to_string(),
            columns: None,
            filter: Vec::new(),
            order_by: Vec::new(),
            enclose: Some(b'"'),
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter.push(predicate);
        self
    }

    /// Terms such as `unit_id` or `-creation_time` (descending).
    pub fn order_by(mut self, terms: &[&str]) -> Self {
        self.order_by = terms.iter().map(|t| OrderBy::parse(t)).collect();
        self
    }

    pub fn enclose(mut self, enclose: Option<u8>) -> Self {
        self.enclose = enclose;
        self
    }
}

/// Column-metadata export for one table.
#[derive(Debug, Clone)]
pub struct SchemaSpec {
    pub table: String,
    pub columns: Vec<String>,
    pub enclose: Option<u8>,
}

impl SchemaSpec {
    /// Column names only, unenclosed.
    pub fn column_names(table: &str) -> Self {
        SchemaSpec {
            table: table.to_string(),
            columns: vec!["column_name".to_string()],
            enclose: None,
        }
    }
}

pub struct Gateway {
    db: Box<dyn SqlExecutor>,
    dialect: BulkDialect,
}

impl Gateway {
    pub fn new(db: Box<dyn SqlExecutor>) -> Self {
        Gateway {
            db,
            dialect: BulkDialect::default(),
        }
    }

    pub fn with_dialect(mut self, dialect: BulkDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn executor(&mut self) -> &mut dyn SqlExecutor {
        self.db.as_mut()
    }

    pub fn dump(&mut self, spec: &DumpSpec, destination: &Path) -> Result<DumpReport> {
        let start = Instant::now();
        let request = sql::Outfile {
            table: &spec.table,
            columns: spec.columns.as_deref(),
            filter: &spec.filter,
            order_by: &spec.order_by,
            enclose: spec.enclose,
        };
        let statement = sql::select_into_outfile(&request, destination, &self.dialect)?;
        let rows = execute(self.db.as_mut(), &statement)?;
        info!("Dumped {rows} row(s) of {} to {:?}", spec.table, destination);
        Ok(DumpReport {
            table: spec.table.clone(),
            path: destination.to_path_buf(),
            rows,
            elapsed: start.elapsed(),
        })
    }

    pub fn dump_schema(&mut self, spec: &SchemaSpec, destination: &Path) -> Result<DumpReport> {
        let start = Instant::now();
        let database = self.db.database_name().to_string();
        let filter = [
            Predicate::eq("table_name", &spec.table),
            Predicate::eq("table_schema", &database),
        ];
        let order = [OrderBy::parse("ordinal_position")];
        let request = sql::Outfile {
            table: sql::SCHEMA_CATALOG,
            columns: Some(&spec.columns),
            filter: &filter,
            order_by: &order,
            enclose: spec.enclose,
        };
        let statement = sql::select_into_outfile(&request, destination, &self.dialect)?;
        let rows = execute(self.db.as_mut(), &statement)?;
        info!(
            "Dumped {rows} column definition(s) of {} to {:?}",
            spec.table, destination
        );
        Ok(DumpReport {
            table: spec.table.clone(),
            path: destination.to_path_buf(),
            rows,
            elapsed: start.elapsed(),
        })
    }

    /// Returns `None` when the table does not exist.
    pub fn row_count(&mut self, table: &str) -> Result<Option<u64>> {
        let statement = sql::count_rows(table)?;
        match query(self.db.as_mut(), &statement) {
            Ok(rows) => {
                let value = rows
                    .first()
                    .and_then(|row| row.first())
                    .and_then(|cell| cell.as_deref())
                    .unwrap_or("0");
                value
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| MigrationError::InvalidValue {
                        value: value.to_string(),
                        context: format!("row count of {table}"),
                    })
            }
            Err(err) if err.db_kind() == Some(DbErrorKind::NoSuchTable) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn truncate(&mut self, table: &str) -> Result<()> {
        let statement = sql::truncate_table(table)?;
        scoped::without_foreign_key_checks(self.db.as_mut(), |db| execute(db, &statement))?;
        Ok(())
    }

    pub fn create_like(&mut self, source: &str, target: &str) -> Result<CreateReport> {
        let start = Instant::now();
        let statement = sql::create_table_like(source, target)?;
        execute(self.db.as_mut(), &statement)?;
        info!("Created table {target} like {source}");
        Ok(CreateReport {
            table: target.to_string(),
            source: source.to_string(),
            elapsed: start.elapsed(),
        })
    }

    pub fn drop_columns(&mut self, table: &str, columns: &[String]) -> Result<()> {
        let statement = sql::drop_columns(table, columns)?;
        execute(self.db.as_mut(), &statement)?;
        Ok(())
    }

    /// Bulk-imports `source` into an existing `table`.
    ///
    /// A non-empty destination requires `force`, in which case it is
    /// truncated first. Both checks happen before any bulk statement runs.
    pub fn load(&mut self, table: &str, source: &Path, force: bool, local: bool) -> Result<LoadReport> {
        let start = Instant::now();
        let truncated = match self.row_count(table)? {
            None => {
                return Err(MigrationError::DestinationMissing {
                    table: table.to_string(),
                });
            }
            Some(0) => false,
            Some(_) if !force => {
                return Err(MigrationError::DestinationNotEmpty {
                    table: table.to_string(),
                });
            }
            Some(existing) => {
                warn!("Truncating {existing} row(s) from {table} before load");
                self.truncate(table)?;
                true
            }
        };
        let statement = sql::load_data_infile(table, source, local, &self.dialect)?;
        let rows = scoped::with_table_lock(self.db.as_mut(), table, |db| {
            scoped::with_fast_load(db, |db| execute(db, &statement))
        })?;
        info!("Loaded {rows} row(s) from {:?} into {table}", source);
        Ok(LoadReport {
            table: table.to_string(),
            path: source.to_path_buf(),
            rows,
            truncated,
            elapsed: start.elapsed(),
        })
    }
}
