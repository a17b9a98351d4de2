//! MySQL/MariaDB executor over `sqlx`, driven from a current-thread runtime.
//!
//! Statements go through the text protocol: bulk statements such as
//! `SELECT .. INTO OUTFILE`, `LOAD DATA` and `LOCK TABLES` cannot be prepared.

use log::info;
use sqlx::{
    Connection, Executor, Row,
    mysql::{MySqlConnection, MySqlDatabaseError},
};
use tokio::runtime::{Builder, Runtime};

use super::{SqlExecutor, SqlRow};
use crate::error::{DbError, DbErrorKind};

const ER_CANT_DROP_FIELD_OR_KEY: u16 = 1091;
const ER_NO_SUCH_TABLE: u16 = 1146;
const ER_BAD_FIELD_ERROR: u16 = 1054;

pub struct MysqlExecutor {
    runtime: Runtime,
    conn: MySqlConnection,
    database: String,
}

impl MysqlExecutor {
    pub fn connect(url: &str) -> Result<Self, DbError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| DbError::new(DbErrorKind::Other, format!("Cannot start runtime: {err}")))?;
        let mut conn = runtime
            .block_on(MySqlConnection::connect(url))
            .map_err(classify)?;
        let database = runtime
            .block_on(conn.fetch_optional("SELECT DATABASE()"))
            .map_err(classify)?
            .and_then(|row| row.try_get_unchecked::<Option<String>, _>(0).ok().flatten())
            .unwrap_or_default();
        info!("Connected to MySQL database '{database}'");
        Ok(MysqlExecutor {
            runtime,
            conn,
            database,
        })
    }
}

impl SqlExecutor for MysqlExecutor {
    fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        let done = self
            .runtime
            .block_on((&mut self.conn).execute(sql))
            .map_err(classify)?;
        Ok(done.rows_affected())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<SqlRow>, DbError> {
        let rows = self
            .runtime
            .block_on((&mut self.conn).fetch_all(sql))
            .map_err(classify)?;
        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| row.try_get_unchecked::<Option<String>, _>(idx).map_err(classify))
                    .collect()
            })
            .collect()
    }

    fn database_name(&self) -> &str {
        &self.database
    }
}

fn classify(err: sqlx::Error) -> DbError {
    let server = match &err {
        sqlx::Error::Database(db) => db.try_downcast_ref::<MySqlDatabaseError>(),
        _ => None,
    };
    match server {
        Some(server) => {
            let kind = match server.number() {
                ER_NO_SUCH_TABLE => DbErrorKind::NoSuchTable,
                ER_CANT_DROP_FIELD_OR_KEY | ER_BAD_FIELD_ERROR => DbErrorKind::NoSuchColumn,
                _ => DbErrorKind::Other,
            };
            DbError::new(kind, server.message()).with_code(server.number())
        }
        None => DbError::new(DbErrorKind::Other, err.to_string()),
    }
}
