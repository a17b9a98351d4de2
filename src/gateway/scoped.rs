//! Scoped session settings around a bulk import.
//!
//! Each helper applies its settings, runs the body, and restores the settings
//! on every exit path. A body error wins over a restore error; the restore
//! error is still logged.

use log::warn;

use super::{SqlExecutor, execute};
use crate::error::Result;

const RELAX_DURABILITY: &[&str] = &[
    "SET GLOBAL sync_binlog=0",
    "SET GLOBAL innodb_flush_log_at_trx_commit=2",
    "SET UNIQUE_CHECKS=0",
    "SET FOREIGN_KEY_CHECKS=0",
    "SET SESSION TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
];

const RESTORE_DURABILITY: &[&str] = &[
    "SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ",
    "SET FOREIGN_KEY_CHECKS=1",
    "SET UNIQUE_CHECKS=1",
    "SET GLOBAL innodb_flush_log_at_trx_commit=1",
    "SET GLOBAL sync_binlog=1",
];

/// Holds an exclusive write lock on `table` for the duration of `body`.
pub fn with_table_lock<E, T>(
    db: &mut E,
    table: &str,
    body: impl FnOnce(&mut E) -> Result<T>,
) -> Result<T>
where
    E: SqlExecutor + ?Sized,
{
    execute(db, &format!("LOCK TABLES {table} WRITE"))?;
    let outcome = body(db);
    let released = execute(db, "UNLOCK TABLES").map(|_| ());
    settle(outcome, released)
}

/// Relaxes durability and consistency checks for the duration of `body`.
pub fn with_fast_load<E, T>(db: &mut E, body: impl FnOnce(&mut E) -> Result<T>) -> Result<T>
where
    E: SqlExecutor + ?Sized,
{
    let outcome = match run_all(db, RELAX_DURABILITY) {
        Ok(()) => body(db),
        Err(err) => Err(err),
    };
    let restored = run_all(db, RESTORE_DURABILITY);
    settle(outcome, restored)
}

pub fn without_foreign_key_checks<E, T>(
    db: &mut E,
    body: impl FnOnce(&mut E) -> Result<T>,
) -> Result<T>
where
    E: SqlExecutor + ?Sized,
{
    execute(db, "SET FOREIGN_KEY_CHECKS=0")?;
    let outcome = body(db);
    let restored = execute(db, "SET FOREIGN_KEY_CHECKS=1").map(|_| ());
    settle(outcome, restored)
}

/// Runs every statement even if an earlier one fails; returns the first error.
fn run_all<E>(db: &mut E, statements: &[&str]) -> Result<()>
where
    E: SqlExecutor + ?Sized,
{
    let mut first_error = None;
    for statement in statements {
        if let Err(err) = execute(db, statement) {
            warn!("{err}");
            first_error.get_or_insert(err);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn settle<T>(outcome: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (outcome, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup_err)) => {
            warn!("Cleanup after failed statement also failed: {cleanup_err}");
            Err(err)
        }
    }
}
