#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;

use fast_migration::error::{DbError, DbErrorKind};
use fast_migration::gateway::{SqlExecutor, SqlRow};
use fast_migration::pipeline::RunOptions;
use regex::Regex;
use tempfile::{TempDir, tempdir};

pub const RUN: &str = "testrun";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Writes an artifact of the shared test run.
    pub fn write_artifact(&self, key: &str, contents: &str) -> PathBuf {
        self.write(&format!("{key}.{RUN}.txt"), contents)
    }

    pub fn read_artifact(&self, key: &str) -> String {
        fs::read_to_string(self.artifact(key)).expect("read artifact")
    }

    pub fn artifact(&self, key: &str) -> PathBuf {
        self.path().join(format!("{key}.{RUN}.txt"))
    }

    pub fn options(&self) -> RunOptions {
        RunOptions::new(self.path(), Some(RUN.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeTable {
    pub columns: Vec<String>,
    pub rows: Vec<SqlRow>,
}

#[derive(Debug, Default)]
struct FakeState {
    tables: HashMap<String, FakeTable>,
    /// Artifact key → file contents written by `INTO OUTFILE`.
    outfiles: HashMap<String, String>,
    statements: Vec<String>,
    fail_loads: bool,
    locked: Option<String>,
    unique_checks: bool,
    foreign_key_checks: bool,
}

/// In-memory stand-in for a database that understands the statements the
/// gateway generates. Clones share state, so a test keeps one handle while
/// the pipeline owns another.
#[derive(Debug, Clone)]
pub struct FakeDatabase {
    state: Rc<RefCell<FakeState>>,
}

impl Default for FakeDatabase {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern(cell: &'static OnceLock<Regex>, source: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(source).expect("test pattern"))
}

fn quoted_path(sql: &str, keyword: &str) -> Option<PathBuf> {
    let start = sql.find(keyword)? + keyword.len();
    let rest = &sql[start..];
    let end = rest.find('\'')?;
    Some(PathBuf::from(&rest[..end]))
}

fn column_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(|c| c.trim().trim_matches('`').to_string())
        .collect()
}

fn no_table(table: &str) -> DbError {
    DbError::new(DbErrorKind::NoSuchTable, format!("Table '{table}' doesn't exist")).with_code(1146)
}

impl FakeDatabase {
    pub fn new() -> Self {
        let state = FakeState {
            unique_checks: true,
            foreign_key_checks: true,
            ..FakeState::default()
        };
        FakeDatabase {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn with_table(self, name: &str, columns: &[&str], rows: &[&[&str]]) -> Self {
        let table = FakeTable {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|v| Some(v.to_string())).collect())
                .collect(),
        };
        self.state.borrow_mut().tables.insert(name.to_string(), table);
        self
    }

    /// Contents written when a dump targets the artifact `key`.
    pub fn with_outfile(self, key: &str, contents: &str) -> Self {
        self.state
            .borrow_mut()
            .outfiles
            .insert(key.to_string(), contents.to_string());
        self
    }

    pub fn failing_loads(self) -> Self {
        self.state.borrow_mut().fail_loads = true;
        self
    }

    pub fn executor(&self) -> Box<dyn SqlExecutor> {
        Box::new(self.clone())
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.borrow().statements.clone()
    }

    pub fn statements_starting(&self, prefix: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with(prefix))
            .collect()
    }

    pub fn table(&self, name: &str) -> Option<FakeTable> {
        self.state.borrow().tables.get(name).cloned()
    }

    pub fn row_count(&self, name: &str) -> Option<usize> {
        self.table(name).map(|t| t.rows.len())
    }

    /// True when no lock is held and every relaxed setting is back on.
    pub fn session_restored(&self) -> bool {
        let state = self.state.borrow();
        state.locked.is_none() && state.unique_checks && state.foreign_key_checks
    }

    fn outfile(&self, sql: &str) -> Result<u64, DbError> {
        let path = quoted_path(sql, "INTO OUTFILE '")
            .ok_or_else(|| DbError::new(DbErrorKind::Other, "missing outfile"))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let contents = self
            .state
            .borrow()
            .outfiles
            .iter()
            .find(|(key, _)| file_name.starts_with(&format!("{key}.")))
            .map(|(_, contents)| contents.clone())
            .unwrap_or_default();
        if path.exists() {
            return Err(DbError::new(
                DbErrorKind::Other,
                format!("File '{}' already exists", path.display()),
            )
            .with_code(1086));
        }
        fs::write(&path, &contents).map_err(|err| DbError::new(DbErrorKind::Other, err.to_string()))?;
        Ok(contents.lines().count() as u64)
    }

    fn load(&self, sql: &str) -> Result<u64, DbError> {
        static TABLE: OnceLock<Regex> = OnceLock::new();
        if self.state.borrow().fail_loads {
            return Err(DbError::new(DbErrorKind::Other, "Lock wait timeout exceeded").with_code(1205));
        }
        let path = quoted_path(sql, "INFILE '")
            .ok_or_else(|| DbError::new(DbErrorKind::Other, "missing infile"))?;
        let table = pattern(&TABLE, r"INTO TABLE (\S+)")
            .captures(sql)
            .map(|c| c[1].to_string())
            .unwrap_or_default();
        let contents =
            fs::read_to_string(&path).map_err(|err| DbError::new(DbErrorKind::Other, err.to_string()))?;
        let mut state = self.state.borrow_mut();
        let target = state.tables.get_mut(&table).ok_or_else(|| no_table(&table))?;
        let mut loaded = 0;
        for line in contents.lines() {
            target
                .rows
                .push(line.split(',').map(|v| Some(v.to_string())).collect());
            loaded += 1;
        }
        Ok(loaded)
    }

    fn alter(&self, table: &str, drops: &str) -> Result<u64, DbError> {
        let mut state = self.state.borrow_mut();
        let target = state.tables.get_mut(table).ok_or_else(|| no_table(table))?;
        let columns = drops
            .split(',')
            .map(|d| d.trim().trim_start_matches("DROP COLUMN ").to_string())
            .collect::<Vec<_>>();
        if let Some(missing) = columns.iter().find(|c| !target.columns.contains(c)) {
            return Err(DbError::new(
                DbErrorKind::NoSuchColumn,
                format!("Can't DROP '{missing}'; check that column/key exists"),
            )
            .with_code(1091));
        }
        target.columns.retain(|c| !columns.contains(c));
        Ok(0)
    }

    fn select(&self, sql: &str) -> Result<Vec<SqlRow>, DbError> {
        static COUNT: OnceLock<Regex> = OnceLock::new();
        static PAGE: OnceLock<Regex> = OnceLock::new();
        static KEYS: OnceLock<Regex> = OnceLock::new();
        static LOOKUP: OnceLock<Regex> = OnceLock::new();
        let state = self.state.borrow();
        if let Some(caps) = pattern(&COUNT, r"^SELECT COUNT\(\*\) FROM (\S+)$").captures(sql) {
            let table = state.tables.get(&caps[1]).ok_or_else(|| no_table(&caps[1]))?;
            return Ok(vec![vec![Some(table.rows.len().to_string())]]);
        }
        if let Some(caps) =
            pattern(&PAGE, r"^SELECT (.+) FROM (\S+) ORDER BY \S+ LIMIT (\d+) OFFSET (\d+)$").captures(sql)
        {
            let table = state.tables.get(&caps[2]).ok_or_else(|| no_table(&caps[2]))?;
            let limit: usize = caps[3].parse().unwrap_or(0);
            let offset: usize = caps[4].parse().unwrap_or(0);
            let projection = project(table, &column_names(&caps[1]))?;
            return Ok(table
                .rows
                .iter()
                .skip(offset)
                .take(limit)
                .map(|row| projection.iter().map(|idx| row[*idx].clone()).collect())
                .collect());
        }
        if let Some(caps) = pattern(&KEYS, r"^SELECT (.+) FROM (\S+) WHERE \S+ IN \((.*)\)$").captures(sql) {
            let table = state.tables.get(&caps[2]).ok_or_else(|| no_table(&caps[2]))?;
            let keys = caps[3]
                .split(", ")
                .map(|k| k.trim_matches('\'').to_string())
                .collect::<Vec<_>>();
            let projection = project(table, &column_names(&caps[1]))?;
            return Ok(table
                .rows
                .iter()
                .filter(|row| {
                    row.get(projection[0])
                        .cloned()
                        .flatten()
                        .is_some_and(|key| keys.contains(&key))
                })
                .map(|row| projection.iter().map(|idx| row[*idx].clone()).collect())
                .collect());
        }
        if let Some(caps) = pattern(&LOOKUP, r"^SELECT (\S+) FROM (\S+) WHERE (\S+) = '(.*)'$").captures(sql) {
            let table = state.tables.get(&caps[2]).ok_or_else(|| no_table(&caps[2]))?;
            let projection = project(table, &[caps[1].to_string(), caps[3].to_string()])?;
            return Ok(table
                .rows
                .iter()
                .filter(|row| row[projection[1]].as_deref() == Some(&caps[4]))
                .map(|row| vec![row[projection[0]].clone()])
                .collect());
        }
        Err(DbError::new(DbErrorKind::Other, format!("unsupported query: {sql}")))
    }
}

fn project(table: &FakeTable, columns: &[String]) -> Result<Vec<usize>, DbError> {
    columns
        .iter()
        .map(|column| {
            table.columns.iter().position(|c| c == column).ok_or_else(|| {
                DbError::new(DbErrorKind::NoSuchColumn, format!("Unknown column '{column}'")).with_code(1054)
            })
        })
        .collect()
}

impl SqlExecutor for FakeDatabase {
    fn execute(&mut self, sql: &str) -> Result<u64, DbError> {
        static TRUNCATE: OnceLock<Regex> = OnceLock::new();
        static ALTER: OnceLock<Regex> = OnceLock::new();
        static CREATE: OnceLock<Regex> = OnceLock::new();
        static LOCK: OnceLock<Regex> = OnceLock::new();
        self.state.borrow_mut().statements.push(sql.to_string());

        if sql.starts_with("SELECT") && sql.contains("INTO OUTFILE") {
            return self.outfile(sql);
        }
        if sql.starts_with("LOAD DATA") {
            return self.load(sql);
        }
        if let Some(caps) = pattern(&TRUNCATE, r"^TRUNCATE TABLE (\S+)$").captures(sql) {
            let mut state = self.state.borrow_mut();
            let table = state.tables.get_mut(&caps[1]).ok_or_else(|| no_table(&caps[1]))?;
            let removed = table.rows.len() as u64;
            table.rows.clear();
            return Ok(removed);
        }
        if let Some(caps) = pattern(&ALTER, r"^ALTER TABLE (\S+) (.+)$").captures(sql) {
            return self.alter(&caps[1], &caps[2]);
        }
        if let Some(caps) = pattern(&CREATE, r"^CREATE TABLE (\S+) LIKE (\S+)$").captures(sql) {
            let mut state = self.state.borrow_mut();
            let source = state.tables.get(&caps[2]).ok_or_else(|| no_table(&caps[2]))?;
            let created = FakeTable {
                columns: source.columns.clone(),
                rows: Vec::new(),
            };
            state.tables.insert(caps[1].to_string(), created);
            return Ok(0);
        }
        let mut state = self.state.borrow_mut();
        if let Some(caps) = pattern(&LOCK, r"^LOCK TABLES (\S+) WRITE$").captures(sql) {
            state.locked = Some(caps[1].to_string());
        }
        match sql {
            "UNLOCK TABLES" => state.locked = None,
            "SET UNIQUE_CHECKS=0" => state.unique_checks = false,
            "SET UNIQUE_CHECKS=1" => state.unique_checks = true,
            "SET FOREIGN_KEY_CHECKS=0" => state.foreign_key_checks = false,
            "SET FOREIGN_KEY_CHECKS=1" => state.foreign_key_checks = true,
            _ => {}
        }
        Ok(0)
    }

    fn query(&mut self, sql: &str) -> Result<Vec<SqlRow>, DbError> {
        self.state.borrow_mut().statements.push(sql.to_string());
        self.select(sql)
    }

    fn database_name(&self) -> &str {
        "pootle"
    }
}
