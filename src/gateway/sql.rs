//! Statement builders for the bulk export/import dialect.
//!
//! Identifiers are validated before they are spliced into a statement; values
//! and paths are written as escaped string literals.

use std::{fmt, path::Path, sync::OnceLock};

use itertools::Itertools;
use regex::Regex;

use crate::{
    dialect::BulkDialect,
    error::{MigrationError, Result},
};

pub const SCHEMA_CATALOG: &str = "information_schema.COLUMNS";
const DESCENDING_MARKER: char = '-';

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*(\.[A-Za-z_][A-Za-z0-9_$]*)?$")
            .expect("identifier pattern compiles")
    })
}

pub fn identifier(name: &str) -> Result<&str> {
    if identifier_pattern().is_match(name) {
        Ok(name)
    } else {
        Err(MigrationError::InvalidIdentifier(name.to_string()))
    }
}

pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn char_literal(byte: u8) -> String {
    let escaped = match byte {
        b'\n' => "\\n".to_string(),
        b'\r' => "\\r".to_string(),
        b'\t' => "\\t".to_string(),
        b'\\' => "\\\\".to_string(),
        b'\'' => "\\'".to_string(),
        other => (other as char).to_string(),
    };
    format!("'{escaped}'")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Ne,
}

impl Comparison {
    fn as_sql(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gt => ">",
            Comparison::Ne => "!=",
        }
    }
}

/// One conjunct of a dump filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub column: String,
    pub op: Comparison,
    pub value: String,
}

impl Predicate {
    pub fn eq(column: &str, value: impl ToString) -> Self {
        Predicate::new(column, Comparison::Eq, value)
    }

    pub fn gt(column: &str, value: impl ToString) -> Self {
        Predicate::new(column, Comparison::Gt, value)
    }

    pub fn ne(column: &str, value: impl ToString) -> Self {
        Predicate::new(column, Comparison::Ne, value)
    }

    fn new(column: &str, op: Comparison, value: impl ToString) -> Self {
        Predicate {
            column: column.to_string(),
            op,
            value: value.to_string(),
        }
    }

    fn to_sql(&self) -> Result<String> {
        Ok(format!(
            "{} {} {}",
            identifier(&self.column)?,
            self.op.as_sql(),
            string_literal(&self.value)
        ))
    }
}

/// Ordering term; a leading `-` on the column name means descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn parse(term: &str) -> Self {
        let term = term.trim();
        match term.strip_prefix(DESCENDING_MARKER) {
            Some(column) => OrderBy {
                column: column.to_string(),
                descending: true,
            },
            None => OrderBy {
                column: term.to_string(),
                descending: false,
            },
        }
    }

    fn to_sql(&self) -> Result<String> {
        let column = identifier(&self.column)?;
        Ok(if self.descending {
            format!("{column} DESC")
        } else {
            column.to_string()
        })
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "{DESCENDING_MARKER}")?;
        }
        write!(f, "{}", self.column)
    }
}

/// A `SELECT .. INTO OUTFILE` request.
#[derive(Debug, Clone)]
pub struct Outfile<'a> {
    pub table: &'a str,
    pub columns: Option<&'a [String]>,
    pub filter: &'a [Predicate],
    pub order_by: &'a [OrderBy],
    pub enclose: Option<u8>,
}

fn column_list(columns: Option<&[String]>) -> Result<String> {
    match columns {
        None => Ok("*".to_string()),
        Some(columns) => Ok(columns
            .iter()
            .map(|c| identifier(c).map(|c| format!("`{c}`")))
            .collect::<Result<Vec<_>>>()?
            .join(", ")),
    }
}

fn file_terms(dialect: &BulkDialect, enclose: Option<u8>, escaped: bool) -> String {
    let mut terms = format!("FIELDS TERMINATED BY {}", char_literal(dialect.field_delimiter));
    if let Some(enclosure) = enclose {
        terms.push_str(&format!(" OPTIONALLY ENCLOSED BY {}", char_literal(enclosure)));
    }
    if escaped {
        if let Some(escape) = dialect.escape {
            terms.push_str(&format!(" ESCAPED BY {}", char_literal(escape)));
        }
    }
    terms.push_str(&format!(
        " LINES TERMINATED BY {}",
        char_literal(dialect.line_delimiter)
    ));
    terms
}

pub fn select_into_outfile(
    request: &Outfile<'_>,
    outfile: &Path,
    dialect: &BulkDialect,
) -> Result<String> {
    let mut sql = format!(
        "SELECT {} INTO OUTFILE {} {} FROM {}",
        column_list(request.columns)?,
        string_literal(&outfile.to_string_lossy()),
        file_terms(dialect, request.enclose, false),
        identifier(request.table)?
    );
    if !request.filter.is_empty() {
        let clauses = request
            .filter
            .iter()
            .map(Predicate::to_sql)
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
    }
    if !request.order_by.is_empty() {
        let terms = request
            .order_by
            .iter()
            .map(OrderBy::to_sql)
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
    }
    Ok(sql)
}

pub fn load_data_infile(
    table: &str,
    infile: &Path,
    local: bool,
    dialect: &BulkDialect,
) -> Result<String> {
    Ok(format!(
        "LOAD DATA {}INFILE {} INTO TABLE {} {}",
        if local { "LOCAL " } else { "" },
        string_literal(&infile.to_string_lossy()),
        identifier(table)?,
        file_terms(dialect, Some(b'"'), true)
    ))
}

pub fn count_rows(table: &str) -> Result<String> {
    Ok(format!("SELECT COUNT(*) FROM {}", identifier(table)?))
}

pub fn truncate_table(table: &str) -> Result<String> {
    Ok(format!("TRUNCATE TABLE {}", identifier(table)?))
}

pub fn create_table_like(source: &str, target: &str) -> Result<String> {
    Ok(format!(
        "CREATE TABLE {} LIKE {}",
        identifier(target)?,
        identifier(source)?
    ))
}

pub fn drop_columns(table: &str, columns: &[String]) -> Result<String> {
    let drops = columns
        .iter()
        .map(|c| identifier(c).map(|c| format!("DROP COLUMN {c}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("ALTER TABLE {} {}", identifier(table)?, drops.join(", ")))
}

pub fn select_id_by(table: &str, column: &str, value: &str) -> Result<String> {
    Ok(format!(
        "SELECT id FROM {} WHERE {} = {}",
        identifier(table)?,
        identifier(column)?,
        string_literal(value)
    ))
}

pub fn select_page(table: &str, columns: &[String], limit: u64, offset: u64) -> Result<String> {
    let key = columns
        .first()
        .ok_or_else(|| MigrationError::InvalidIdentifier(String::new()))?;
    Ok(format!(
        "SELECT {} FROM {} ORDER BY {} LIMIT {limit} OFFSET {offset}",
        column_list(Some(columns))?,
        identifier(table)?,
        identifier(key)?
    ))
}

pub fn select_by_keys(table: &str, columns: &[String], keys: &[String]) -> Result<String> {
    let key = columns
        .first()
        .ok_or_else(|| MigrationError::InvalidIdentifier(String::new()))?;
    Ok(format!(
        "SELECT {} FROM {} WHERE {} IN ({})",
        column_list(Some(columns))?,
        identifier(table)?,
        identifier(key)?,
        keys.iter().map(|k| string_literal(k)).join(", ")
    ))
}
