//! Per-stage telemetry records yielded by the pipeline.

use std::{fmt, path::PathBuf, time::Duration};

use serde::{Serialize, Serializer};

use crate::pipeline::Stage;

fn seconds<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

#[derive(Debug, Clone, Serialize)]
pub struct DumpReport {
    pub table: String,
    pub path: PathBuf,
    pub rows: u64,
    #[serde(serialize_with = "seconds")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseReport {
    pub name: String,
    pub source: PathBuf,
    /// Distinct keys kept in the cache.
    pub count: usize,
    /// Rows read from the file.
    pub total: usize,
    #[serde(serialize_with = "seconds")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct MangleReport {
    pub name: String,
    pub source: PathBuf,
    /// `None` when rows were kept in memory.
    pub target: Option<PathBuf>,
    pub count: usize,
    pub total: usize,
    #[serde(serialize_with = "seconds")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateReport {
    pub table: String,
    pub source: String,
    #[serde(serialize_with = "seconds")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlterReport {
    pub table: String,
    pub columns: Vec<String>,
    /// False when the columns were already gone.
    pub applied: bool,
    #[serde(serialize_with = "seconds")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub path: PathBuf,
    pub rows: u64,
    pub truncated: bool,
    #[serde(serialize_with = "seconds")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateReport {
    pub table: String,
    pub columns: Vec<String>,
    pub model: String,
    pub count: u64,
    pub total: u64,
    #[serde(serialize_with = "seconds")]
    pub elapsed: Duration,
}

/// One unit of pipeline work, tagged by stage.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StageReport {
    Dump(DumpReport),
    Schema(DumpReport),
    Parse(ParseReport),
    Mangle(MangleReport),
    Create(CreateReport),
    Alter(AlterReport),
    Load(LoadReport),
    Validate(ValidateReport),
}

impl StageReport {
    pub fn stage(&self) -> Stage {
        match self {
            StageReport::Dump(_) => Stage::Dump,
            StageReport::Schema(_) => Stage::Schema,
            StageReport::Parse(_) => Stage::Parse,
            StageReport::Mangle(_) => Stage::Mangle,
            StageReport::Create(_) => Stage::Create,
            StageReport::Alter(_) => Stage::Alter,
            StageReport::Load(_) => Stage::Load,
            StageReport::Validate(_) => Stage::Validate,
        }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageReport::Dump(r) | StageReport::Schema(r) => write!(
                f,
                "Table {} with {} rows dumped to '{}' in {:.3} seconds",
                r.table,
                r.rows,
                r.path.display(),
                r.elapsed.as_secs_f64()
            ),
            StageReport::Parse(r) => write!(
                f,
                "Data '{}' loaded from '{}' with {}/{} rows in {:.3} seconds",
                r.name,
                r.source.display(),
                r.count,
                r.total,
                r.elapsed.as_secs_f64()
            ),
            StageReport::Mangle(r) => write!(
                f,
                "Data '{}' mangled from '{}' to '{}' with {}/{} rows in {:.3} seconds",
                r.name,
                r.source.display(),
                r.target
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| ":memory:".to_string()),
                r.count,
                r.total,
                r.elapsed.as_secs_f64()
            ),
            StageReport::Create(r) => write!(
                f,
                "Table '{}' created like '{}' in {:.3} seconds",
                r.table,
                r.source,
                r.elapsed.as_secs_f64()
            ),
            StageReport::Alter(r) => write!(
                f,
                "Table '{}' columns {} ({}) in {:.3} seconds",
                r.table,
                if r.applied { "dropped" } else { "already absent" },
                r.columns.join(", "),
                r.elapsed.as_secs_f64()
            ),
            StageReport::Load(r) => write!(
                f,
                "Data loaded from '{}' to table '{}' with {} rows{} in {:.3} seconds",
                r.path.display(),
                r.table,
                r.rows,
                if r.truncated { " (truncated first)" } else { "" },
                r.elapsed.as_secs_f64()
            ),
            StageReport::Validate(r) => write!(
                f,
                "Validated '{}' ({}) with {} with {}/{} rows in {:.3} seconds",
                r.table,
                r.columns.join(", "),
                r.model,
                r.count,
                r.total,
                r.elapsed.as_secs_f64()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_action_tag_and_seconds() {
        let report = StageReport::Load(LoadReport {
            table: "pootle_app_submission".into(),
            path: PathBuf::from("/tmp/new_submissions.run.txt"),
            rows: 3,
            truncated: true,
            elapsed: Duration::from_millis(1500),
        });
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["action"], "load");
        assert_eq!(json["rows"], 3);
        assert_eq!(json["elapsed"], 1.5);
        assert_eq!(report.stage(), Stage::Load);
    }

    #[test]
    fn mangle_message_names_memory_target() {
        let report = StageReport::Mangle(MangleReport {
            name: "revisions".into(),
            source: PathBuf::from("subs.txt"),
            target: None,
            count: 1,
            total: 4,
            elapsed: Duration::ZERO,
        });
        let text = report.to_string();
        assert!(text.contains("to ':memory:'"), "{text}");
        assert!(text.contains("1/4 rows"), "{text}");
    }
}
