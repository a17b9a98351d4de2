//! Submission table migrations.

use crate::{
    cache::{CacheValue, Caches},
    config::Settings,
    descriptor::{AlterSpec, DataSpec, LoadSpec, MangleSpec, MigrationDescriptor, PostStage},
    error::{MigrationError, Result},
    gateway::{DumpSpec, Predicate, SchemaSpec},
    mangle::{KeepFirstPerKey, Row, RowFold},
};

use super::{
    SUBMISSION_TABLE, UNIT_CREATE, UNIT_TABLE,
    transforms::{ColumnIndex, NullPolicy, check_arity, enclose_unless_null, is_bulk_null},
};

const DROPPED_COLUMNS: [&str; 2] = ["similarity", "mt_similarity"];

/// Sets `revision` on the latest submission of every unit and drops the
/// similarity columns.
pub fn statistics_0008(_settings: &Settings) -> Result<MigrationDescriptor> {
    Ok(MigrationDescriptor::new("pootle_statistics_0008")
        .with_dump(
            "unit_revisions",
            DumpSpec::table(UNIT_TABLE)
                .columns(&["id", "revision"])
                .filter(Predicate::gt("revision", 0)),
        )
        .with_dump(
            "subs_by_unit",
            DumpSpec::table(SUBMISSION_TABLE)
                .columns(&["unit_id", "creation_time", "id"])
                .filter(Predicate::gt("unit_id", 0))
                .order_by(&["unit_id", "-creation_time", "-id"]),
        )
        .with_dump(
            "subs_data",
            DumpSpec::table(SUBMISSION_TABLE).filter(Predicate::gt("unit_id", 0)),
        )
        .with_schema("submission", SchemaSpec::column_names(SUBMISSION_TABLE))
        .with_data(
            "unit_revisions",
            DataSpec::plain().with_loader(revision_loader).ordered(),
        )
        .with_data("submission", DataSpec::schema())
        .with_mangle(
            "revisions",
            MangleSpec::new("subs_by_unit", KeepFirstPerKey::new(0, latest_revision))
                .target("new_revisions")
                .after(PostStage::Discard(vec!["unit_revisions".to_string()])),
        )
        .with_mangle(
            "submissions",
            MangleSpec::new("subs_data", SubmissionRewrite)
                .target("new_submissions")
                .parse(&["new_revisions"]),
        )
        .with_alter(SUBMISSION_TABLE, AlterSpec::drop_columns(&DROPPED_COLUMNS))
        .with_load("new_submissions", LoadSpec::into_table(SUBMISSION_TABLE).force()))
}

/// Reloads submissions without the unit creation rows.
pub fn statistics_0011(_settings: &Settings) -> Result<MigrationDescriptor> {
    Ok(MigrationDescriptor::new("pootle_statistics_0011")
        .with_dump(
            "subs_data",
            DumpSpec::table(SUBMISSION_TABLE)
                .filter(Predicate::gt("unit_id", 0))
                .filter(Predicate::ne("type", UNIT_CREATE)),
        )
        .with_load("subs_data", LoadSpec::into_table(SUBMISSION_TABLE).force()))
}

/// `unit id, revision` rows, keeping positive revisions only.
pub fn revision_loader(row: &[String]) -> Result<Option<(String, CacheValue)>> {
    let [unit, revision] = row else {
        return Err(MigrationError::ArityMismatch {
            expected: 2,
            found: row.len(),
        });
    };
    let revision: i64 = revision
        .trim()
        .parse()
        .map_err(|_| MigrationError::InvalidValue {
            value: revision.clone(),
            context: "unit revision".to_string(),
        })?;
    Ok((revision > 0).then(|| (unit.clone(), CacheValue::Integer(revision))))
}

/// First row of a unit group (newest submission): `[submission id, revision]`.
fn latest_revision(row: &Row, caches: &Caches) -> Result<Option<Row>> {
    check_arity(row, 3)?;
    let revision = caches
        .get("unit_revisions")?
        .get(&row[0])
        .and_then(CacheValue::as_integer)
        .unwrap_or(0);
    Ok((revision > 0).then(|| vec![row[2].clone(), revision.to_string()]))
}

/// Positions in a dumped submission row, resolved once per run.
pub struct SubmissionLayout {
    width: usize,
    id: usize,
    unit_id: usize,
    revision: usize,
    removed: Vec<usize>,
    text: Vec<usize>,
    enclosed: Vec<usize>,
}

impl SubmissionLayout {
    fn resolve(columns: &ColumnIndex) -> Result<Self> {
        let text = columns.positions(&["old_value", "new_value"])?;
        let mut enclosed = text.clone();
        enclosed.push(columns.position("creation_time")?);
        Ok(SubmissionLayout {
            width: columns.len(),
            id: columns.position("id")?,
            unit_id: columns.position("unit_id")?,
            revision: columns.position("revision")?,
            removed: columns.positions(&DROPPED_COLUMNS)?,
            text,
            enclosed,
        })
    }
}

/// Rewrites a full submission row for the altered table.
pub struct SubmissionRewrite;

impl RowFold for SubmissionRewrite {
    type State = SubmissionLayout;

    fn start(&self, caches: &Caches) -> Result<SubmissionLayout> {
        SubmissionLayout::resolve(&ColumnIndex::from_schema(caches, "submission")?)
    }

    fn fold(
        &self,
        layout: SubmissionLayout,
        row: Row,
        caches: &Caches,
    ) -> Result<(SubmissionLayout, Option<Row>)> {
        check_arity(&row, layout.width)?;
        // Submissions whose unit is gone are not carried over.
        if is_bulk_null(&row[layout.unit_id]) {
            return Ok((layout, None));
        }
        let revision = caches
            .get("new_revisions")?
            .get(&row[layout.id])
            .map(CacheValue::to_field);

        let mut rewritten = Vec::with_capacity(row.len() - layout.removed.len());
        for (idx, value) in row.into_iter().enumerate() {
            if layout.removed.contains(&idx) {
                continue;
            }
            let value = match &revision {
                Some(revision) if idx == layout.revision => revision.clone(),
                _ if layout.text.contains(&idx) => NullPolicy::Empty.apply(value),
                _ => NullPolicy::Placeholder.apply(value),
            };
            rewritten.push(if layout.enclosed.contains(&idx) {
                enclose_unless_null(value)
            } else {
                value
            });
        }
        Ok((layout, Some(rewritten)))
    }
}
