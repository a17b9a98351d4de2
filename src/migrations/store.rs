//! Unit table migrations.

use log::info;

use crate::{
    cache::Caches,
    config::Settings,
    descriptor::{DataSpec, LoadSpec, MangleSpec, MigrationDescriptor, ValidateSpec},
    error::{MigrationError, Result},
    gateway::{self, DumpSpec, Predicate, SchemaSpec, SqlExecutor, sql},
    mangle::{Row, RowFold},
    validate::TableModel,
};

use super::{
    SUBMISSION_TABLE, UNIT_CREATE, UNIT_TABLE,
    transforms::{ColumnIndex, NullPolicy, check_arity, enclose_unless_null, lookup_or},
};

const UNIT_SOURCE_TABLE: &str = "pootle_store_unit_source";
const USER_TABLE: &str = "accounts_user";
const SYSTEM_USERNAME: &str = "system";
const CREATION_SUBMISSIONS: &str = "creation_submissions";

const STRING_COLUMNS: [&str; 2] = ["source_f", "target_f"];
const MAYBE_STRING_COLUMNS: [&str; 7] = [
    "translator_comment",
    "developer_comment",
    "context",
    "locations",
    "unitid_hash",
    "source_hash",
    "unitid",
];
const DATE_COLUMNS: [&str; 4] = ["mtime", "submitted_on", "creation_time", "reviewed_on"];

fn creation_submissions(system_user_id: i64) -> DumpSpec {
    DumpSpec::table(SUBMISSION_TABLE)
        .columns(&["unit_id", "submitter_id"])
        .filter(Predicate::eq("type", UNIT_CREATE))
        .filter(Predicate::ne("submitter_id", system_user_id))
}

/// Fills in `system_user_id` from the `system` account when the settings
/// leave it out.
pub fn resolve_system_user(settings: &mut Settings, db: &mut dyn SqlExecutor) -> Result<()> {
    if settings.system_user_id.is_some() {
        return Ok(());
    }
    let statement = sql::select_id_by(USER_TABLE, "username", SYSTEM_USERNAME)?;
    let id = gateway::query(db, &statement)?
        .into_iter()
        .next()
        .and_then(|row| row.into_iter().next().flatten())
        .and_then(|id| id.parse::<i64>().ok())
        .ok_or(MigrationError::MissingSetting("system_user_id"))?;
    info!("Using system user {id} from {USER_TABLE}");
    settings.system_user_id = Some(id);
    Ok(())
}

/// Appends `created_by_id` to every unit.
pub fn store_0027(settings: &Settings) -> Result<MigrationDescriptor> {
    let system_user_id = settings.system_user_id()?;
    Ok(MigrationDescriptor::new("pootle_store_0027")
        .with_dump(CREATION_SUBMISSIONS, creation_submissions(system_user_id))
        .with_dump("unit_data", DumpSpec::table(UNIT_TABLE))
        .with_schema("units", SchemaSpec::column_names(UNIT_TABLE))
        .with_data("units", DataSpec::schema())
        .with_mangle(
            "units",
            MangleSpec::new("unit_data", UnitRewrite { system_user_id })
                .target("new_units")
                .parse(&[CREATION_SUBMISSIONS]),
        )
        .with_load("new_units", LoadSpec::into_table(UNIT_TABLE).force())
        .with_validate(
            "pootle_store_unit_temp",
            ValidateSpec::new(
                TableModel::new(UNIT_TABLE),
                &["id", "source_f", "target_f", "developer_comment", "translator_comment"],
            )
            .step(settings.validate_step()),
        ))
}

/// Builds the unit source table: one numbered row per unit with its creator.
pub fn store_0033(settings: &Settings) -> Result<MigrationDescriptor> {
    let system_user_id = settings.system_user_id()?;
    Ok(MigrationDescriptor::new("pootle_store_0033")
        .with_dump(CREATION_SUBMISSIONS, creation_submissions(system_user_id))
        .with_dump("unit_pks", DumpSpec::table(UNIT_TABLE).columns(&["id"]))
        .with_mangle(
            "units",
            MangleSpec::new("unit_pks", UnitSourceRows { system_user_id })
                .target("new_units")
                .parse(&[CREATION_SUBMISSIONS]),
        )
        .with_load("new_units", LoadSpec::into_table(UNIT_SOURCE_TABLE).force()))
}

/// Per-column treatment of a dumped unit row.
pub struct UnitLayout {
    width: usize,
    id: usize,
    policies: Vec<NullPolicy>,
    enclosed: Vec<bool>,
}

impl UnitLayout {
    /// The schema already carries `created_by_id`; the dump does not.
    fn resolve(columns: &ColumnIndex) -> Result<Self> {
        let width = columns.len().saturating_sub(1);
        let strings = columns.positions(&STRING_COLUMNS)?;
        let unitid = columns.position("unitid")?;
        let mut enclosed = vec![false; width];
        for idx in strings
            .iter()
            .copied()
            .chain(columns.positions(&DATE_COLUMNS)?)
            .chain(columns.positions(&MAYBE_STRING_COLUMNS)?)
            .filter(|idx| *idx < width)
        {
            enclosed[idx] = true;
        }
        let policies = (0..width)
            .map(|idx| {
                if strings.contains(&idx) || idx == unitid {
                    NullPolicy::Empty
                } else {
                    NullPolicy::Placeholder
                }
            })
            .collect();
        Ok(UnitLayout {
            width,
            id: columns.position("id")?,
            policies,
            enclosed,
        })
    }
}

pub struct UnitRewrite {
    pub system_user_id: i64,
}

impl RowFold for UnitRewrite {
    type State = UnitLayout;

    fn start(&self, caches: &Caches) -> Result<UnitLayout> {
        UnitLayout::resolve(&ColumnIndex::from_schema(caches, "units")?)
    }

    fn fold(&self, layout: UnitLayout, row: Row, caches: &Caches) -> Result<(UnitLayout, Option<Row>)> {
        check_arity(&row, layout.width)?;
        let submitter = lookup_or(
            caches,
            CREATION_SUBMISSIONS,
            &row[layout.id],
            &self.system_user_id.to_string(),
        )?;
        let mut rewritten = row
            .into_iter()
            .enumerate()
            .map(|(idx, value)| {
                let value = layout.policies[idx].apply(value);
                if layout.enclosed[idx] {
                    enclose_unless_null(value)
                } else {
                    value
                }
            })
            .collect::<Row>();
        rewritten.push(submitter);
        Ok((layout, Some(rewritten)))
    }
}

/// `[row number, creator, unit id]` for every unit id.
pub struct UnitSourceRows {
    pub system_user_id: i64,
}

impl RowFold for UnitSourceRows {
    /// Rows emitted so far.
    type State = u64;

    fn start(&self, _caches: &Caches) -> Result<u64> {
        Ok(0)
    }

    fn fold(&self, count: u64, row: Row, caches: &Caches) -> Result<(u64, Option<Row>)> {
        check_arity(&row, 1)?;
        let count = count + 1;
        let unit = row.into_iter().next().unwrap_or_default();
        let submitter = lookup_or(
            caches,
            CREATION_SUBMISSIONS,
            &unit,
            &self.system_user_id.to_string(),
        )?;
        Ok((count, Some(vec![count.to_string(), submitter, unit])))
    }
}
