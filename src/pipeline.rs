//! Stage orchestration.
//!
//! A [`Pipeline`] turns a [`MigrationDescriptor`] into an ordered plan of
//! steps and executes them lazily: every call to `next` runs one unit of work
//! and yields its [`StageReport`]. After a failure the error is yielded once
//! and the iterator ends.

use std::{
    collections::VecDeque,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    time::Instant,
};

use clap::ValueEnum;
use log::{info, warn};
use serde::Serialize;

use crate::{
    cache::{self, Caches},
    descriptor::{AlterSpec, MigrationDescriptor, PostStage},
    dialect::BulkDialect,
    error::{DbErrorKind, Result},
    gateway::Gateway,
    io_utils,
    mangle::Mangler,
    report::{AlterReport, MangleReport, ParseReport, StageReport, ValidateReport},
    validate,
};

const RUN_NAME_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dump,
    Schema,
    Parse,
    Mangle,
    Create,
    Alter,
    Load,
    Validate,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Dump => "dump",
            Stage::Schema => "schema",
            Stage::Parse => "parse",
            Stage::Mangle => "mangle",
            Stage::Create => "create",
            Stage::Alter => "alter",
            Stage::Load => "load",
            Stage::Validate => "validate",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        <Stage as ValueEnum>::from_str(value.trim(), true)
    }
}

/// Which stages a run executes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFilter {
    only: Option<Vec<Stage>>,
}

impl ActionFilter {
    /// Every stage except validation.
    pub fn all() -> Self {
        ActionFilter { only: None }
    }

    pub fn only(stages: &[Stage]) -> Self {
        if stages.is_empty() {
            return ActionFilter::all();
        }
        ActionFilter {
            only: Some(stages.to_vec()),
        }
    }

    pub fn wants(&self, stage: Stage) -> bool {
        match &self.only {
            None => stage != Stage::Validate,
            Some(stages) => stages.contains(&stage),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    /// Namespaces every artifact of a run; reuse it to resume.
    pub run_name: String,
    pub actions: ActionFilter,
}

impl RunOptions {
    pub fn new(output_dir: &Path, run_name: Option<String>) -> Self {
        RunOptions {
            output_dir: output_dir.to_path_buf(),
            run_name: run_name.unwrap_or_else(generate_run_name),
            actions: ActionFilter::all(),
        }
    }

    pub fn with_actions(mut self, actions: ActionFilter) -> Self {
        self.actions = actions;
        self
    }

    pub fn artifact_path(&self, key: &str) -> PathBuf {
        io_utils::artifact_path(&self.output_dir, &self.run_name, key)
    }
}

pub fn generate_run_name() -> String {
    let mut token = uuid::Uuid::new_v4().simple().to_string();
    token.truncate(RUN_NAME_LEN);
    token
}

/// Where the pipeline is in its fixed stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Dumping,
    SchemaDumping,
    Parsing,
    Mangling,
    Creating,
    Altering,
    Loading,
    Validating,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
enum Step {
    Dump(String),
    Schema(String),
    Parse(String),
    ParseExtra(String),
    Mangle(String),
    Create(String),
    Alter(String),
    Load(String),
    Validate {
        table: String,
        batch: Option<Batch>,
    },
}

#[derive(Debug, Clone, Copy)]
struct Batch {
    offset: u64,
    total: u64,
    started: Instant,
}

impl Step {
    fn state(&self) -> PipelineState {
        match self {
            Step::Dump(_) => PipelineState::Dumping,
            Step::Schema(_) => PipelineState::SchemaDumping,
            Step::Parse(_) | Step::ParseExtra(_) => PipelineState::Parsing,
            Step::Mangle(_) => PipelineState::Mangling,
            Step::Create(_) => PipelineState::Creating,
            Step::Alter(_) => PipelineState::Altering,
            Step::Load(_) => PipelineState::Loading,
            Step::Validate { .. } => PipelineState::Validating,
        }
    }
}

pub struct Pipeline<'a> {
    descriptor: &'a MigrationDescriptor,
    gateway: &'a mut Gateway,
    options: RunOptions,
    caches: Caches,
    plan: VecDeque<Step>,
    state: PipelineState,
}

impl<'a> Pipeline<'a> {
    /// Validates the descriptor and plans the run. Nothing executes until the
    /// pipeline is iterated.
    pub fn new(
        descriptor: &'a MigrationDescriptor,
        gateway: &'a mut Gateway,
        options: RunOptions,
    ) -> Result<Self> {
        descriptor.check()?;
        let plan = plan(descriptor, &options.actions);
        info!(
            "Planned {} step(s) for migration {} (run {})",
            plan.len(),
            descriptor.name,
            options.run_name
        );
        Ok(Pipeline {
            descriptor,
            gateway,
            options,
            caches: Caches::new(),
            plan,
            state: PipelineState::Idle,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    fn execute(&mut self, step: Step) -> Result<Option<StageReport>> {
        self.state = step.state();
        match step {
            Step::Dump(name) => {
                let spec = &self.descriptor.dump[&name];
                let path = self.options.artifact_path(&name);
                self.gateway.dump(spec, &path).map(|r| Some(StageReport::Dump(r)))
            }
            Step::Schema(name) => {
                let spec = &self.descriptor.schema[&name];
                let path = self.options.artifact_path(&io_utils::schema_key(&name));
                self.gateway
                    .dump_schema(spec, &path)
                    .map(|r| Some(StageReport::Schema(r)))
            }
            Step::Parse(name) => {
                let spec = self.descriptor.data[&name];
                let key = if spec.schema {
                    io_utils::schema_key(&name)
                } else {
                    name
                };
                self.parse(key, spec.loader, spec.preserve_order).map(Some)
            }
            Step::ParseExtra(name) => self.parse(name, None, false).map(Some),
            Step::Mangle(name) => self.mangle(&name).map(Some),
            Step::Create(table) => {
                let spec = &self.descriptor.create[&table];
                if self.gateway.row_count(&table)?.is_some() {
                    info!("Table {table} already exists; skipping create");
                    return Ok(None);
                }
                self.gateway
                    .create_like(&spec.source, &table)
                    .map(|r| Some(StageReport::Create(r)))
            }
            Step::Alter(table) => self.alter(&table).map(Some),
            Step::Load(name) => {
                let spec = &self.descriptor.load[&name];
                let path = self.options.artifact_path(&name);
                self.gateway
                    .load(&spec.table, &path, spec.force, spec.local)
                    .map(|r| Some(StageReport::Load(r)))
            }
            Step::Validate { table, batch } => self.validate(table, batch).map(Some),
        }
    }

    fn parse(
        &mut self,
        name: String,
        loader: Option<cache::RowLoader>,
        preserve_order: bool,
    ) -> Result<StageReport> {
        let path = self.options.artifact_path(&name);
        let outcome = cache::load_as_mapping(&path, &BulkDialect::default(), loader, preserve_order)?;
        info!("Parsed {} into {} key(s)", name, outcome.count);
        self.caches.insert(name.clone(), outcome.data);
        Ok(StageReport::Parse(ParseReport {
            name,
            source: outcome.source,
            count: outcome.count,
            total: outcome.total,
            elapsed: outcome.elapsed,
        }))
    }

    fn mangle(&mut self, name: &str) -> Result<StageReport> {
        let spec = &self.descriptor.mangle[name];
        let source = self.options.artifact_path(&spec.source);
        let target = spec.target.as_deref().map(|t| self.options.artifact_path(t));
        let outcome = Mangler::new(&source, target.as_deref())
            .with_reader(spec.reader)
            .with_writer(spec.writer)
            .mangle(spec.transform.as_ref(), &self.caches)?;
        if let Some(PostStage::Discard(datasets)) = &spec.after {
            for dataset in datasets {
                if self.caches.remove(dataset).is_some() {
                    info!("Discarded cache {dataset}");
                }
            }
        }
        if target.is_none() {
            self.caches
                .insert_mangled(io_utils::mangled_key(name), outcome.rows);
        }
        Ok(StageReport::Mangle(MangleReport {
            name: name.to_string(),
            source: outcome.source,
            target: outcome.target,
            count: outcome.count,
            total: outcome.total,
            elapsed: outcome.elapsed,
        }))
    }

    fn alter(&mut self, table: &str) -> Result<StageReport> {
        let start = Instant::now();
        let AlterSpec::DropColumns(columns) = &self.descriptor.alter[table];
        let applied = match self.gateway.drop_columns(table, columns) {
            Ok(()) => true,
            Err(err) if err.db_kind() == Some(DbErrorKind::NoSuchColumn) => {
                warn!("Columns of {table} already dropped: {err}");
                false
            }
            Err(err) => return Err(err),
        };
        Ok(StageReport::Alter(AlterReport {
            table: table.to_string(),
            columns: columns.clone(),
            applied,
            elapsed: start.elapsed(),
        }))
    }

    fn validate(&mut self, table: String, batch: Option<Batch>) -> Result<StageReport> {
        let spec = &self.descriptor.validate[&table];
        let db = self.gateway.executor();
        let batch = match batch {
            Some(batch) => batch,
            None => {
                let total = validate::count_rows(db, &table)?;
                if spec.check_count {
                    validate::check_count(db, &table, spec.model.as_ref(), total)?;
                }
                Batch {
                    offset: 0,
                    total,
                    started: Instant::now(),
                }
            }
        };
        validate::compare_batch(
            db,
            &table,
            spec.model.as_ref(),
            &spec.columns,
            spec.step,
            batch.offset,
        )?;
        let next_offset = batch.offset + spec.step;
        let report = ValidateReport {
            table: table.clone(),
            columns: spec.columns.clone(),
            model: spec.model.label(),
            count: next_offset.min(batch.total),
            total: batch.total,
            elapsed: batch.started.elapsed(),
        };
        if next_offset < batch.total {
            self.plan.push_front(Step::Validate {
                table,
                batch: Some(Batch {
                    offset: next_offset,
                    ..batch
                }),
            });
        }
        Ok(StageReport::Validate(report))
    }
}

impl Iterator for Pipeline<'_> {
    type Item = Result<StageReport>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state == PipelineState::Failed {
            return None;
        }
        loop {
            let Some(step) = self.plan.pop_front() else {
                self.state = PipelineState::Done;
                return None;
            };
            match self.execute(step) {
                Ok(Some(report)) => return Some(Ok(report)),
                Ok(None) => continue,
                Err(err) => {
                    self.state = PipelineState::Failed;
                    self.plan.clear();
                    return Some(Err(err));
                }
            }
        }
    }
}

fn plan(descriptor: &MigrationDescriptor, actions: &ActionFilter) -> VecDeque<Step> {
    let mut plan = VecDeque::new();
    if actions.wants(Stage::Dump) {
        plan.extend(descriptor.dump.keys().cloned().map(Step::Dump));
    }
    if actions.wants(Stage::Schema) {
        plan.extend(descriptor.schema.keys().cloned().map(Step::Schema));
    }
    if actions.wants(Stage::Mangle) {
        plan.extend(descriptor.data.keys().cloned().map(Step::Parse));
        for (name, spec) in &descriptor.mangle {
            plan.extend(spec.parse.iter().cloned().map(Step::ParseExtra));
            plan.push_back(Step::Mangle(name.clone()));
        }
    } else if actions.wants(Stage::Parse) {
        plan.extend(descriptor.data.keys().cloned().map(Step::Parse));
    }
    if actions.wants(Stage::Create) {
        plan.extend(descriptor.create.keys().cloned().map(Step::Create));
    }
    if actions.wants(Stage::Alter) {
        plan.extend(descriptor.alter.keys().cloned().map(Step::Alter));
    }
    if actions.wants(Stage::Load) {
        plan.extend(descriptor.load.keys().cloned().map(Step::Load));
    }
    if actions.wants(Stage::Validate) {
        plan.extend(
            descriptor
                .validate
                .keys()
                .cloned()
                .map(|table| Step::Validate { table, batch: None }),
        );
    }
    plan
}
