//! Declarative description of one migration.
//!
//! Every stage is a map from a logical dataset (or table) name to its spec.
//! Maps keep declaration order, which is also execution order within a stage.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::{
    cache::RowLoader,
    dialect::BulkDialect,
    error::{MigrationError, Result},
    gateway::{DumpSpec, SchemaSpec},
    mangle::Transform,
    validate::{DEFAULT_STEP, DataModel},
};

/// How a dumped file is parsed into a cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataSpec {
    pub loader: Option<RowLoader>,
    pub preserve_order: bool,
    /// The dataset is the schema dump `schema__<name>`.
    pub schema: bool,
}

impl DataSpec {
    pub fn plain() -> Self {
        DataSpec::default()
    }

    /// Column names of a schema dump, in ordinal order.
    pub fn schema() -> Self {
        DataSpec {
            loader: None,
            preserve_order: true,
            schema: true,
        }
    }

    pub fn with_loader(mut self, loader: RowLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn ordered(mut self) -> Self {
        self.preserve_order = true;
        self
    }
}

/// Hook run right after a mangle stage finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostStage {
    /// Drop caches nobody reads any more.
    Discard(Vec<String>),
}

pub struct MangleSpec {
    pub source: String,
    /// `None` keeps the result in memory as `mangled__<name>`.
    pub target: Option<String>,
    pub transform: Box<dyn Transform>,
    /// Datasets parsed right before this stage runs.
    pub parse: Vec<String>,
    pub after: Option<PostStage>,
    pub reader: BulkDialect,
    pub writer: BulkDialect,
}

impl MangleSpec {
    pub fn new(source: &str, transform: impl Transform + 'static) -> Self {
        MangleSpec {
            source: source.to_string(),
            target: None,
            transform: Box::new(transform),
            parse: Vec::new(),
            after: None,
            reader: BulkDialect::default(),
            writer: BulkDialect::loader(),
        }
    }

    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn parse(mut self, datasets: &[&str]) -> Self {
        self.parse = datasets.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn after(mut self, hook: PostStage) -> Self {
        self.after = Some(hook);
        self
    }

    pub fn reader(mut self, reader: BulkDialect) -> Self {
        self.reader = reader;
        self
    }

    pub fn writer(mut self, writer: BulkDialect) -> Self {
        self.writer = writer;
        self
    }
}

/// `CREATE TABLE <key> LIKE <source>`, skipped when the table exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSpec {
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterSpec {
    DropColumns(Vec<String>),
}

impl AlterSpec {
    pub fn drop_columns(columns: &[&str]) -> Self {
        AlterSpec::DropColumns(columns.iter().map(|c| c.to_string()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSpec {
    pub table: String,
    /// Truncate a non-empty destination instead of failing.
    pub force: bool,
    /// Read the file from the client side (`LOAD DATA LOCAL`).
    pub local: bool,
}

impl LoadSpec {
    pub fn into_table(table: &str) -> Self {
        LoadSpec {
            table: table.to_string(),
            force: false,
            local: false,
        }
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }
}

pub struct ValidateSpec {
    pub model: Box<dyn DataModel>,
    /// First column is the primary key.
    pub columns: Vec<String>,
    pub check_count: bool,
    pub step: u64,
}

impl ValidateSpec {
    pub fn new(model: impl DataModel + 'static, columns: &[&str]) -> Self {
        ValidateSpec {
            model: Box::new(model),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            check_count: false,
            step: DEFAULT_STEP,
        }
    }

    pub fn check_count(mut self) -> Self {
        self.check_count = true;
        self
    }

    pub fn step(mut self, step: u64) -> Self {
        self.step = step;
        self
    }
}

pub struct MigrationDescriptor {
    pub name: String,
    pub dump: IndexMap<String, DumpSpec>,
    pub schema: IndexMap<String, SchemaSpec>,
    pub data: IndexMap<String, DataSpec>,
    pub mangle: IndexMap<String, MangleSpec>,
    pub create: IndexMap<String, CreateSpec>,
    pub alter: IndexMap<String, AlterSpec>,
    pub load: IndexMap<String, LoadSpec>,
    pub validate: IndexMap<String, ValidateSpec>,
}

impl MigrationDescriptor {
    pub fn new(name: &str) -> Self {
        MigrationDescriptor {
            name: name.to_string(),
            dump: IndexMap::new(),
            schema: IndexMap::new(),
            data: IndexMap::new(),
            mangle: IndexMap::new(),
            create: IndexMap::new(),
            alter: IndexMap::new(),
            load: IndexMap::new(),
            validate: IndexMap::new(),
        }
    }

    pub fn with_dump(mut self, name: &str, spec: DumpSpec) -> Self {
        self.dump.insert(name.to_string(), spec);
        self
    }

    pub fn with_schema(mut self, name: &str, spec: SchemaSpec) -> Self {
        self.schema.insert(name.to_string(), spec);
        self
    }

    pub fn with_data(mut self, name: &str, spec: DataSpec) -> Self {
        self.data.insert(name.to_string(), spec);
        self
    }

    pub fn with_mangle(mut self, name: &str, spec: MangleSpec) -> Self {
        self.mangle.insert(name.to_string(), spec);
        self
    }

    pub fn with_create(mut self, table: &str, spec: CreateSpec) -> Self {
        self.create.insert(table.to_string(), spec);
        self
    }

    pub fn with_alter(mut self, table: &str, spec: AlterSpec) -> Self {
        self.alter.insert(table.to_string(), spec);
        self
    }

    pub fn with_load(mut self, name: &str, spec: LoadSpec) -> Self {
        self.load.insert(name.to_string(), spec);
        self
    }

    pub fn with_validate(mut self, table: &str, spec: ValidateSpec) -> Self {
        self.validate.insert(table.to_string(), spec);
        self
    }

    /// Checks that every stage only refers to datasets an earlier stage
    /// produces.
    pub fn check(&self) -> Result<()> {
        for (name, spec) in &self.data {
            let known = if spec.schema {
                self.schema.contains_key(name)
            } else {
                self.dump.contains_key(name)
            };
            if !known {
                let stage = if spec.schema { "schema" } else { "dump" };
                return Err(self.malformed(format!("data '{name}' has no {stage} entry")));
            }
        }

        let mut produced: HashSet<&str> = self.dump.keys().map(String::as_str).collect();
        for (name, spec) in &self.mangle {
            if !produced.contains(spec.source.as_str()) {
                return Err(self.malformed(format!(
                    "mangle '{name}' reads '{}' which no dump or earlier mangle produces",
                    spec.source
                )));
            }
            if let Some(extra) = spec.parse.iter().find(|d| !produced.contains(d.as_str())) {
                return Err(self.malformed(format!(
                    "mangle '{name}' parses '{extra}' which no dump or earlier mangle produces"
                )));
            }
            if let Some(target) = &spec.target {
                produced.insert(target);
            }
        }

        if let Some(name) = self.load.keys().find(|k| !produced.contains(k.as_str())) {
            return Err(self.malformed(format!(
                "load '{name}' is neither a dump nor a mangle target"
            )));
        }

        for (table, spec) in &self.alter {
            let AlterSpec::DropColumns(columns) = spec;
            if columns.is_empty() {
                return Err(self.malformed(format!("alter '{table}' drops no columns")));
            }
        }

        for (table, spec) in &self.validate {
            if spec.columns.is_empty() || spec.step == 0 {
                return Err(self.malformed(format!(
                    "validate '{table}' needs at least one column and a positive step"
                )));
            }
        }
        Ok(())
    }

    fn malformed(&self, detail: String) -> MigrationError {
        MigrationError::MalformedDescriptor {
            migration: self.name.clone(),
            detail,
        }
    }
}
