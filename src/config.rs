use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::MigrationError;
use crate::validate::DEFAULT_STEP;

/// Values read from the optional YAML settings file. Command-line flags take
/// precedence over every field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    /// Account credited with rows that have no recorded creator.
    pub system_user_id: Option<i64>,
    pub validate_step: Option<u64>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        load_from_path(path).with_context(|| format!("Loading settings from {path:?}"))
    }

    pub fn system_user_id(&self) -> std::result::Result<i64, MigrationError> {
        self.system_user_id
            .ok_or(MigrationError::MissingSetting("system_user_id"))
    }

    pub fn validate_step(&self) -> u64 {
        self.validate_step.unwrap_or(DEFAULT_STEP)
    }
}

fn read_to_string(path: &Path) -> Result<String> {
    let mut file = File::open(path).with_context(|| format!("Opening YAML file {path:?}"))?;
    let mut buf = String::new();
    file.read_to_string(&mut buf)?;
    Ok(buf)
}

pub fn load_from_path<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = read_to_string(path)?;
    Ok(serde_yaml::from_str(&raw)?)
}
