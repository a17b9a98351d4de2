//! Registry of the built-in migrations.

pub mod statistics;
pub mod store;
pub mod transforms;

use itertools::Itertools;

use crate::{
    config::Settings,
    descriptor::MigrationDescriptor,
    error::{MigrationError, Result},
};

pub(crate) const SUBMISSION_TABLE: &str = "pootle_app_submission";
pub(crate) const UNIT_TABLE: &str = "pootle_store_unit";
/// Submission type recorded when a unit is created.
pub(crate) const UNIT_CREATE: i64 = 10;

pub type DescriptorBuilder = fn(&Settings) -> Result<MigrationDescriptor>;

#[derive(Debug, Clone, Copy)]
pub struct MigrationEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub build: DescriptorBuilder,
    /// The builder reads `system_user_id`, looked up in the database when
    /// the settings leave it out.
    pub needs_system_user: bool,
}

const REGISTRY: &[MigrationEntry] = &[
    MigrationEntry {
        name: "pootle_statistics_0008",
        description: "Set submission revisions from unit revisions and drop similarity columns",
        build: statistics::statistics_0008,
        needs_system_user: false,
    },
    MigrationEntry {
        name: "pootle_statistics_0011",
        description: "Reload submissions without unit creation rows",
        build: statistics::statistics_0011,
        needs_system_user: false,
    },
    MigrationEntry {
        name: "pootle_store_0027",
        description: "Add created_by_id to units from creation submissions",
        build: store::store_0027,
        needs_system_user: true,
    },
    MigrationEntry {
        name: "pootle_store_0033",
        description: "Populate unit sources with their creating user",
        build: store::store_0033,
        needs_system_user: true,
    },
];

pub fn registry() -> &'static [MigrationEntry] {
    REGISTRY
}

pub fn find(name: &str) -> Result<&'static MigrationEntry> {
    REGISTRY
        .iter()
        .find(|entry| entry.name == name)
        .ok_or_else(|| MigrationError::UnknownMigration {
            name: name.to_string(),
            available: REGISTRY.iter().map(|entry| entry.name).join(", "),
        })
}
