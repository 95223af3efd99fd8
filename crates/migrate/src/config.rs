//! Migrator configuration

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{MigrateError, MigrateResult};
use crate::lock::MIGRATION_LOCK_ID;
use crate::source::{FsMigrationSource, MigrationSource};
use crate::version::VersionTable;

/// Per-engine options
#[derive(Clone)]
pub struct MigratorOptions {
    /// Run each step outside a transaction
    pub disable_tx: bool,
    /// Where migration files and templates are read from
    pub source: Arc<dyn MigrationSource>,
    /// Advisory lock key serializing runs
    pub lock_key: i64,
    /// Cancels any blocking database call made by the migrator
    pub cancel: CancellationToken,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            disable_tx: false,
            source: Arc::new(FsMigrationSource),
            lock_key: MIGRATION_LOCK_ID,
            cancel: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for MigratorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigratorOptions")
            .field("disable_tx", &self.disable_tx)
            .field("lock_key", &self.lock_key)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Deployment-level migrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigratorConfig {
    /// Version table name, optionally schema-qualified
    pub version_table: String,
    /// Directory holding the numbered migration files
    pub migrations_path: PathBuf,
    pub disable_tx: bool,
    pub lock_key: i64,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            version_table: "public.schema_version".to_string(),
            migrations_path: PathBuf::from("migrations"),
            disable_tx: false,
            lock_key: MIGRATION_LOCK_ID,
        }
    }
}

impl MigratorConfig {
    /// Load configuration from `MIGRATE_*` environment variables
    pub fn from_env() -> MigrateResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup, falling back to defaults
    pub fn from_lookup<F>(lookup: F) -> MigrateResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(table) = lookup("MIGRATE_VERSION_TABLE") {
            config.version_table = table;
        }

        if let Some(path) = lookup("MIGRATE_PATH") {
            config.migrations_path = PathBuf::from(path);
        }

        if let Some(value) = lookup("MIGRATE_DISABLE_TX") {
            config.disable_tx = parse_bool(&value).ok_or_else(|| {
                MigrateError::Configuration(format!(
                    "MIGRATE_DISABLE_TX must be true or false, got '{}'",
                    value
                ))
            })?;
        }

        if let Some(value) = lookup("MIGRATE_LOCK_KEY") {
            config.lock_key = value.trim().parse().map_err(|_| {
                MigrateError::Configuration(format!(
                    "MIGRATE_LOCK_KEY must be a 64-bit integer, got '{}'",
                    value
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MigrateResult<()> {
        VersionTable::parse(&self.version_table)?;

        if self.migrations_path.as_os_str().is_empty() {
            return Err(MigrateError::Configuration(
                "migrations path cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Engine options for this configuration, reading from the filesystem
    pub fn options(&self) -> MigratorOptions {
        MigratorOptions {
            disable_tx: self.disable_tx,
            lock_key: self.lock_key,
            ..MigratorOptions::default()
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
