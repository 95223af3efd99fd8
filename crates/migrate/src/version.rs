//! Version store - the single persisted integer recording applied migrations

use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backends::DatabaseConnection;
use crate::error::{MigrateError, MigrateResult, VersionKind};
use crate::lock::{cancellable, interrupt_abandoned, AdvisoryLock};

/// Name of the version table, optionally schema-qualified
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionTable {
    name: String,
    schema: Option<String>,
    table: String,
}

impl VersionTable {
    /// Parse `table` or `schema.table`
    pub fn parse(name: &str) -> MigrateResult<Self> {
        let name = name.trim();
        let (schema, table) = match name.split_once('.') {
            Some((schema, table)) => (Some(schema), table),
            None => (None, name),
        };

        let valid = !table.is_empty()
            && !table.contains('.')
            && schema.map(|s| !s.is_empty()).unwrap_or(true);
        if !valid {
            return Err(MigrateError::Configuration(format!(
                "invalid version table name '{}'",
                name
            )));
        }

        Ok(Self {
            name: name.to_string(),
            schema: schema.map(str::to_string),
            table: table.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl fmt::Display for VersionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Reads and writes the persisted version
#[derive(Debug, Clone)]
pub struct VersionStore {
    table: VersionTable,
}

impl VersionStore {
    pub fn new(table: VersionTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &VersionTable {
        &self.table
    }

    /// Create the version table with a single zero row unless it already exists.
    ///
    /// Runs under the advisory lock, which is released whatever the outcome.
    pub async fn ensure_exists(
        &self,
        conn: &mut dyn DatabaseConnection,
        lock: &AdvisoryLock,
        cancel: &CancellationToken,
    ) -> MigrateResult<()> {
        lock.acquire(conn, cancel).await?;

        let result = self.create_if_missing(conn, cancel).await;
        if matches!(result, Err(MigrateError::Cancelled)) {
            interrupt_abandoned(conn).await;
        }
        let released = lock.release(conn).await;

        match (result, released) {
            (Err(err), Err(release_err)) => {
                warn!("Failed to release migration lock: {}", release_err);
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), released) => released,
        }
    }

    async fn create_if_missing(
        &self,
        conn: &mut dyn DatabaseConnection,
        cancel: &CancellationToken,
    ) -> MigrateResult<()> {
        let exists = cancellable(
            cancel,
            conn.table_exists(self.table.schema(), self.table.table()),
        )
        .await??;
        if exists {
            return Ok(());
        }

        let sql = format!(
            "create table if not exists {table}(version int4 not null);\n\
             insert into {table}(version) select 0 where 0=(select count(*) from {table});",
            table = self.table
        );
        cancellable(cancel, conn.execute_batch(&sql)).await??;
        info!("Created version table {}", self.table);
        Ok(())
    }

    /// Read the persisted version
    pub async fn current(&self, conn: &mut dyn DatabaseConnection) -> MigrateResult<i32> {
        let sql = format!("select version from {}", self.table);
        let value = conn.fetch_scalar(&sql, &[]).await?;
        value.as_i32().ok_or_else(|| {
            MigrateError::Configuration(format!(
                "version table {} holds a non-integer version: {}",
                self.table, value
            ))
        })
    }

    /// Overwrite the persisted version
    pub async fn set(&self, conn: &mut dyn DatabaseConnection, version: i32) -> MigrateResult<()> {
        let sql = format!("update {} set version=$1", self.table);
        conn.execute(&sql, &[version.into()]).await?;
        Ok(())
    }
}

/// Check a version against the `0..=max` range
pub(crate) fn check_version(kind: VersionKind, version: i32, max: i32) -> MigrateResult<()> {
    if version < 0 || version > max {
        return Err(MigrateError::BadVersion { kind, version, max });
    }
    Ok(())
}
