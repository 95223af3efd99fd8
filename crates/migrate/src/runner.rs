//! Migration Runner - steps the persisted version toward a target
//!
//! A run holds the advisory lock from start to finish and moves one
//! migration at a time. Each step gets its own transaction unless
//! transactions are disabled, so a failure part way through leaves every
//! earlier step committed and the version at the last completed step.

use chrono::Utc;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backends::DatabaseConnection;
use crate::config::{MigratorConfig, MigratorOptions};
use crate::error::{MigrateError, MigrateResult, VersionKind};
use crate::lock::{cancellable, interrupt_abandoned, AdvisoryLock};
use crate::migrations::{
    AppliedStep, Migration, MigrationDirection, MigrationRegistry, MigrationRunResult,
    MigrationState, MigrationStatus,
};
use crate::observer::{MigrationEvent, MigrationObserver, ObserverRegistry};
use crate::templates::{self, TemplateData};
use crate::version::{check_version, VersionStore, VersionTable};

/// Migration engine bound to one database connection
pub struct Migrator {
    conn: Box<dyn DatabaseConnection>,
    versions: VersionStore,
    lock: AdvisoryLock,
    options: MigratorOptions,
    registry: MigrationRegistry,
    observers: ObserverRegistry,
    data: TemplateData,
}

impl Migrator {
    /// Create a migrator with default options, creating the version table if needed
    pub async fn new<C>(conn: C, version_table: &str) -> MigrateResult<Self>
    where
        C: DatabaseConnection + 'static,
    {
        Self::with_options(conn, version_table, MigratorOptions::default()).await
    }

    /// Create a migrator, creating the version table if needed.
    ///
    /// Creation happens under the advisory lock.
    pub async fn with_options<C>(
        conn: C,
        version_table: &str,
        options: MigratorOptions,
    ) -> MigrateResult<Self>
    where
        C: DatabaseConnection + 'static,
    {
        let versions = VersionStore::new(VersionTable::parse(version_table)?);
        let mut migrator = Self {
            conn: Box::new(conn),
            versions,
            lock: AdvisoryLock::new(options.lock_key),
            options,
            registry: MigrationRegistry::new(),
            observers: ObserverRegistry::new(),
            data: TemplateData::new(),
        };

        migrator
            .versions
            .ensure_exists(&mut *migrator.conn, &migrator.lock, &migrator.options.cancel)
            .await?;

        Ok(migrator)
    }

    /// Create a migrator from deployment configuration
    pub async fn from_config<C>(conn: C, config: &MigratorConfig) -> MigrateResult<Self>
    where
        C: DatabaseConnection + 'static,
    {
        config.validate()?;
        Self::with_options(conn, &config.version_table, config.options()).await
    }

    /// Use `data` as the initial context for templates rendered by later loads
    pub fn with_data(mut self, data: TemplateData) -> Self {
        self.data = data;
        self
    }

    /// Replace the token that cancels blocking calls
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.options.cancel = token;
        self
    }

    /// The shared template data context
    pub fn data(&self) -> &TemplateData {
        &self.data
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.options.cancel
    }

    pub fn options(&self) -> &MigratorOptions {
        &self.options
    }

    pub fn version_table(&self) -> &VersionTable {
        self.versions.table()
    }

    pub fn migrations(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Load every migration under `path` and append them in sequence order.
    ///
    /// Nothing is appended unless every file loads and renders.
    pub fn load_migrations(&mut self, path: impl AsRef<Path>) -> MigrateResult<usize> {
        let path = path.as_ref();
        let loaded = templates::load_migrations(path, &self.options.source, &self.data)?;
        let count = loaded.len();

        for migration in loaded {
            self.registry
                .append(migration.name, migration.up_sql, migration.down_sql);
        }

        info!("Loaded {} migrations from {}", count, path.display());
        Ok(count)
    }

    /// Append a migration; its sequence is its position in the registry
    pub fn append_migration(
        &mut self,
        name: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> &Migration {
        self.registry.append(name, up_sql, down_sql)
    }

    pub fn add_observer(&mut self, observer: Box<dyn MigrationObserver>) {
        self.observers.register(observer);
    }

    /// Call `hook` before each step executes
    pub fn on_start<F>(&mut self, hook: F)
    where
        F: Fn(&MigrationEvent<'_>) + Send + Sync + 'static,
    {
        self.add_observer(Box::new(hook));
    }

    /// Migrate to the latest registered migration
    pub async fn migrate(&mut self) -> MigrateResult<MigrationRunResult> {
        self.migrate_to(self.registry.version_count()).await
    }

    /// Step the persisted version to `target`, one migration at a time.
    ///
    /// The advisory lock is held for the whole run and released on every
    /// exit path once acquired. A release failure is reported only when the
    /// run itself succeeded. On cancellation the running statement is
    /// interrupted first so the rollback and release do not wait behind it.
    pub async fn migrate_to(&mut self, target: i32) -> MigrateResult<MigrationRunResult> {
        let started_at = Utc::now();
        let start_time = Instant::now();

        self.lock
            .acquire(&mut *self.conn, &self.options.cancel)
            .await?;

        let outcome = self.run_locked(target).await;
        let released = self.lock.release(&mut *self.conn).await;

        let (from_version, steps) = match (outcome, released) {
            (Ok(run), Ok(())) => run,
            (Ok(_), Err(release_err)) => return Err(release_err),
            (Err(err), Err(release_err)) => {
                warn!("Failed to release migration lock: {}", release_err);
                return Err(err);
            }
            (Err(err), Ok(())) => return Err(err),
        };

        let to_version = steps.last().map(|step| step.version).unwrap_or(from_version);

        Ok(MigrationRunResult {
            from_version,
            to_version,
            steps,
            started_at,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }

    async fn run_locked(&mut self, target: i32) -> MigrateResult<(i32, Vec<AppliedStep>)> {
        let from_version =
            match cancellable(&self.options.cancel, self.versions.current(&mut *self.conn)).await
            {
                Ok(read) => read?,
                Err(err) => {
                    interrupt_abandoned(&mut *self.conn).await;
                    return Err(err);
                }
            };

        let max = self.registry.version_count();
        check_version(VersionKind::Destination, target, max)?;
        check_version(VersionKind::Current, from_version, max)?;

        let mut steps = Vec::new();
        let mut current = from_version;

        while current != target {
            let (index, direction) = if current < target {
                (current, MigrationDirection::Up)
            } else {
                (current - 1, MigrationDirection::Down)
            };

            let step = self.apply_step(index as usize, direction).await?;
            current = step.version;
            steps.push(step);
        }

        Ok((from_version, steps))
    }

    async fn apply_step(
        &mut self,
        index: usize,
        direction: MigrationDirection,
    ) -> MigrateResult<AppliedStep> {
        let migration = self
            .registry
            .get(index)
            .ok_or(MigrateError::MissingMigration(index as i32 + 1))?;

        let version = match direction {
            MigrationDirection::Up => migration.sequence,
            MigrationDirection::Down => {
                if !migration.is_reversible() {
                    return Err(MigrateError::IrreversibleMigration {
                        sequence: migration.sequence,
                        name: migration.name.clone(),
                    });
                }
                migration.sequence - 1
            }
        };

        info!(
            "Migrating {} {} ({})",
            direction, migration.name, migration.sequence
        );

        let use_tx = !self.options.disable_tx;
        let conn = &mut *self.conn;
        let result = execute_step(
            conn,
            &self.versions,
            &self.observers,
            &self.options.cancel,
            use_tx,
            migration,
            direction,
            version,
        )
        .await;

        if let Err(err) = result {
            if matches!(err, MigrateError::Cancelled) {
                interrupt_abandoned(conn).await;
            }
            if use_tx {
                if let Err(rollback_err) = conn.rollback_transaction().await {
                    warn!(
                        "Failed to roll back migration {}: {}",
                        migration.name, rollback_err
                    );
                }
            }
            return Err(err);
        }

        info!("Migrated {} to version {}", migration.name, version);

        Ok(AppliedStep {
            sequence: migration.sequence,
            name: migration.name.clone(),
            direction,
            version,
        })
    }

    /// Read the persisted version without taking the lock
    pub async fn current_version(&mut self) -> MigrateResult<i32> {
        if self.options.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }
        match cancellable(&self.options.cancel, self.versions.current(&mut *self.conn)).await {
            Ok(read) => read,
            Err(err) => {
                interrupt_abandoned(&mut *self.conn).await;
                Err(err)
            }
        }
    }

    /// Applied or pending state of every registered migration.
    ///
    /// Reads the version without taking the lock, so a concurrent run may
    /// change it at any time.
    pub async fn status(&mut self) -> MigrateResult<Vec<MigrationStatus>> {
        let current = self.current_version().await?;

        Ok(self
            .registry
            .iter()
            .map(|migration| MigrationStatus {
                sequence: migration.sequence,
                name: migration.name.clone(),
                state: if migration.sequence <= current {
                    MigrationState::Applied
                } else {
                    MigrationState::Pending
                },
                reversible: migration.is_reversible(),
            })
            .collect())
    }

    /// Give back the owned connection
    pub fn into_connection(self) -> Box<dyn DatabaseConnection> {
        self.conn
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_step(
    conn: &mut dyn DatabaseConnection,
    versions: &VersionStore,
    observers: &ObserverRegistry,
    cancel: &CancellationToken,
    use_tx: bool,
    migration: &Migration,
    direction: MigrationDirection,
    version: i32,
) -> MigrateResult<()> {
    let sql = migration.sql(direction);

    if use_tx {
        cancellable(cancel, conn.begin_transaction()).await??;
    }

    observers.notify_start(&MigrationEvent {
        sequence: migration.sequence,
        name: &migration.name,
        direction,
        sql,
    });

    cancellable(cancel, conn.execute_batch(sql))
        .await?
        .map_err(|err| MigrateError::from_execution(&migration.name, sql, err))?;

    // Session settings changed by the migration must not reach the version update
    cancellable(cancel, conn.reset_session()).await??;
    cancellable(cancel, versions.set(conn, version)).await??;

    if use_tx {
        cancellable(cancel, conn.commit_transaction()).await??;
    }

    Ok(())
}
