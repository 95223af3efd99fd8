//! # elif-migrate
//!
//! Versioned SQL migrations for the elif.rs framework.
//!
//! ## Features
//!
//! - **Numbered migration files**: `001_create_users.sql`, `002_add_index.sql`, ...
//! - **Reversible steps**: an optional `---- create above / drop below ----` marker
//!   splits each file into up and down SQL
//! - **Templates**: every body is a tera template with shared partials, snapshots
//!   and a data context shared across one load
//! - **Single version counter**: one table with one row records how many
//!   migrations are applied
//! - **Safe concurrency**: runs are serialized with a session advisory lock
//! - **Per-step transactions**: a failed step rolls back alone
//!
//! ## Quick Start
//!
//! ```rust
//! use elif_migrate::{MemoryDatabase, MigrateResult, Migrator};
//!
//! # async fn run() -> MigrateResult<()> {
//! let db = MemoryDatabase::new();
//! let mut migrator = Migrator::new(db.connect(), "public.schema_version").await?;
//!
//! migrator.append_migration(
//!     "001_create_widgets.sql",
//!     "create table widgets(id int);",
//!     "drop table widgets;",
//! );
//! migrator.on_start(|event| println!("{} {}", event.direction, event.name));
//!
//! let result = migrator.migrate().await?;
//! assert_eq!(result.to_version, 1);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lock;
pub mod migrations;
pub mod observer;
pub mod runner;
pub mod source;
pub mod templates;
pub mod version;

pub use backends::{
    DatabaseConnection, DatabaseValue, DriverResult, InjectedFailure, MemoryConnection,
    MemoryDatabase, PostgresConnection,
};
pub use config::{MigratorConfig, MigratorOptions};
pub use discovery::find_migrations;
pub use error::{DatabaseError, DriverError, MigrateError, MigrateResult, VersionKind};
pub use lock::{AdvisoryLock, MIGRATION_LOCK_ID};
pub use migrations::{
    AppliedStep, Migration, MigrationDirection, MigrationRegistry, MigrationRunResult,
    MigrationState, MigrationStatus,
};
pub use observer::{MigrationEvent, MigrationObserver, ObserverRegistry};
pub use runner::Migrator;
pub use source::{FsMigrationSource, MemoryMigrationSource, MigrationSource, SourceEntry};
pub use templates::{CodePackage, LoadedMigration, TemplateData, SPLIT_MARKER};
pub use version::{VersionStore, VersionTable};

pub use tokio_util::sync::CancellationToken;
