//! Error types for the migration system
//!
//! Covers discovery, template rendering, version bookkeeping and statement
//! execution. Driver failures are split into structured database errors,
//! which carry a code and message the database reported, and everything else.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::migrations::MigrationDirection;

/// Result type alias for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Boxed error used for driver failures that carry no database details
pub type BoxDynError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors produced while loading or running migrations
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Requested or persisted version lies outside `0..=N`
    #[error("{kind} version {version} is outside the valid versions of 0 to {max}")]
    BadVersion {
        kind: VersionKind,
        version: i32,
        max: i32,
    },

    #[error("no migrations found at {}", path.display())]
    NoMigrationsFound { path: PathBuf },

    #[error("no sql in forward migration step: {name}")]
    NoForwardSql { name: String },

    #[error("irreversible migration: {sequence} - {name}")]
    IrreversibleMigration { sequence: i32, name: String },

    #[error("duplicate migration {0}")]
    DuplicateMigration(i32),

    #[error("missing migration {0}")]
    MissingMigration(i32),

    #[error("migration sequence in {file} does not fit a 32-bit version")]
    SequenceOverflow { file: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A shared partial or snapshot template failed to parse
    #[error("invalid template {name}: {source}")]
    Template {
        name: String,
        #[source]
        source: tera::Error,
    },

    /// A migration section failed to render
    #[error("failed to render {name} {direction}: {}", error_chain(.source))]
    Render {
        name: String,
        direction: MigrationDirection,
        #[source]
        source: tera::Error,
    },

    #[error("snapshot {name}: {message}")]
    Snapshot { name: String, message: String },

    /// Statement execution failed with a structured database error
    #[error("{name}: {source}")]
    Migration {
        name: String,
        sql: String,
        #[source]
        source: DatabaseError,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("migration run cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Wrap a statement execution failure with the migration it belongs to.
    ///
    /// Structured database errors keep the migration name and rendered SQL;
    /// anything else passes through as a plain driver error.
    pub fn from_execution(name: &str, sql: &str, err: DriverError) -> Self {
        match err {
            DriverError::Database(source) => MigrateError::Migration {
                name: name.to_string(),
                sql: sql.to_string(),
                source,
            },
            other => MigrateError::Driver(other),
        }
    }

    /// The structured database error behind this error, if there is one
    pub fn database_error(&self) -> Option<&DatabaseError> {
        match self {
            MigrateError::Migration { source, .. } => Some(source),
            MigrateError::Driver(DriverError::Database(source)) => Some(source),
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrateError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn snapshot(name: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Snapshot {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Which side of a migration run a bad version came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionKind {
    Destination,
    Current,
}

impl fmt::Display for VersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionKind::Destination => write!(f, "destination"),
            VersionKind::Current => write!(f, "current"),
        }
    }
}

/// Errors returned by a [`DatabaseConnection`](crate::backends::DatabaseConnection)
#[derive(Error, Debug)]
pub enum DriverError {
    /// The database rejected the statement and reported why
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// Connection, protocol or decoding failures
    #[error("{0}")]
    Other(BoxDynError),
}

impl DriverError {
    pub fn other(err: impl Into<BoxDynError>) -> Self {
        DriverError::Other(err.into())
    }
}

/// Database-agnostic structured error reported by the server.
///
/// Each driver fills the common fields and keeps its own error value as the
/// source so callers can still reach driver-specific details.
#[derive(Debug)]
pub struct DatabaseError {
    code: Option<String>,
    message: String,
    detail: Option<String>,
    hint: Option<String>,
    source: Option<BoxDynError>,
}

impl DatabaseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            detail: None,
            hint: None,
            source: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Keep the driver's original error so it can be recovered later
    pub fn with_source(mut self, source: impl Into<BoxDynError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Vendor error code (SQLSTATE for Postgres)
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Recover the driver's original error value
    pub fn downcast_ref<T: StdError + 'static>(&self) -> Option<&T> {
        self.source.as_ref().and_then(|source| source.downcast_ref::<T>())
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

impl StdError for DatabaseError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|source| source as &(dyn StdError + 'static))
    }
}

/// Join an error and all of its sources into one line
pub(crate) fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}
