//! Migration Definitions - Core types and structures for migrations
//!
//! Defines the fundamental types used throughout the migration system including
//! Migration, MigrationDirection and the run result structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single rendered, versioned schema change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    /// 1-based position in the registry; also the version once applied
    pub sequence: i32,
    /// Name of the migration, usually its file name
    pub name: String,
    /// Rendered SQL applying the change
    pub up_sql: String,
    /// Rendered SQL undoing the change; empty when irreversible
    pub down_sql: String,
}

impl Migration {
    /// Whether this migration can be stepped backward past
    pub fn is_reversible(&self) -> bool {
        !self.down_sql.trim().is_empty()
    }

    /// SQL to run when stepping in the given direction
    pub fn sql(&self, direction: MigrationDirection) -> &str {
        match direction {
            MigrationDirection::Up => &self.up_sql,
            MigrationDirection::Down => &self.down_sql,
        }
    }
}

/// Migration direction for execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationDirection {
    /// Apply the migration (run UP statements)
    Up,
    /// Rollback the migration (run DOWN statements)
    Down,
}

impl MigrationDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationDirection::Up => "up",
            MigrationDirection::Down => "down",
        }
    }
}

impl fmt::Display for MigrationDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step executed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedStep {
    /// Sequence of the migration that ran
    pub sequence: i32,
    pub name: String,
    pub direction: MigrationDirection,
    /// Version recorded after the step committed
    pub version: i32,
}

/// Result of running migrations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRunResult {
    /// Version read at the start of the run
    pub from_version: i32,
    /// Version recorded when the run finished
    pub to_version: i32,
    /// Steps executed in order
    pub steps: Vec<AppliedStep>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Total execution time in milliseconds
    pub execution_time_ms: u128,
}

impl MigrationRunResult {
    /// Number of steps that were executed
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }
}

/// Migration status relative to the current version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationState {
    /// Migration is pending (not yet applied)
    Pending,
    /// Migration has been applied
    Applied,
}

/// Status of one registered migration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub sequence: i32,
    pub name: String,
    pub state: MigrationState,
    pub reversible: bool,
}
