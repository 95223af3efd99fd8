//! Core Database Backend Traits
//!
//! This module defines the connection trait and value type the migration
//! engine is written against.

use async_trait::async_trait;
use std::fmt;

use crate::error::DriverError;

/// Result type alias for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// A single database session owned by one migrator.
///
/// Transactions and advisory locks are scoped to this session, so every call
/// between `begin_transaction` and `commit_transaction` runs inside the same
/// transaction.
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Execute one or more statements with no parameters
    async fn execute_batch(&mut self, sql: &str) -> DriverResult<()>;

    /// Execute a single parameterised statement and return affected rows
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64>;

    /// Execute a query and return the first column of its first row
    async fn fetch_scalar(&mut self, sql: &str, params: &[DatabaseValue])
        -> DriverResult<DatabaseValue>;

    async fn begin_transaction(&mut self) -> DriverResult<()>;

    async fn commit_transaction(&mut self) -> DriverResult<()>;

    async fn rollback_transaction(&mut self) -> DriverResult<()>;

    /// Restore every session setting to its default
    async fn reset_session(&mut self) -> DriverResult<()>;

    /// Block until the session holds the advisory lock `key`
    async fn advisory_lock(&mut self, key: i64) -> DriverResult<()>;

    /// Release one hold on the advisory lock `key`; a no-op if it is not held
    async fn advisory_unlock(&mut self, key: i64) -> DriverResult<()>;

    /// Stop a statement whose future was dropped before it finished.
    ///
    /// Called after cancellation so the session can still roll back and
    /// unlock. A driver that cannot stop the statement must fail every later
    /// call instead of waiting for it.
    async fn interrupt(&mut self) -> DriverResult<()> {
        Ok(())
    }

    /// Whether a table exists.
    ///
    /// With a schema the table must live in that schema; without one it must
    /// be visible on the session's search path.
    async fn table_exists(&mut self, schema: Option<&str>, table: &str) -> DriverResult<bool>;
}

/// Database value enumeration for parameter binding and scalar results
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Integer value narrowed to 32 bits, if it fits
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            DatabaseValue::Int32(i) => Some(*i),
            DatabaseValue::Int64(i) => i32::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(i64::from(*i)),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }
}

impl fmt::Display for DatabaseValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseValue::Null => write!(f, "NULL"),
            DatabaseValue::Bool(b) => write!(f, "{}", b),
            DatabaseValue::Int32(i) => write!(f, "{}", i),
            DatabaseValue::Int64(i) => write!(f, "{}", i),
            DatabaseValue::String(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}
