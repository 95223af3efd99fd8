//! In-memory backend implementation for development and testing
//!
//! Understands just enough SQL to keep a version table: the bootstrap
//! `create table if not exists`, `select version from` and
//! `update ... set version=$1`. Every other statement is recorded in an
//! execution log. Transactions buffer their effects per connection until
//! commit, and advisory locks block across connections like session locks do.
//! A session may take the same lock more than once and must release it as many
//! times. Lock calls are matched against injected failures by the statements
//! Postgres would run (`select pg_advisory_lock($1)`, `select pg_advisory_unlock($1)`).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::core::*;
use crate::error::{DatabaseError, DriverError};

const ADVISORY_LOCK_SQL: &str = "select pg_advisory_lock($1)";
const ADVISORY_UNLOCK_SQL: &str = "select pg_advisory_unlock($1)";

/// Failure returned when a statement matches an injected pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    /// Structured error with a code, as a server would report it
    Database { code: String, message: String },
    /// Unstructured failure such as a dropped connection
    Connection(String),
    /// The statement never completes
    Hang,
}

#[derive(Debug, Default)]
struct DatabaseState {
    /// Version tables by name, holding their single version row
    tables: BTreeMap<String, i32>,
    /// Committed statements in the order they took effect
    log: Vec<String>,
    /// Statements discarded by a rollback
    rolled_back: Vec<String>,
    failures: Vec<(String, InjectedFailure)>,
    session_resets: usize,
    interrupts: usize,
}

/// Shared in-memory database; clones refer to the same data
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
    locks: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session against this database
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            database: self.clone(),
            transaction: None,
            held_locks: HashMap::new(),
        }
    }

    /// Fail every statement containing `pattern`
    pub fn inject_failure(&self, pattern: impl Into<String>, failure: InjectedFailure) {
        self.state.lock().failures.push((pattern.into(), failure));
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Committed statements, oldest first
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Statements that ran inside a transaction that was rolled back
    pub fn rolled_back(&self) -> Vec<String> {
        self.state.lock().rolled_back.clone()
    }

    /// Committed version stored in `table`, if the table exists
    pub fn version(&self, table: &str) -> Option<i32> {
        self.state.lock().tables.get(table).copied()
    }

    /// Overwrite the stored version, creating the table if needed
    pub fn set_version(&self, table: impl Into<String>, version: i32) {
        self.state.lock().tables.insert(table.into(), version);
    }

    pub fn session_resets(&self) -> usize {
        self.state.lock().session_resets
    }

    /// How many times a session was asked to stop an abandoned statement
    pub fn interrupts(&self) -> usize {
        self.state.lock().interrupts
    }

    /// Whether some session currently holds the advisory lock `key`
    pub fn is_locked(&self, key: i64) -> bool {
        self.locks
            .lock()
            .get(&key)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    fn lock_for(&self, key: i64) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(key)
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    fn failure_for(&self, sql: &str) -> Option<InjectedFailure> {
        self.state
            .lock()
            .failures
            .iter()
            .find(|(pattern, _)| sql.contains(pattern.as_str()))
            .map(|(_, failure)| failure.clone())
    }

    fn apply(&self, effect: Effect) {
        let mut state = self.state.lock();
        match effect {
            Effect::Statement(sql) => state.log.push(sql),
            Effect::CreateVersionTable(table) => {
                state.tables.entry(table).or_insert(0);
            }
            Effect::SetVersion(table, version) => {
                state.tables.insert(table, version);
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Effect {
    Statement(String),
    CreateVersionTable(String),
    SetVersion(String, i32),
}

/// A session against a [`MemoryDatabase`]
pub struct MemoryConnection {
    database: MemoryDatabase,
    transaction: Option<Vec<Effect>>,
    /// Held advisory locks with the number of times each was taken
    held_locks: HashMap<i64, (OwnedMutexGuard<()>, usize)>,
}

impl MemoryConnection {
    pub fn database(&self) -> &MemoryDatabase {
        &self.database
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    async fn check_failure(&self, sql: &str) -> DriverResult<()> {
        match self.database.failure_for(sql) {
            None => Ok(()),
            Some(InjectedFailure::Database { code, message }) => {
                Err(DatabaseError::new(message).with_code(code).into())
            }
            Some(InjectedFailure::Connection(message)) => Err(DriverError::other(message)),
            Some(InjectedFailure::Hang) => std::future::pending().await,
        }
    }

    fn record(&mut self, effect: Effect) {
        match self.transaction.as_mut() {
            Some(pending) => pending.push(effect),
            None => self.database.apply(effect),
        }
    }

    fn pending_version(&self, table: &str) -> Option<i32> {
        self.transaction.as_ref().and_then(|pending| {
            pending.iter().rev().find_map(|effect| match effect {
                Effect::SetVersion(t, v) if t == table => Some(*v),
                _ => None,
            })
        })
    }
}

#[async_trait]
impl DatabaseConnection for MemoryConnection {
    async fn execute_batch(&mut self, sql: &str) -> DriverResult<()> {
        tokio::task::yield_now().await;
        self.check_failure(sql).await?;

        let normalized = sql.trim().to_lowercase();
        match normalized.strip_prefix("create table if not exists ") {
            Some(rest) => {
                let table = rest
                    .split(|c: char| c == '(' || c.is_whitespace())
                    .next()
                    .unwrap_or_default()
                    .to_string();
                self.record(Effect::CreateVersionTable(table));
            }
            None => self.record(Effect::Statement(sql.to_string())),
        }
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64> {
        tokio::task::yield_now().await;
        self.check_failure(sql).await?;

        let normalized = sql.trim().to_lowercase();
        let table = normalized
            .strip_prefix("update ")
            .and_then(|rest| rest.split_once(" set version"))
            .map(|(table, _)| table.trim().to_string());

        match (table, params.first().and_then(DatabaseValue::as_i32)) {
            (Some(table), Some(version)) => {
                if self.database.version(&table).is_none() {
                    return Err(undefined_table(&table));
                }
                self.record(Effect::SetVersion(table, version));
            }
            _ => self.record(Effect::Statement(sql.to_string())),
        }
        Ok(1)
    }

    async fn fetch_scalar(
        &mut self,
        sql: &str,
        _params: &[DatabaseValue],
    ) -> DriverResult<DatabaseValue> {
        tokio::task::yield_now().await;
        self.check_failure(sql).await?;

        let normalized = sql.trim().to_lowercase();
        let table = normalized
            .strip_prefix("select version from ")
            .map(|rest| rest.trim().to_string())
            .ok_or_else(|| DriverError::other(format!("unsupported query: {}", sql)))?;

        let version = self
            .pending_version(&table)
            .or_else(|| self.database.version(&table))
            .ok_or_else(|| undefined_table(&table))?;
        Ok(DatabaseValue::Int32(version))
    }

    async fn begin_transaction(&mut self) -> DriverResult<()> {
        if self.transaction.is_some() {
            return Err(DriverError::other("transaction already in progress"));
        }
        self.transaction = Some(Vec::new());
        Ok(())
    }

    async fn commit_transaction(&mut self) -> DriverResult<()> {
        let pending = self
            .transaction
            .take()
            .ok_or_else(|| DriverError::other("no transaction in progress"))?;
        for effect in pending {
            self.database.apply(effect);
        }
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> DriverResult<()> {
        if let Some(pending) = self.transaction.take() {
            let mut state = self.database.state.lock();
            for effect in pending {
                if let Effect::Statement(sql) = effect {
                    state.rolled_back.push(sql);
                }
            }
        }
        Ok(())
    }

    async fn reset_session(&mut self) -> DriverResult<()> {
        self.database.state.lock().session_resets += 1;
        Ok(())
    }

    async fn advisory_lock(&mut self, key: i64) -> DriverResult<()> {
        self.check_failure(ADVISORY_LOCK_SQL).await?;
        if let Some((_, holds)) = self.held_locks.get_mut(&key) {
            *holds += 1;
            return Ok(());
        }
        let guard = self.database.lock_for(key).lock_owned().await;
        self.held_locks.insert(key, (guard, 1));
        Ok(())
    }

    async fn advisory_unlock(&mut self, key: i64) -> DriverResult<()> {
        self.check_failure(ADVISORY_UNLOCK_SQL).await?;
        if let Some((_, holds)) = self.held_locks.get_mut(&key) {
            *holds -= 1;
            if *holds == 0 {
                self.held_locks.remove(&key);
            }
        }
        Ok(())
    }

    async fn interrupt(&mut self) -> DriverResult<()> {
        // Dropping the statement's future already stopped it
        self.database.state.lock().interrupts += 1;
        Ok(())
    }

    async fn table_exists(&mut self, schema: Option<&str>, table: &str) -> DriverResult<bool> {
        let name = match schema {
            Some(schema) => format!("{}.{}", schema, table),
            None => table.to_string(),
        };
        Ok(self.database.version(&name.to_lowercase()).is_some())
    }
}

fn undefined_table(table: &str) -> DriverError {
    DatabaseError::new(format!("relation \"{}\" does not exist", table))
        .with_code("42P01")
        .into()
}
