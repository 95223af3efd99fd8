//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL implementation of the connection trait
//! using sqlx as the underlying database driver. Migration bodies go through
//! the simple query protocol so a single body may hold many statements.
//!
//! A statement whose future is dropped keeps running on the server. Sessions
//! opened through [`PostgresConnection::connect`] remember how to reach their
//! backend and stop it with `pg_cancel_backend` from a side connection. A
//! session that cannot be interrupted is abandoned and fails every later call.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgDatabaseError, PgRow};
use sqlx::{Column, Connection, Executor, Postgres, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, warn};

use super::core::*;
use crate::error::{DatabaseError, DriverError};

/// How long to wait for an interrupted statement to report back
const INTERRUPT_TIMEOUT: Duration = Duration::from_secs(5);

/// PostgreSQL session used by a migrator
pub struct PostgresConnection {
    conn: PgConnection,
    /// Where to send a cancel request: connect options and backend pid
    cancel_target: Option<(PgConnectOptions, i32)>,
    abandoned: bool,
}

impl PostgresConnection {
    /// Wrap an already established connection.
    ///
    /// Such a session cannot be interrupted, so a cancelled statement abandons it.
    pub fn new(conn: PgConnection) -> Self {
        Self {
            conn,
            cancel_target: None,
            abandoned: false,
        }
    }

    /// Open a new connection from a database URL
    pub async fn connect(database_url: &str) -> DriverResult<Self> {
        let options: PgConnectOptions = database_url.parse().map_err(driver_error)?;
        Self::connect_with(&options).await
    }

    /// Open a new connection that can be interrupted after cancellation
    pub async fn connect_with(options: &PgConnectOptions) -> DriverResult<Self> {
        let mut conn = PgConnection::connect_with(options)
            .await
            .map_err(driver_error)?;
        let pid = sqlx::query_scalar::<_, i32>("select pg_backend_pid()")
            .fetch_one(&mut conn)
            .await
            .map_err(driver_error)?;

        Ok(Self {
            conn,
            cancel_target: Some((options.clone(), pid)),
            abandoned: false,
        })
    }

    /// Whether a cancelled statement left the session unusable
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Close the connection, ending the session and any locks it holds
    pub async fn close(self) -> DriverResult<()> {
        self.conn.close().await.map_err(driver_error)
    }

    fn session(&mut self) -> DriverResult<&mut PgConnection> {
        if self.abandoned {
            return Err(DriverError::other(
                "session was abandoned after a cancelled statement",
            ));
        }
        Ok(&mut self.conn)
    }

    /// Cancel the backend's running statement and wait for the session to be idle
    async fn cancel_backend(&mut self) -> DriverResult<()> {
        let (options, pid) = self
            .cancel_target
            .as_ref()
            .ok_or_else(|| DriverError::other("no cancel target for this session"))?;

        let mut side = PgConnection::connect_with(options)
            .await
            .map_err(driver_error)?;
        let signalled = sqlx::query_scalar::<_, bool>("select pg_cancel_backend($1)")
            .bind(*pid)
            .fetch_one(&mut side)
            .await
            .map_err(driver_error)?;
        side.close().await.map_err(driver_error)?;
        debug!("Sent cancel request to backend {}: {}", pid, signalled);

        // The first round trip may surface the cancelled statement's error
        let drained = tokio::time::timeout(INTERRUPT_TIMEOUT, async {
            if self.conn.ping().await.is_err() {
                self.conn.ping().await?;
            }
            Ok::<_, sqlx::Error>(())
        })
        .await;

        match drained {
            Ok(result) => result.map_err(driver_error),
            Err(_) => Err(DriverError::other(
                "timed out waiting for the cancelled statement to stop",
            )),
        }
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn execute_batch(&mut self, sql: &str) -> DriverResult<()> {
        // A bare &str carries no arguments, so sqlx sends it as a simple query
        Executor::execute(self.session()?, sql)
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> DriverResult<u64> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(self.session()?).await.map_err(driver_error)?;

        Ok(result.rows_affected())
    }

    async fn fetch_scalar(
        &mut self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> DriverResult<DatabaseValue> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let row = query.fetch_one(self.session()?).await.map_err(driver_error)?;

        first_column_value(&row)
    }

    async fn begin_transaction(&mut self) -> DriverResult<()> {
        self.execute_batch("BEGIN").await
    }

    async fn commit_transaction(&mut self) -> DriverResult<()> {
        self.execute_batch("COMMIT").await
    }

    async fn rollback_transaction(&mut self) -> DriverResult<()> {
        self.execute_batch("ROLLBACK").await
    }

    async fn reset_session(&mut self) -> DriverResult<()> {
        self.execute_batch("RESET ALL").await
    }

    async fn advisory_lock(&mut self, key: i64) -> DriverResult<()> {
        sqlx::query("select pg_advisory_lock($1)")
            .bind(key)
            .execute(self.session()?)
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    async fn advisory_unlock(&mut self, key: i64) -> DriverResult<()> {
        sqlx::query("select pg_advisory_unlock($1)")
            .bind(key)
            .execute(self.session()?)
            .await
            .map_err(driver_error)?;
        Ok(())
    }

    async fn interrupt(&mut self) -> DriverResult<()> {
        if self.abandoned {
            return Ok(());
        }
        if let Err(err) = self.cancel_backend().await {
            warn!("Abandoning session after failed interrupt: {}", err);
            self.abandoned = true;
            return Err(err);
        }
        Ok(())
    }

    async fn table_exists(&mut self, schema: Option<&str>, table: &str) -> DriverResult<bool> {
        let count: i64 = match schema {
            Some(schema) => {
                sqlx::query_scalar::<_, i64>(
                    "select count(*) from pg_catalog.pg_tables where schemaname=$1 and tablename=$2",
                )
                .bind(schema)
                .bind(table)
                .fetch_one(self.session()?)
                .await
            }
            None => {
                sqlx::query_scalar::<_, i64>(
                    "select count(*) from pg_catalog.pg_class where relname=$1 and relkind='r' and pg_table_is_visible(oid)",
                )
                .bind(table)
                .fetch_one(self.session()?)
                .await
            }
        }
        .map_err(driver_error)?;

        Ok(count > 0)
    }
}

/// Map a sqlx error onto the driver error taxonomy.
///
/// Errors the server reported become structured [`DatabaseError`]s that keep
/// the original `sqlx::Error` as their source.
pub fn driver_error(err: sqlx::Error) -> DriverError {
    let structured = match &err {
        sqlx::Error::Database(db) => {
            let mut structured = DatabaseError::new(db.message());
            if let Some(code) = db.code() {
                structured = structured.with_code(code);
            }
            if let Some(pg) = db.try_downcast_ref::<PgDatabaseError>() {
                if let Some(detail) = pg.detail() {
                    structured = structured.with_detail(detail);
                }
                if let Some(hint) = pg.hint() {
                    structured = structured.with_hint(hint);
                }
            }
            Some(structured)
        }
        _ => None,
    };

    match structured {
        Some(structured) => DriverError::Database(structured.with_source(err)),
        None => DriverError::other(err),
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
    }
}

/// Convert the first column of a row to a DatabaseValue
fn first_column_value(row: &PgRow) -> DriverResult<DatabaseValue> {
    let column = row
        .columns()
        .first()
        .ok_or_else(|| DriverError::other("query returned no columns"))?;
    let type_name = column.type_info().name();

    let value = match type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(0)
            .map(|v| v.map(DatabaseValue::Bool)),
        "INT2" => row
            .try_get::<Option<i16>, _>(0)
            .map(|v| v.map(|i| DatabaseValue::Int32(i32::from(i)))),
        "INT4" => row
            .try_get::<Option<i32>, _>(0)
            .map(|v| v.map(DatabaseValue::Int32)),
        "INT8" => row
            .try_get::<Option<i64>, _>(0)
            .map(|v| v.map(DatabaseValue::Int64)),
        "VOID" => Ok(None),
        _ => row
            .try_get::<Option<String>, _>(0)
            .map(|v| v.map(DatabaseValue::String)),
    }
    .map_err(driver_error)?;

    Ok(value.unwrap_or(DatabaseValue::Null))
}
