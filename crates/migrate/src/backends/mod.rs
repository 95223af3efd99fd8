//! Database Backend Abstractions
//!
//! The migration engine only talks to a [`DatabaseConnection`]; each backend
//! supplies the session-level pieces (transactions, advisory locks, catalog
//! lookups) and maps its native errors onto [`DriverError`](crate::DriverError).

pub mod core;
pub mod memory;
pub mod postgres;

pub use self::core::*;
pub use memory::{InjectedFailure, MemoryConnection, MemoryDatabase};
pub use postgres::PostgresConnection;
