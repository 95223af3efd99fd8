//! Migration System
//!
//! Migration records, the ordered in-memory registry that holds them, and the
//! result types a run reports back.

pub mod definitions;
pub mod registry;

pub use definitions::*;
pub use registry::MigrationRegistry;
