//! Template rendering for migration bodies
//!
//! Every migration section is a tera template. Sections share one
//! [`TemplateData`] per load pass, so a value written while rendering one
//! migration is visible to every migration rendered after it.

pub mod functions;
pub mod loader;
pub mod snapshot;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

pub use loader::{load_migrations, split_sections, LoadedMigration, SPLIT_MARKER};
pub use snapshot::CodePackage;

/// Shared, mutable data context for one load pass.
///
/// Cloning yields another handle to the same data.
#[derive(Debug, Clone, Default)]
pub struct TemplateData {
    inner: Arc<RwLock<Map<String, Value>>>,
}

impl TemplateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Set a key, replacing any previous value
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.inner.write().insert(key.into(), value.into());
    }

    /// Set a key from any serializable value
    pub fn insert_serialized<T: Serialize + ?Sized>(
        &self,
        key: impl Into<String>,
        value: &T,
    ) -> serde_json::Result<()> {
        let value = serde_json::to_value(value)?;
        self.insert(key, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.write().remove(key)
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.inner.read().clone()
    }

    /// Snapshot of the current values as a render context
    pub fn context(&self) -> tera::Context {
        let mut context = tera::Context::new();
        for (key, value) in self.inner.read().iter() {
            context.insert(key.as_str(), value);
        }
        context
    }
}
