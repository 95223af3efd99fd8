//! Functions available inside migration templates
//!
//! - `install_snapshot(name="...")` inlines the evaluated snapshot package
//!   `<root>/snapshots/<name>`.
//! - `set_data(key="...", value=...)` writes into the shared data context and
//!   renders as empty text.

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tera::Tera;

use super::snapshot::CodePackage;
use super::TemplateData;
use crate::source::MigrationSource;

/// Directory under the migrations root holding snapshot packages
pub const SNAPSHOTS_DIR: &str = "snapshots";

/// Locates snapshot packages for `install_snapshot`
#[derive(Clone)]
pub struct SnapshotResolver {
    dir: PathBuf,
    source: Arc<dyn MigrationSource>,
}

impl SnapshotResolver {
    pub fn new(root: impl Into<PathBuf>, source: Arc<dyn MigrationSource>) -> Self {
        Self {
            dir: root.into().join(SNAPSHOTS_DIR),
            source,
        }
    }

    fn install(&self, name: &str, data: &TemplateData) -> tera::Result<String> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(tera::Error::msg(format!("invalid snapshot name '{}'", name)));
        }
        let package = CodePackage::load(name, &self.dir.join(name), self.source.as_ref())
            .map_err(|e| tera::Error::msg(e.to_string()))?;
        package
            .eval(data)
            .map_err(|e| tera::Error::msg(e.to_string()))
    }
}

/// Register every migration template function
pub fn register_functions(tera: &mut Tera, data: &TemplateData, snapshots: SnapshotResolver) {
    register_data_functions(tera, data);

    let data = data.clone();
    tera.register_function(
        "install_snapshot",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let name = string_arg(args, "install_snapshot", "name")?;
            snapshots.install(name, &data).map(Value::String)
        },
    );
}

/// Register the functions that only touch the shared data context
pub fn register_data_functions(tera: &mut Tera, data: &TemplateData) {
    let data = data.clone();
    tera.register_function(
        "set_data",
        move |args: &HashMap<String, Value>| -> tera::Result<Value> {
            let key = string_arg(args, "set_data", "key")?;
            let value = args.get("value").cloned().unwrap_or(Value::Null);
            data.insert(key, value);
            Ok(Value::String(String::new()))
        },
    );
}

fn string_arg<'a>(
    args: &'a HashMap<String, Value>,
    function: &str,
    arg: &str,
) -> tera::Result<&'a str> {
    args.get(arg).and_then(Value::as_str).ok_or_else(|| {
        tera::Error::msg(format!(
            "{} requires a string `{}` argument",
            function, arg
        ))
    })
}
