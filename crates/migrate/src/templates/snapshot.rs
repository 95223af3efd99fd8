//! Snapshot code packages
//!
//! A snapshot is a directory with an `install.sql` entry template and any
//! number of sibling `*.sql` partials it may include by file name. It is
//! evaluated on its own, against the same data context as the migration that
//! installs it.

use std::path::Path;
use tera::Tera;
use tracing::debug;

use super::functions::register_data_functions;
use super::TemplateData;
use crate::error::{error_chain, MigrateError, MigrateResult};
use crate::source::MigrationSource;

/// Entry template of every snapshot package
pub const ENTRY_TEMPLATE: &str = "install.sql";

/// A loaded, not yet evaluated snapshot package
#[derive(Debug, Clone)]
pub struct CodePackage {
    name: String,
    templates: Vec<(String, String)>,
}

impl CodePackage {
    /// Load the package at `dir`
    pub fn load(name: &str, dir: &Path, source: &dyn MigrationSource) -> MigrateResult<Self> {
        let entries = source.read_dir(dir).map_err(|e| {
            MigrateError::snapshot(name, format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut templates = Vec::new();
        for entry in entries.iter().filter(|e| !e.is_dir) {
            let Some(file_name) = entry.file_name() else {
                continue;
            };
            if !file_name.ends_with(".sql") {
                continue;
            }
            let body = source
                .read_file(&entry.path)
                .map_err(|e| MigrateError::io(&entry.path, e))?;
            templates.push((file_name.to_string(), body));
        }

        if !templates.iter().any(|(file, _)| file == ENTRY_TEMPLATE) {
            return Err(MigrateError::snapshot(
                name,
                format!("missing {} in {}", ENTRY_TEMPLATE, dir.display()),
            ));
        }

        debug!("Loaded snapshot {} with {} templates", name, templates.len());
        Ok(Self {
            name: name.to_string(),
            templates,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Template file names in the package
    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        self.templates.iter().map(|(file, _)| file.as_str())
    }

    /// Render the entry template against `data`
    pub fn eval(&self, data: &TemplateData) -> MigrateResult<String> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        register_data_functions(&mut tera, data);

        tera.add_raw_templates(
            self.templates
                .iter()
                .map(|(file, body)| (file.as_str(), body.as_str())),
        )
        .map_err(|source| MigrateError::Template {
            name: format!("{}/{}", self.name, ENTRY_TEMPLATE),
            source,
        })?;

        tera.render(ENTRY_TEMPLATE, &data.context())
            .map_err(|e| MigrateError::snapshot(&self.name, error_chain(&e)))
    }
}
