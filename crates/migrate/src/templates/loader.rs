//! Migration loading - discovery, partial registration and rendering
//!
//! A load pass registers the shared partials, discovers the numbered files,
//! splits each body into its up and down sections and renders both against
//! the shared data context.

use std::path::Path;
use std::sync::Arc;
use tera::Tera;
use tracing::debug;

use super::functions::{register_functions, SnapshotResolver};
use super::TemplateData;
use crate::discovery::find_migrations;
use crate::error::{MigrateError, MigrateResult};
use crate::migrations::MigrationDirection;
use crate::source::MigrationSource;

/// Line separating the up section from the down section of a migration file
pub const SPLIT_MARKER: &str = "---- create above / drop below ----";

/// A rendered migration ready to be appended to a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedMigration {
    pub name: String,
    pub up_sql: String,
    pub down_sql: String,
}

/// Split a migration body into its up section and optional down section.
///
/// Both sections are trimmed.
pub fn split_sections(body: &str) -> (&str, Option<&str>) {
    match body.split_once(SPLIT_MARKER) {
        Some((up, down)) => (up.trim(), Some(down.trim())),
        None => (body.trim(), None),
    }
}

/// Whether rendered SQL holds anything besides blank lines and `--` comments
pub fn contains_sql(sql: &str) -> bool {
    sql.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with("--")
    })
}

/// Load and render every migration under `root`.
///
/// Nothing is returned unless every file renders; callers can append the
/// result to a registry knowing it is complete.
pub fn load_migrations(
    root: &Path,
    source: &Arc<dyn MigrationSource>,
    data: &TemplateData,
) -> MigrateResult<Vec<LoadedMigration>> {
    let mut tera = Tera::default();
    tera.autoescape_on(vec![]);
    register_functions(&mut tera, data, SnapshotResolver::new(root, Arc::clone(source)));

    let shared = source
        .shared_templates(root)
        .map_err(|e| MigrateError::io(root, e))?;
    for template in shared {
        let body = source
            .read_file(&template.path)
            .map_err(|e| MigrateError::io(&template.path, e))?;
        tera.add_raw_template(&template.name, &body)
            .map_err(|e| MigrateError::Template {
                name: template.name.clone(),
                source: e,
            })?;
        debug!("Registered shared template {}", template.name);
    }

    let paths = find_migrations(root, source.as_ref())?;
    if paths.is_empty() {
        return Err(MigrateError::NoMigrationsFound {
            path: root.to_path_buf(),
        });
    }

    let mut migrations = Vec::with_capacity(paths.len());
    for path in paths {
        let body = source
            .read_file(&path)
            .map_err(|e| MigrateError::io(&path, e))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (up, down) = split_sections(&body);

        let up_sql = render_section(&mut tera, data, &name, MigrationDirection::Up, up)?;
        if !contains_sql(&up_sql) {
            return Err(MigrateError::NoForwardSql { name });
        }

        let down_sql = match down {
            Some(down) => render_section(&mut tera, data, &name, MigrationDirection::Down, down)?,
            None => String::new(),
        };

        migrations.push(LoadedMigration {
            name,
            up_sql,
            down_sql,
        });
    }

    Ok(migrations)
}

fn render_section(
    tera: &mut Tera,
    data: &TemplateData,
    name: &str,
    direction: MigrationDirection,
    text: &str,
) -> MigrateResult<String> {
    let template = format!("{} {}", name, direction);
    let render_error = |source| MigrateError::Render {
        name: name.to_string(),
        direction,
        source,
    };

    tera.add_raw_template(&template, text).map_err(render_error)?;
    tera.render(&template, &data.context()).map_err(render_error)
}
