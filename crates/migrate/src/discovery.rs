//! Migration discovery
//!
//! Lists a migrations root and validates that the numbered files form the
//! dense sequence `1..=N` before any file body is read.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{MigrateError, MigrateResult};
use crate::source::MigrationSource;

static MIGRATION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]+)_.+\.sql$").expect("migration pattern is valid"));

/// Leading sequence number of a migration file name, if it is one
pub fn migration_sequence(file_name: &str) -> Option<&str> {
    MIGRATION_PATTERN
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Find the ordered migration files directly under `root`.
///
/// Subdirectories and files not named `<digits>_<name>.sql` are ignored. The
/// remaining files must be numbered `1, 2, 3, ...` in name order; a repeated
/// number fails with [`MigrateError::DuplicateMigration`] and a skipped one
/// with [`MigrateError::MissingMigration`].
pub fn find_migrations(root: &Path, source: &dyn MigrationSource) -> MigrateResult<Vec<PathBuf>> {
    let mut entries = source
        .read_dir(root)
        .map_err(|e| MigrateError::io(root, e))?;
    entries.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let mut paths: Vec<PathBuf> = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.is_dir {
            continue;
        }
        let Some(file_name) = entry.file_name() else {
            continue;
        };
        let Some(digits) = migration_sequence(file_name) else {
            continue;
        };

        let sequence: i32 = digits.parse().map_err(|_| MigrateError::SequenceOverflow {
            file: file_name.to_string(),
        })?;
        let expected = paths.len() as i32 + 1;

        if sequence < expected {
            return Err(MigrateError::DuplicateMigration(sequence));
        }
        if sequence > expected {
            return Err(MigrateError::MissingMigration(expected));
        }

        paths.push(root.join(file_name));
    }

    debug!("Discovered {} migrations in {}", paths.len(), root.display());
    Ok(paths)
}
