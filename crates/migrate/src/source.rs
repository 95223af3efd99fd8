//! Migration Sources - where migration files and shared templates come from
//!
//! Discovery and template loading only ever talk to a [`MigrationSource`], so
//! migrations can live on disk, be embedded in a binary, or be built in memory
//! for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One entry of a listed directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub is_dir: bool,
}

impl SourceEntry {
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }
}

/// A template found one directory below the migrations root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedTemplate {
    /// Root-relative name, `/`-separated (e.g. `shared/audit.sql`)
    pub name: String,
    pub path: PathBuf,
}

/// Read access to migration files.
///
/// Calls are synchronous because template functions run inside the renderer.
pub trait MigrationSource: Send + Sync {
    /// List the direct children of `dir`
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<SourceEntry>>;

    /// Read a file as UTF-8 text
    fn read_file(&self, path: &Path) -> io::Result<String>;

    /// Every `*.sql` file exactly one directory below `root`, ordered by name
    fn shared_templates(&self, root: &Path) -> io::Result<Vec<SharedTemplate>> {
        let mut templates = Vec::new();
        for dir in self.read_dir(root)?.into_iter().filter(|e| e.is_dir) {
            let Some(dir_name) = dir.file_name().map(str::to_string) else {
                continue;
            };
            for entry in self.read_dir(&dir.path)? {
                match entry.file_name() {
                    Some(file_name) if !entry.is_dir && file_name.ends_with(".sql") => {
                        templates.push(SharedTemplate {
                            name: format!("{}/{}", dir_name, file_name),
                            path: entry.path.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }
}

/// Reads migrations from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsMigrationSource;

impl MigrationSource for FsMigrationSource {
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<SourceEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            entries.push(SourceEntry {
                path: entry.path(),
                is_dir: entry.file_type()?.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn read_file(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// In-memory migration source for development and testing.
///
/// Directories exist implicitly through the paths of the files added.
#[derive(Debug, Clone, Default)]
pub struct MemoryMigrationSource {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryMigrationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, body: impl Into<String>) -> Self {
        self.insert(path, body);
        self
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, body: impl Into<String>) {
        self.files.insert(path.into(), body.into());
    }
}

impl MigrationSource for MemoryMigrationSource {
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<SourceEntry>> {
        let mut files = Vec::new();
        let mut dirs = BTreeSet::new();

        for path in self.files.keys() {
            let Ok(relative) = path.strip_prefix(dir) else {
                continue;
            };
            let mut components = relative.components();
            let Some(first) = components.next() else {
                continue;
            };
            if components.next().is_some() {
                dirs.insert(dir.join(first));
            } else {
                files.push(path.clone());
            }
        }

        if files.is_empty() && dirs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {}", dir.display()),
            ));
        }

        let mut entries: Vec<SourceEntry> = files
            .into_iter()
            .map(|path| SourceEntry { path, is_dir: false })
            .chain(dirs.into_iter().map(|path| SourceEntry { path, is_dir: true }))
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn read_file(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {}", path.display()),
            )
        })
    }
}
