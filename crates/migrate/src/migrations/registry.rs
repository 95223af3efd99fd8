//! Migration Registry - ordered, append-only list of rendered migrations

use super::definitions::Migration;

/// Ordered list of migrations.
///
/// Sequences are assigned from the append position, so the registry always
/// holds the dense range `1..=len()` in order.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a migration, assigning it the next sequence number
    pub fn append(
        &mut self,
        name: impl Into<String>,
        up_sql: impl Into<String>,
        down_sql: impl Into<String>,
    ) -> &Migration {
        let sequence = self.version_count() + 1;
        self.migrations.push(Migration {
            sequence,
            name: name.into(),
            up_sql: up_sql.into(),
            down_sql: down_sql.into(),
        });
        &self.migrations[self.migrations.len() - 1]
    }

    /// Migration at a 0-based index
    pub fn get(&self, index: usize) -> Option<&Migration> {
        self.migrations.get(index)
    }

    /// Migration with the given 1-based sequence
    pub fn by_sequence(&self, sequence: i32) -> Option<&Migration> {
        usize::try_from(sequence)
            .ok()
            .and_then(|s| s.checked_sub(1))
            .and_then(|index| self.migrations.get(index))
    }

    pub fn last(&self) -> Option<&Migration> {
        self.migrations.last()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Highest valid version, `N`
    pub fn version_count(&self) -> i32 {
        i32::try_from(self.migrations.len()).unwrap_or(i32::MAX)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Migration> {
        self.migrations.iter()
    }
}

impl<'a> IntoIterator for &'a MigrationRegistry {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
