//! In-memory fragment
//!
//! Columns held in a vector, as they come out of a memtable flush or a test.

use crate::column::{deletion_size, Column, DeletionInfo};
use crate::error::Result;

use super::FragmentSource;

/// Fragment backed by an owned, sorted column vector
#[derive(Debug, Clone, Default)]
pub struct MemoryFragment {
    deletion: Option<DeletionInfo>,
    columns: Vec<Column>,
    position: usize,
    cached: bool,
}

impl MemoryFragment {
    /// Build a fragment from columns in any order
    ///
    /// Columns are sorted by name; duplicate names are reconciled so the
    /// fragment yields each name once.
    pub fn new(deletion: Option<DeletionInfo>, mut columns: Vec<Column>) -> Self {
        columns.sort_by(|a, b| a.name().cmp(b.name()));

        let mut deduped: Vec<Column> = Vec::with_capacity(columns.len());
        for column in columns {
            match deduped.last_mut() {
                Some(last) if last.name() == column.name() => {
                    let winner = last.clone().reconcile(column);
                    *last = winner;
                }
                _ => deduped.push(column),
            }
        }

        Self {
            deletion,
            columns: deduped,
            position: 0,
            cached: false,
        }
    }

    /// Fragment holding only columns
    pub fn from_columns(columns: Vec<Column>) -> Self {
        Self::new(None, columns)
    }

    /// Fragment holding only a row deletion marker
    pub fn tombstone(deletion: DeletionInfo) -> Self {
        Self::new(Some(deletion), Vec::new())
    }

    /// Mark the fragment's data as page-cache resident
    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}

impl FragmentSource for MemoryFragment {
    fn deletion_info(&self) -> Option<DeletionInfo> {
        self.deletion
    }

    fn next_column(&mut self) -> Option<Result<Column>> {
        let column = self.columns.get(self.position)?.clone();
        self.position += 1;
        Some(Ok(column))
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn is_cached(&self) -> bool {
        self.cached
    }

    fn serialized_size(&self) -> u64 {
        let columns: u64 = self.columns.iter().map(Column::serialized_size).sum();
        deletion_size(self.deletion.as_ref()) + 4 + columns
    }
}
