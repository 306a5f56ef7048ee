//! Row Merge Engine
//!
//! Combines the fragments of one partition into a single logical row.
//!
//! ## Rules
//! - Row marker: the fragment marker with the highest `marked_for_delete_at`
//!   wins. It is retained unless the purger says it may be dropped; a
//!   dropped marker still deletes older columns in this merge.
//! - Columns: a k-way heap merge in ascending name order. Versions of the
//!   same name are reconciled last-write-wins (`Column::reconcile`).
//! - The winner is suppressed if the row marker covers it
//!   (`marked_for_delete_at >= timestamp`), or if it is a purgeable column
//!   tombstone.

mod purge;

pub use purge::{now_in_seconds, GcGracePurger, RetainAll, TombstonePurger};

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::column::{Column, DeletionInfo};
use crate::error::{AtlasError, Result};
use crate::fragment::FragmentSource;
use crate::key::DecoratedKey;

/// Merge rules for one partition, shared by every traversal of its fragments
#[derive(Clone, Copy)]
pub struct RowMerger<'a> {
    key: &'a DecoratedKey,
    purger: &'a dyn TombstonePurger,
    /// Most recent row marker across all fragments
    deletion: Option<DeletionInfo>,
}

impl<'a> RowMerger<'a> {
    /// Resolve the row marker across `sources`
    pub fn new(
        key: &'a DecoratedKey,
        sources: &[Box<dyn FragmentSource>],
        purger: &'a dyn TombstonePurger,
    ) -> Self {
        let deletion = sources
            .iter()
            .filter_map(|source| source.deletion_info())
            .reduce(DeletionInfo::merge);

        Self {
            key,
            purger,
            deletion,
        }
    }

    pub fn key(&self) -> &'a DecoratedKey {
        self.key
    }

    /// Row marker used to shadow columns, whether or not it is retained
    pub fn shadowing_deletion(&self) -> Option<DeletionInfo> {
        self.deletion
    }

    /// Row marker that survives into the compacted row
    pub fn retained_deletion(&self) -> Option<DeletionInfo> {
        self.deletion
            .filter(|d| !self.purger.is_purgeable(self.key, d.local_deletion_time))
    }

    /// Start a merge over `sources`, positioned at their current cursors
    pub fn columns<'s>(
        &self,
        sources: &'s mut [Box<dyn FragmentSource>],
    ) -> Result<MergedColumns<'s, 'a>> {
        MergedColumns::new(*self, sources)
    }

    /// Whether a reconciled column survives the merge
    fn keeps(&self, column: &Column) -> bool {
        if let Some(deletion) = &self.deletion {
            if deletion.shadows(column) {
                return false;
            }
        }
        match column.local_deletion_time() {
            Some(ldt) => !self.purger.is_purgeable(self.key, ldt),
            None => true,
        }
    }
}

// =============================================================================
// K-way Column Merge
// =============================================================================

/// Column waiting in the merge heap, tagged with the source it came from
struct HeapEntry {
    column: Column,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.column
            .name()
            .cmp(other.column.name())
            .then(self.source.cmp(&other.source))
    }
}

/// Counters for one traversal
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    /// Column versions pulled from sources
    pub columns_read: u64,
    /// Versions that lost reconciliation
    pub columns_superseded: u64,
    /// Winners deleted by the row marker
    pub columns_shadowed: u64,
    /// Column tombstones dropped by the purger
    pub tombstones_purged: u64,
}

/// Iterator over the merged, surviving columns of a partition
///
/// Yields columns in ascending name order. A read failure of any source, or a
/// source yielding names out of order, ends the merge with an error.
pub struct MergedColumns<'s, 'a> {
    merger: RowMerger<'a>,
    sources: &'s mut [Box<dyn FragmentSource>],
    heap: BinaryHeap<Reverse<HeapEntry>>,
    stats: MergeStats,
    failed: bool,
}

impl<'s, 'a> MergedColumns<'s, 'a> {
    fn new(merger: RowMerger<'a>, sources: &'s mut [Box<dyn FragmentSource>]) -> Result<Self> {
        let mut merged = Self {
            merger,
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            stats: MergeStats::default(),
            failed: false,
        };
        for source in 0..merged.sources.len() {
            merged.pull(source, None)?;
        }
        Ok(merged)
    }

    pub fn stats(&self) -> &MergeStats {
        &self.stats
    }

    /// Push the next column of `source` onto the heap
    fn pull(&mut self, source: usize, previous: Option<&[u8]>) -> Result<()> {
        let column = match self.sources[source].next_column() {
            None => return Ok(()),
            Some(column) => column?,
        };

        if let Some(previous) = previous {
            if column.name() <= previous {
                return Err(AtlasError::Corruption(format!(
                    "Fragment {} of partition {} yielded column {:?} after {:?}",
                    source,
                    self.merger.key,
                    String::from_utf8_lossy(column.name()),
                    String::from_utf8_lossy(previous),
                )));
            }
        }

        self.stats.columns_read += 1;
        self.heap.push(Reverse(HeapEntry { column, source }));
        Ok(())
    }

    /// Pop every version of the smallest name and reconcile them
    fn reduce(&mut self) -> Result<Option<Column>> {
        let Reverse(first) = match self.heap.pop() {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let name = first.column.name_bytes();
        self.pull(first.source, Some(&name[..]))?;
        let mut winner = first.column;

        while let Some(Reverse(next)) = self.heap.peek() {
            if next.column.name() != &name[..] {
                break;
            }
            if let Some(Reverse(next)) = self.heap.pop() {
                self.pull(next.source, Some(&name[..]))?;
                winner = winner.reconcile(next.column);
                self.stats.columns_superseded += 1;
            }
        }

        Ok(Some(winner))
    }
}

impl Iterator for MergedColumns<'_, '_> {
    type Item = Result<Column>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            let column = match self.reduce() {
                Ok(Some(column)) => column,
                Ok(None) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            };

            if self.merger.keeps(&column) {
                return Some(Ok(column));
            }

            if column.is_deleted()
                && !self
                    .merger
                    .shadowing_deletion()
                    .is_some_and(|d| d.shadows(&column))
            {
                self.stats.tombstones_purged += 1;
            } else {
                self.stats.columns_shadowed += 1;
            }
        }
    }
}
