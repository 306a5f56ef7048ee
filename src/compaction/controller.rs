//! Compaction Controller
//!
//! Chooses how each partition is compacted and owns the tombstone purge
//! predicate the merge consults.

use crate::config::Config;
use crate::error::Result;
use crate::fragment::FragmentSource;
use crate::key::DecoratedKey;
use crate::merge::{GcGracePurger, TombstonePurger};
use crate::row::{CompactedRow, LazilyCompactedRow, PrecompactedRow, RowOptions};

/// Per-run compaction settings shared by every partition
pub struct CompactionController {
    options: RowOptions,
    /// Fragments totalling more than this are compacted lazily
    in_memory_limit: u64,
    purger: Box<dyn TombstonePurger>,
}

impl CompactionController {
    /// Build a controller from validated configuration
    ///
    /// Tombstones older than `gc_grace_seconds` are purged.
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            options: RowOptions::from(config),
            in_memory_limit: config.in_memory_compaction_limit,
            purger: Box::new(GcGracePurger::from_grace_seconds(config.gc_grace_seconds)),
        })
    }

    /// Replace the purge predicate
    pub fn with_purger(mut self, purger: impl TombstonePurger + 'static) -> Self {
        self.purger = Box::new(purger);
        self
    }

    /// Merge the fragments of `key` into a compacted row
    ///
    /// Small partitions are merged into memory; partitions whose fragments
    /// total more than the in-memory limit are streamed.
    pub fn compacted_row<'a>(
        &'a self,
        key: &'a DecoratedKey,
        sources: Vec<Box<dyn FragmentSource>>,
    ) -> Result<CompactedRow<'a>> {
        let total_size: u64 = sources.iter().map(|source| source.serialized_size()).sum();

        if total_size > self.in_memory_limit {
            tracing::debug!(
                key = %key,
                size = total_size,
                limit = self.in_memory_limit,
                "Compacting large row incrementally"
            );
            let row = LazilyCompactedRow::new(key, sources, self.purger.as_ref(), &self.options)?;
            Ok(CompactedRow::Lazy(row))
        } else {
            let row = PrecompactedRow::new(key, sources, self.purger.as_ref(), &self.options)?;
            Ok(CompactedRow::Precompacted(row))
        }
    }

    pub fn purger(&self) -> &dyn TombstonePurger {
        self.purger.as_ref()
    }

    pub fn options(&self) -> &RowOptions {
        &self.options
    }

    pub fn in_memory_limit(&self) -> u64 {
        self.in_memory_limit
    }
}
