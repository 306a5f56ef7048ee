//! Lazy emission
//!
//! Streams merged columns straight from the fragment sources without holding
//! the merged row. Building the row costs two passes (the first sizes the row
//! and builds its column index, the second fills the bloom filter once the
//! final column count is known); every `write` or `update` is one more pass.
//! Sources are rewound before each pass, so the row may be written and
//! digested any number of times, in any order.

use sha2::Digest;

use crate::column::{encode_deletion, DeletionInfo};
use crate::error::{AtlasError, Result};
use crate::fragment::FragmentSource;
use crate::key::DecoratedKey;
use crate::merge::{MergeStats, RowMerger, TombstonePurger};
use crate::sink::PageCacheInformer;

use super::bloom::ColumnBloom;
use super::format::{ColumnIndexer, RowSummary};
use super::RowOptions;

/// Compacted row streamed from its sources on demand
pub struct LazilyCompactedRow<'a> {
    merger: RowMerger<'a>,
    sources: Vec<Box<dyn FragmentSource>>,
    deletion: Option<DeletionInfo>,
    summary: RowSummary,
    merge_stats: MergeStats,
    has_columns_in_page_cache: bool,
}

impl<'a> LazilyCompactedRow<'a> {
    /// Size the row over `sources`; the sources must be restartable
    pub fn new(
        key: &'a DecoratedKey,
        mut sources: Vec<Box<dyn FragmentSource>>,
        purger: &'a dyn TombstonePurger,
        options: &RowOptions,
    ) -> Result<Self> {
        let merger = RowMerger::new(key, &sources, purger);
        let has_columns_in_page_cache = sources.iter().any(|source| source.is_cached());

        let mut indexer = ColumnIndexer::new(options.column_index_size);
        let merge_stats = {
            let mut merged = merger.columns(&mut sources)?;
            for column in &mut merged {
                indexer.add(&column?);
            }
            *merged.stats()
        };
        rewind_all(&mut sources)?;

        let mut bloom =
            ColumnBloom::with_capacity(indexer.column_count() as usize, options.bloom_fp_rate)?;
        for column in merger.columns(&mut sources)? {
            bloom.insert(column?.name());
        }
        rewind_all(&mut sources)?;

        let summary = indexer.finish(bloom)?;

        tracing::debug!(
            key = %key,
            fragments = sources.len(),
            columns = summary.column_count,
            columns_read = merge_stats.columns_read,
            columns_shadowed = merge_stats.columns_shadowed,
            "Sized lazily compacted row"
        );

        Ok(Self {
            deletion: merger.retained_deletion(),
            merger,
            sources,
            summary,
            merge_stats,
            has_columns_in_page_cache,
        })
    }

    pub fn key(&self) -> &'a DecoratedKey {
        self.merger.key()
    }

    pub fn deletion_info(&self) -> Option<DeletionInfo> {
        self.deletion
    }

    pub fn summary(&self) -> &RowSummary {
        &self.summary
    }

    /// Merge counters from the sizing pass
    pub fn merge_stats(&self) -> &MergeStats {
        &self.merge_stats
    }

    pub fn write(&mut self, out: &mut dyn PageCacheInformer) -> Result<()> {
        // Residency may have changed since the row was sized
        self.has_columns_in_page_cache |= self.sources.iter().any(|source| source.is_cached());
        let start = out.position();

        let mut buf = Vec::new();
        self.summary.encode_prefix(self.deletion.as_ref(), &mut buf)?;
        out.write_all(&buf)?;

        self.stream(|bytes| Ok(out.write_all(bytes)?))?;

        if self.has_columns_in_page_cache {
            let end = out.position();
            out.keep_cached(start, end);
        }
        Ok(())
    }

    pub fn update<D: Digest>(&mut self, digest: &mut D) -> Result<()> {
        let mut buf = Vec::new();
        encode_deletion(self.deletion.as_ref(), &mut buf);
        digest.update(&buf);

        self.stream(|bytes| {
            digest.update(bytes);
            Ok(())
        })
    }

    pub fn has_columns_in_page_cache(&self) -> bool {
        self.has_columns_in_page_cache
    }

    pub fn set_has_columns_in_page_cache(&mut self, cached: bool) {
        self.has_columns_in_page_cache = cached;
    }

    /// Re-run the merge from the start, handing each encoded column to `emit`
    fn stream<F>(&mut self, mut emit: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        rewind_all(&mut self.sources)?;

        let merger = self.merger;
        let mut buf = Vec::new();
        let mut count: u64 = 0;
        let mut size: u64 = 0;

        for column in merger.columns(&mut self.sources)? {
            let column = column?;
            buf.clear();
            column.encode(&mut buf)?;
            emit(&buf)?;
            count += 1;
            size += buf.len() as u64;
        }

        if count != self.summary.column_count as u64 || size != self.summary.columns_size {
            return Err(AtlasError::Corruption(format!(
                "Partition {} changed between passes: sized {} columns / {} bytes, streamed {} / {}",
                merger.key(),
                self.summary.column_count,
                self.summary.columns_size,
                count,
                size
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for LazilyCompactedRow<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazilyCompactedRow")
            .field("key", self.merger.key())
            .field("fragments", &self.sources.len())
            .field("deletion", &self.deletion)
            .field("column_count", &self.summary.column_count)
            .finish()
    }
}

fn rewind_all(sources: &mut [Box<dyn FragmentSource>]) -> Result<()> {
    for source in sources.iter_mut() {
        source.rewind()?;
    }
    Ok(())
}
