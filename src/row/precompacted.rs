//! Eager emission
//!
//! Merges the whole partition into memory when the row is built. Writing and
//! digesting then walk the same vector, any number of times, in any order.

use sha2::Digest;

use crate::column::{encode_deletion, Column, DeletionInfo};
use crate::error::Result;
use crate::fragment::FragmentSource;
use crate::key::DecoratedKey;
use crate::merge::{RowMerger, TombstonePurger};
use crate::sink::PageCacheInformer;

use super::format::RowSummary;
use super::RowOptions;

/// Compacted row fully materialized in memory
#[derive(Debug)]
pub struct PrecompactedRow<'a> {
    key: &'a DecoratedKey,
    deletion: Option<DeletionInfo>,
    columns: Vec<Column>,
    summary: RowSummary,
    has_columns_in_page_cache: bool,
}

impl<'a> PrecompactedRow<'a> {
    /// Merge `sources` into memory. The sources are consumed.
    pub fn new(
        key: &'a DecoratedKey,
        mut sources: Vec<Box<dyn FragmentSource>>,
        purger: &'a dyn TombstonePurger,
        options: &RowOptions,
    ) -> Result<Self> {
        let merger = RowMerger::new(key, &sources, purger);
        let has_columns_in_page_cache = sources.iter().any(|source| source.is_cached());

        let columns = merger
            .columns(&mut sources)?
            .collect::<Result<Vec<_>>>()?;
        let summary =
            RowSummary::of_columns(&columns, options.column_index_size, options.bloom_fp_rate)?;

        Ok(Self {
            key,
            deletion: merger.retained_deletion(),
            columns,
            summary,
            has_columns_in_page_cache,
        })
    }

    pub fn key(&self) -> &'a DecoratedKey {
        self.key
    }

    /// Surviving columns in name order
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn deletion_info(&self) -> Option<DeletionInfo> {
        self.deletion
    }

    pub fn summary(&self) -> &RowSummary {
        &self.summary
    }

    pub fn write(&mut self, out: &mut dyn PageCacheInformer) -> Result<()> {
        let start = out.position();

        let mut buf = Vec::new();
        self.summary.encode_prefix(self.deletion.as_ref(), &mut buf)?;
        out.write_all(&buf)?;

        for column in &self.columns {
            buf.clear();
            column.encode(&mut buf)?;
            out.write_all(&buf)?;
        }

        if self.has_columns_in_page_cache {
            let end = out.position();
            out.keep_cached(start, end);
        }
        Ok(())
    }

    pub fn update<D: Digest>(&self, digest: &mut D) -> Result<()> {
        let mut buf = Vec::new();
        encode_deletion(self.deletion.as_ref(), &mut buf);
        digest.update(&buf);

        for column in &self.columns {
            buf.clear();
            column.encode(&mut buf)?;
            digest.update(&buf);
        }
        Ok(())
    }

    pub fn has_columns_in_page_cache(&self) -> bool {
        self.has_columns_in_page_cache
    }

    pub fn set_has_columns_in_page_cache(&mut self, cached: bool) {
        self.has_columns_in_page_cache = cached;
    }
}
