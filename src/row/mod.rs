//! Compacted Row Module
//!
//! A compacted row is the merged form of one partition, ready to be written
//! into a new table and folded into a repair digest. It never writes the
//! partition key or the row size; the caller frames those around it.
//!
//! ## Row Format (big-endian)
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ Bloom Filter                                                │
//! │   Bits (8) | Hashes (4) | BitmapLen (4) | Bitmap            │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Column Index                                                │
//! │   Count (4) | [FirstName][LastName][Offset (8)][Width (8)]* │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Row Deletion                                                │
//! │   0x00 | 0x01 MarkedForDeleteAt (8) LocalDeletionTime (4)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │ Columns                                                     │
//! │   Count (4) | Column* (ascending name order)                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The digest covers the row deletion block and the encoded columns only.
//!
//! ## Strategies
//! - `PrecompactedRow`: merged into memory up front (small partitions)
//! - `LazilyCompactedRow`: streamed from the sources (large partitions)

mod bloom;
mod format;
mod lazy;
mod precompacted;

pub use bloom::ColumnBloom;
pub use format::{ColumnIndexEntry, DeserializedRow, RowHeader, RowSummary};
pub use lazy::LazilyCompactedRow;
pub use precompacted::PrecompactedRow;

use sha2::Digest;

use crate::column::DeletionInfo;
use crate::config::Config;
use crate::error::Result;
use crate::key::DecoratedKey;
use crate::sink::PageCacheInformer;

/// Row encoding knobs
#[derive(Debug, Clone, Copy)]
pub struct RowOptions {
    /// Bytes of column data per column index entry
    pub column_index_size: u64,
    /// False positive rate of the column bloom filter
    pub bloom_fp_rate: f64,
}

impl Default for RowOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RowOptions {
    fn from(config: &Config) -> Self {
        Self {
            column_index_size: config.column_index_size,
            bloom_fp_rate: config.bloom_fp_rate,
        }
    }
}

/// Merged partition, eager or lazy
#[derive(Debug)]
pub enum CompactedRow<'a> {
    /// Merged into memory
    Precompacted(PrecompactedRow<'a>),

    /// Streamed from the fragment sources
    Lazy(LazilyCompactedRow<'a>),
}

impl<'a> CompactedRow<'a> {
    pub fn key(&self) -> &'a DecoratedKey {
        match self {
            CompactedRow::Precompacted(row) => row.key(),
            CompactedRow::Lazy(row) => row.key(),
        }
    }

    /// Write the row (header, deletion, columns; not the key or row size)
    pub fn write(&mut self, out: &mut dyn PageCacheInformer) -> Result<()> {
        match self {
            CompactedRow::Precompacted(row) => row.write(out),
            CompactedRow::Lazy(row) => row.write(out),
        }
    }

    /// Feed the digest the row's deletion block and columns
    pub fn update<D: Digest>(&mut self, digest: &mut D) -> Result<()> {
        match self {
            CompactedRow::Precompacted(row) => row.update(digest),
            CompactedRow::Lazy(row) => row.update(digest),
        }
    }

    /// No surviving columns and no row marker worth keeping
    pub fn is_empty(&self) -> bool {
        self.column_count() == 0 && self.deletion_info().is_none()
    }

    /// Surviving columns after the merge
    pub fn column_count(&self) -> usize {
        self.summary().column_count as usize
    }

    /// Row marker carried into the output, if any
    pub fn deletion_info(&self) -> Option<DeletionInfo> {
        match self {
            CompactedRow::Precompacted(row) => row.deletion_info(),
            CompactedRow::Lazy(row) => row.deletion_info(),
        }
    }

    /// Exact number of bytes `write` produces
    pub fn serialized_size(&self) -> u64 {
        self.summary().row_size(self.deletion_info().as_ref())
    }

    /// Highest surviving column timestamp
    pub fn max_timestamp(&self) -> Option<i64> {
        self.summary().max_timestamp
    }

    pub fn summary(&self) -> &RowSummary {
        match self {
            CompactedRow::Precompacted(row) => row.summary(),
            CompactedRow::Lazy(row) => row.summary(),
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, CompactedRow::Lazy(_))
    }

    pub fn has_columns_in_page_cache(&self) -> bool {
        match self {
            CompactedRow::Precompacted(row) => row.has_columns_in_page_cache(),
            CompactedRow::Lazy(row) => row.has_columns_in_page_cache(),
        }
    }

    pub fn set_has_columns_in_page_cache(&mut self, cached: bool) {
        match self {
            CompactedRow::Precompacted(row) => row.set_has_columns_in_page_cache(cached),
            CompactedRow::Lazy(row) => row.set_has_columns_in_page_cache(cached),
        }
    }
}
