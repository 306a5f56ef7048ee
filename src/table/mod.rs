//! Compacted Table Module
//!
//! Immutable on-disk file of compacted rows, sorted by decorated key. This is
//! the framing the row layer leaves to its caller: partition keys, row sizes,
//! a partition index and table statistics.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (14 bytes)                                       │
//! │   Magic: "ATCR" (4) | Version: u16 (2) | Count: u64 (8) │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [Token: u64][KeyLen: u32][RowSize: u64][Key][Row]     │
//! │   ... repeated for each partition ...                   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block (variable)                                  │
//! │   [Token: u64][KeyLen: u32][Offset: u64][Key]           │
//! │   ... repeated for each partition ...                   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Stats Block (variable, bincode)                         │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (24 bytes)                                       │
//! │   IndexOffset: u64 | StatsOffset: u64 | DataCRC: u32    │
//! │   | Padding (4)                                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//! Table framing is little-endian; the row bytes inside use the row format.

mod iterator;
mod reader;
mod writer;

use serde::{Deserialize, Serialize};

pub use iterator::PartitionIterator;
pub use reader::TableReader;
pub use writer::TableWriter;

// =============================================================================
// Shared Constants (used by writer, reader, iterator)
// =============================================================================

/// Magic bytes identifying a compacted table file
pub(crate) const MAGIC: &[u8; 4] = b"ATCR";

/// Current table format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + PartitionCount (8) = 14 bytes
pub(crate) const HEADER_SIZE: u64 = 14;

/// Footer size: IndexOffset (8) + StatsOffset (8) + DataCRC (4) + Padding (4)
pub(crate) const FOOTER_SIZE: u64 = 24;

/// Partition entry prefix: Token (8) + KeyLen (4) + RowSize (8)
pub(crate) const ENTRY_HEADER_SIZE: usize = 20;

// =============================================================================
// Table Statistics
// =============================================================================

/// Statistics recorded when a table is written
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    /// Number of partitions
    pub partition_count: u64,
    /// Surviving columns across all partitions
    pub column_count: u64,
    /// Partitions carrying a row deletion marker
    pub row_tombstones: u64,
    /// Highest column timestamp in the table
    pub max_timestamp: Option<i64>,
    /// Smallest partition key (raw bytes)
    pub min_key: Vec<u8>,
    /// Largest partition key (raw bytes)
    pub max_key: Vec<u8>,
    /// Bytes written from page-cache resident sources
    pub cached_bytes: u64,
}
