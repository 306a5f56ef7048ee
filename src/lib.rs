//! # atlas-compaction
//!
//! Row compaction for AtlasKV's sorted table files:
//! - Streaming k-way merge of a partition's fragments
//! - Last-write-wins reconciliation with row and column tombstones
//! - Eager (in-memory) and lazy (streamed) compacted rows
//! - Repair digests over exactly the row content bytes
//! - Page-cache residency hints carried into the output
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Compaction Task / Repair Validator              │
//! │                  (key-ordered table walk)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Compaction Controller                        │
//! │           (eager vs lazy, tombstone purging)                 │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Precompacted│          │    Lazy     │
//!   │     Row     │          │    Row      │
//!   └──────┬──────┘          └──────┬──────┘
//!          └────────────┬───────────┘
//!                       │  RowMerger (fragments → columns)
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Table Writer│          │ SHA-256     │
//!   │  (sink)     │          │ digest      │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

mod codec;
pub mod key;
pub mod column;
pub mod fragment;
pub mod merge;
pub mod row;
pub mod sink;
pub mod table;
pub mod compaction;
pub mod repair;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AtlasError, Result};
pub use config::Config;
pub use key::DecoratedKey;
pub use column::{Column, ColumnKind, DeletionInfo};
pub use fragment::{FragmentSource, MemoryFragment, SerializedFragment};
pub use merge::{GcGracePurger, RetainAll, RowMerger, TombstonePurger};
pub use row::{CompactedRow, DeserializedRow, LazilyCompactedRow, PrecompactedRow, RowOptions};
pub use sink::{FileSink, MemorySink, PageCacheInformer};
pub use table::{TableReader, TableStats, TableWriter};
pub use compaction::{CompactionController, CompactionStats, CompactionTask};
pub use repair::{PartitionDigest, ValidationReport, Validator};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of atlas-compaction
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
