//! Compaction Module
//!
//! Drives compacted rows over whole tables.
//!
//! ## Responsibilities
//! - Pick the emission strategy for each partition (`CompactionController`)
//! - Walk several tables in key order, grouping fragments by partition
//!   (`PartitionMerger`)
//! - Compact N tables into one, dropping empty partitions (`CompactionTask`)
//!
//! ## Flow
//! ```text
//! TableReader ─┐
//! TableReader ─┼─► PartitionMerger ─► CompactionController ─► CompactedRow
//! TableReader ─┘     (key order)        (eager / lazy)            │
//!                                                                 ▼
//!                                                  is_empty? ─► TableWriter
//! ```

mod controller;
mod partitions;
mod task;

pub use controller::CompactionController;
pub use partitions::{PartitionFragments, PartitionMerger};
pub use task::{parse_generation, table_path, CompactionStats, CompactionTask};
