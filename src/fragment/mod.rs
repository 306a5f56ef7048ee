//! Fragment Module
//!
//! A fragment is one source table's contribution to a partition during a
//! compaction pass: an optional row deletion marker plus columns in ascending
//! name order.
//!
//! ## Responsibilities
//! - Yield columns lazily, one cursor step at a time
//! - Surface read failures of the backing data as errors
//! - Rewind to the first column so lazy rows can traverse twice
//! - Report page-cache residency of the backing bytes

mod memory;
mod serialized;

pub use memory::MemoryFragment;
pub use serialized::SerializedFragment;

use crate::column::{Column, DeletionInfo};
use crate::error::Result;

/// Positioned cursor over one partition's data in one source table
///
/// Sources are not shared between rows; a compaction worker owns each one.
pub trait FragmentSource: Send {
    /// Row deletion marker carried by this fragment, if any
    fn deletion_info(&self) -> Option<DeletionInfo>;

    /// Next column in ascending name order, `None` once exhausted
    fn next_column(&mut self) -> Option<Result<Column>>;

    /// Reposition the cursor before the first column
    fn rewind(&mut self) -> Result<()>;

    /// Whether the bytes behind this fragment are resident in the page cache
    fn is_cached(&self) -> bool {
        false
    }

    /// Approximate encoded size of this fragment, used to pick an emission
    /// strategy
    fn serialized_size(&self) -> u64;

    /// Bytes of this fragment held in memory
    fn buffered_size(&self) -> u64 {
        self.serialized_size()
    }
}
