//! Columns and deletion markers
//!
//! The cell-level data model shared by fragments, the merge engine and the
//! row writers, together with the last-write-wins reconciliation rules.
//!
//! ## Column Encoding (big-endian)
//! ```text
//! ┌────────────┬──────┬──────────┬───────────────┬────────────┬───────┐
//! │NameLen (2) │ Name │Flags (1) │ Timestamp (8) │ ValLen (4) │ Value │
//! └────────────┴──────┴──────────┴───────────────┴────────────┴───────┘
//! ```
//! A deleted column carries its 4-byte local deletion time as its value.
//!
//! ## Row Deletion Encoding
//! ```text
//! 0x00                                   no marker
//! 0x01 │ MarkedForDeleteAt (8) │ LocalDeletionTime (4)
//! ```

use std::cmp::Ordering;

use bytes::Bytes;

use crate::codec::{put_short_bytes, RowRead};
use crate::error::{AtlasError, Result};

/// Flag byte of a live column
pub(crate) const LIVE_FLAG: u8 = 0x00;

/// Flag byte of a column tombstone
pub(crate) const DELETED_FLAG: u8 = 0x01;

/// Fixed part of an encoded column: name len + flags + timestamp + value len
const COLUMN_OVERHEAD: u64 = 2 + 1 + 8 + 4;

// =============================================================================
// Row Deletion Marker
// =============================================================================

/// Row-level deletion marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionInfo {
    /// Columns with a timestamp at or below this are deleted
    pub marked_for_delete_at: i64,
    /// When the delete was applied locally (seconds since epoch)
    pub local_deletion_time: u32,
}

impl DeletionInfo {
    pub fn new(marked_for_delete_at: i64, local_deletion_time: u32) -> Self {
        Self {
            marked_for_delete_at,
            local_deletion_time,
        }
    }

    /// Whether this marker deletes the given column
    pub fn shadows(&self, column: &Column) -> bool {
        column.timestamp <= self.marked_for_delete_at
    }

    /// Pick the more recent of two markers
    pub fn merge(self, other: DeletionInfo) -> DeletionInfo {
        let ord = self
            .marked_for_delete_at
            .cmp(&other.marked_for_delete_at)
            .then(self.local_deletion_time.cmp(&other.local_deletion_time));
        if ord == Ordering::Less {
            other
        } else {
            self
        }
    }
}

/// Encoded size of an optional row marker
pub(crate) fn deletion_size(marker: Option<&DeletionInfo>) -> u64 {
    match marker {
        Some(_) => 1 + 8 + 4,
        None => 1,
    }
}

/// Append the row marker block
pub(crate) fn encode_deletion(marker: Option<&DeletionInfo>, buf: &mut Vec<u8>) {
    match marker {
        Some(d) => {
            buf.push(0x01);
            buf.extend_from_slice(&d.marked_for_delete_at.to_be_bytes());
            buf.extend_from_slice(&d.local_deletion_time.to_be_bytes());
        }
        None => buf.push(0x00),
    }
}

pub(crate) fn decode_deletion<D: RowRead>(decoder: &mut D) -> Result<Option<DeletionInfo>> {
    match decoder.get_u8("row deletion flag")? {
        0x00 => Ok(None),
        0x01 => {
            let marked_for_delete_at = decoder.get_i64("row deletion timestamp")?;
            let local_deletion_time = decoder.get_u32("row deletion time")?;
            Ok(Some(DeletionInfo::new(marked_for_delete_at, local_deletion_time)))
        }
        flag => Err(AtlasError::Corruption(format!(
            "Unknown row deletion flag: 0x{:02x}",
            flag
        ))),
    }
}

// =============================================================================
// Column
// =============================================================================

/// Whether a column holds data or deletes it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// A live value
    Live,

    /// A column tombstone
    Deleted { local_deletion_time: u32 },
}

/// A single named, timestamped cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: Bytes,
    value: Bytes,
    timestamp: i64,
    kind: ColumnKind,
}

impl Column {
    /// Create a live column
    pub fn live(name: impl Into<Bytes>, value: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            timestamp,
            kind: ColumnKind::Live,
        }
    }

    /// Create a column tombstone
    pub fn deleted(name: impl Into<Bytes>, timestamp: i64, local_deletion_time: u32) -> Self {
        Self {
            name: name.into(),
            value: Bytes::new(),
            timestamp,
            kind: ColumnKind::Deleted {
                local_deletion_time,
            },
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub(crate) fn name_bytes(&self) -> Bytes {
        self.name.clone()
    }

    /// Value bytes (empty for tombstones)
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn kind(&self) -> ColumnKind {
        self.kind
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self.kind, ColumnKind::Deleted { .. })
    }

    /// Local deletion time of a tombstone
    pub fn local_deletion_time(&self) -> Option<u32> {
        match self.kind {
            ColumnKind::Deleted {
                local_deletion_time,
            } => Some(local_deletion_time),
            ColumnKind::Live => None,
        }
    }

    fn value_len(&self) -> u64 {
        match self.kind {
            ColumnKind::Live => self.value.len() as u64,
            ColumnKind::Deleted { .. } => 4,
        }
    }

    /// Exact number of bytes `encode` appends
    pub fn serialized_size(&self) -> u64 {
        COLUMN_OVERHEAD + self.name.len() as u64 + self.value_len()
    }

    /// Append the encoded column to `buf`
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        put_short_bytes(buf, &self.name, "Column name")?;
        match self.kind {
            ColumnKind::Live => {
                buf.push(LIVE_FLAG);
                buf.extend_from_slice(&self.timestamp.to_be_bytes());
                let len = u32::try_from(self.value.len()).map_err(|_| {
                    AtlasError::Serialization(format!(
                        "Column value too long: {} bytes",
                        self.value.len()
                    ))
                })?;
                buf.extend_from_slice(&len.to_be_bytes());
                buf.extend_from_slice(&self.value);
            }
            ColumnKind::Deleted {
                local_deletion_time,
            } => {
                buf.push(DELETED_FLAG);
                buf.extend_from_slice(&self.timestamp.to_be_bytes());
                buf.extend_from_slice(&4u32.to_be_bytes());
                buf.extend_from_slice(&local_deletion_time.to_be_bytes());
            }
        }
        Ok(())
    }

    pub(crate) fn decode<D: RowRead>(decoder: &mut D) -> Result<Column> {
        let name = decoder.get_short_bytes("column name")?;
        let flags = decoder.get_u8("column flags")?;
        let timestamp = decoder.get_i64("column timestamp")?;
        let value_len = decoder.get_u32("column value length")? as usize;
        match flags {
            LIVE_FLAG => {
                let value = decoder.take(value_len, "column value")?;
                Ok(Column {
                    name,
                    value,
                    timestamp,
                    kind: ColumnKind::Live,
                })
            }
            DELETED_FLAG => {
                if value_len != 4 {
                    return Err(AtlasError::Corruption(format!(
                        "Column tombstone with {} value bytes",
                        value_len
                    )));
                }
                let local_deletion_time = decoder.get_u32("column deletion time")?;
                Ok(Column::deleted(name, timestamp, local_deletion_time))
            }
            _ => Err(AtlasError::Corruption(format!(
                "Unknown column flags: 0x{:02x}",
                flags
            ))),
        }
    }

    /// Resolve two versions of the same column, keeping the winner.
    ///
    /// Higher timestamp wins. On a tie a tombstone beats a live value, two
    /// live values are ordered by encoded size and then by value bytes, and
    /// two tombstones by local deletion time.
    pub fn reconcile(self, other: Column) -> Column {
        debug_assert_eq!(self.name, other.name);

        let ord = self.timestamp.cmp(&other.timestamp).then_with(|| {
            match (self.kind, other.kind) {
                (ColumnKind::Deleted { .. }, ColumnKind::Live) => Ordering::Greater,
                (ColumnKind::Live, ColumnKind::Deleted { .. }) => Ordering::Less,
                (
                    ColumnKind::Deleted {
                        local_deletion_time: a,
                    },
                    ColumnKind::Deleted {
                        local_deletion_time: b,
                    },
                ) => a.cmp(&b),
                (ColumnKind::Live, ColumnKind::Live) => self
                    .serialized_size()
                    .cmp(&other.serialized_size())
                    .then_with(|| self.value.cmp(&other.value)),
            }
        });

        if ord == Ordering::Less {
            other
        } else {
            self
        }
    }
}
