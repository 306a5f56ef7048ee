//! Partition Iterator
//!
//! Sequential iteration over all partitions of a compacted table.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Bytes;

use crate::error::Result;
use crate::fragment::SerializedFragment;
use crate::key::DecoratedKey;
use crate::AtlasError;

use super::{ENTRY_HEADER_SIZE, HEADER_SIZE};

/// How partitions read from one table are handed out
#[derive(Debug, Clone, Copy)]
pub(super) struct FragmentOptions<'p> {
    pub path: &'p Path,
    /// Rows larger than this stay in the file
    pub buffered_row_limit: u64,
    /// Residency hint handed to every fragment
    pub cached: bool,
}

/// Iterator over table partitions in key order
pub struct PartitionIterator<'a> {
    file: &'a mut BufReader<File>,
    options: FragmentOptions<'a>,
    /// Stop reading when we reach this offset (start of index block)
    end_offset: u64,
    /// Current position in file
    current_offset: u64,
}

impl<'a> PartitionIterator<'a> {
    /// Create a new iterator starting from the data block
    pub(super) fn new(
        file: &'a mut BufReader<File>,
        options: FragmentOptions<'a>,
        end_offset: u64,
    ) -> Result<Self> {
        // Seek to start of data (after header)
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            options,
            end_offset,
            current_offset: HEADER_SIZE,
        })
    }
}

impl Iterator for PartitionIterator<'_> {
    type Item = Result<(DecoratedKey, SerializedFragment)>;

    fn next(&mut self) -> Option<Self::Item> {
        // Stop at index block
        if self.current_offset >= self.end_offset {
            return None;
        }

        let entry = read_partition(
            self.file,
            &self.options,
            self.current_offset,
            self.end_offset,
        )
        .map(|(key, fragment, size)| {
            self.current_offset += size;
            (key, fragment)
        });

        if entry.is_err() {
            // Nothing after a bad entry can be trusted
            self.current_offset = self.end_offset;
        }
        Some(entry)
    }
}

/// Read the partition entry at `entry_offset`, where the file is positioned
///
/// `end_offset` bounds the entry so a corrupt size cannot run past the data
/// block. Returns the key, the fragment and the total entry size, leaving the
/// file at the next entry.
pub(super) fn read_partition(
    file: &mut BufReader<File>,
    options: &FragmentOptions<'_>,
    entry_offset: u64,
    end_offset: u64,
) -> Result<(DecoratedKey, SerializedFragment, u64)> {
    let mut header = [0u8; ENTRY_HEADER_SIZE];
    file.read_exact(&mut header)?;

    let token = u64::from_le_bytes(header[0..8].try_into().unwrap_or_default());
    let key_len = u32::from_le_bytes(header[8..12].try_into().unwrap_or_default()) as u64;
    let row_size = u64::from_le_bytes(header[12..20].try_into().unwrap_or_default());

    let available = end_offset.saturating_sub(entry_offset);
    let entry_size = (ENTRY_HEADER_SIZE as u64)
        .checked_add(key_len)
        .and_then(|size| size.checked_add(row_size))
        .filter(|&size| size <= available)
        .ok_or_else(|| {
            AtlasError::Corruption(format!(
                "Partition entry at {} overruns data block: key {} bytes, row {} bytes, {} bytes left",
                entry_offset, key_len, row_size, available
            ))
        })?;

    let mut key = vec![0u8; key_len as usize];
    file.read_exact(&mut key)?;

    let fragment = if row_size > options.buffered_row_limit {
        let row_offset = entry_offset + ENTRY_HEADER_SIZE as u64 + key_len;
        let fragment = SerializedFragment::from_file(file, options.path, row_offset, row_size)?;
        file.seek(SeekFrom::Start(entry_offset + entry_size))?;
        fragment
    } else {
        let mut row = vec![0u8; row_size as usize];
        file.read_exact(&mut row)?;
        SerializedFragment::new(Bytes::from(row))?
    };

    Ok((
        DecoratedKey::with_token(token, key),
        fragment.with_cached(options.cached),
        entry_size,
    ))
}
