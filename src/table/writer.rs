//! Table Writer
//!
//! Appends compacted rows, in key order, to a new table file.

use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::key::DecoratedKey;
use crate::row::CompactedRow;
use crate::sink::{FileSink, PageCacheInformer};
use crate::AtlasError;

use super::{TableStats, MAGIC, VERSION};

/// Writer for a new compacted table
pub struct TableWriter {
    /// Output file path
    path: PathBuf,
    /// Checksumming, residency-tracking file sink
    sink: FileSink,
    /// Index: key → file offset of partition entry
    index: Vec<(DecoratedKey, u64)>,
    /// Statistics accumulated while appending
    stats: TableStats,
}

impl TableWriter {
    /// Create a new table writer
    ///
    /// Writes the header immediately; call `append()` in ascending key order,
    /// then `finish()` to write index, statistics and footer.
    pub fn new(path: &Path) -> Result<Self> {
        let mut sink = FileSink::create(path)?;

        // Write header (partition count placeholder, updated in finish)
        sink.write_all(MAGIC)?;
        sink.write_all(&VERSION.to_le_bytes())?;
        sink.write_all(&0u64.to_le_bytes())?;

        // The data checksum starts after the header
        sink.reset_checksum();

        Ok(Self {
            path: path.to_path_buf(),
            sink,
            index: Vec::new(),
            stats: TableStats::default(),
        })
    }

    /// Append a compacted row, framed by its key and size
    ///
    /// Returns the number of bytes the partition occupies in the file.
    pub fn append(&mut self, row: &mut CompactedRow<'_>) -> Result<u64> {
        let key = row.key();
        if let Some((last, _)) = self.index.last() {
            if key <= last {
                return Err(AtlasError::Storage(format!(
                    "Partition {} appended after {}: keys must be strictly ascending",
                    key, last
                )));
            }
        }

        let offset = self.sink.position();
        let row_size = row.serialized_size();
        let key_len = u32::try_from(key.key().len()).map_err(|_| {
            AtlasError::Serialization(format!("Partition key too long: {} bytes", key.key().len()))
        })?;

        // Entry framing: [token(8)][key_len(4)][row_size(8)][key]
        self.sink.write_all(&key.token().to_le_bytes())?;
        self.sink.write_all(&key_len.to_le_bytes())?;
        self.sink.write_all(&row_size.to_le_bytes())?;
        self.sink.write_all(key.key())?;

        let row_start = self.sink.position();
        row.write(&mut self.sink)?;
        let written = self.sink.position() - row_start;
        if written != row_size {
            return Err(AtlasError::Corruption(format!(
                "Partition {} wrote {} bytes, expected {}",
                key, written, row_size
            )));
        }

        // Track statistics
        if self.stats.partition_count == 0 {
            self.stats.min_key = key.key().to_vec();
        }
        self.stats.max_key = key.key().to_vec();
        self.stats.partition_count += 1;
        self.stats.column_count += row.column_count() as u64;
        if row.deletion_info().is_some() {
            self.stats.row_tombstones += 1;
        }
        if let Some(ts) = row.max_timestamp() {
            self.stats.max_timestamp = Some(self.stats.max_timestamp.map_or(ts, |m| m.max(ts)));
        }
        if row.has_columns_in_page_cache() {
            self.stats.cached_bytes += written;
        }

        self.index.push((key.clone(), offset));
        Ok(self.sink.position() - offset)
    }

    /// Number of partitions appended so far
    pub fn partition_count(&self) -> u64 {
        self.stats.partition_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the given file range was written from page-cache resident rows
    pub fn is_cached(&self, start: u64, end: u64) -> bool {
        self.sink.is_cached(start, end)
    }

    /// Finish writing: index block, statistics, footer; returns the statistics
    pub fn finish(mut self) -> Result<TableStats> {
        let data_crc = self.sink.checksum();

        // Index block: [token(8)][key_len(4)][offset(8)][key] for each partition
        let index_offset = self.sink.position();
        for (key, offset) in &self.index {
            self.sink.write_all(&key.token().to_le_bytes())?;
            self.sink.write_all(&(key.key().len() as u32).to_le_bytes())?;
            self.sink.write_all(&offset.to_le_bytes())?;
            self.sink.write_all(key.key())?;
        }

        // Statistics block
        let stats_offset = self.sink.position();
        let stats_bytes = bincode::serialize(&self.stats)?;
        self.sink.write_all(&stats_bytes)?;

        // Footer: index_offset (8) + stats_offset (8) + data_crc (4) + padding (4)
        self.sink.write_all(&index_offset.to_le_bytes())?;
        self.sink.write_all(&stats_offset.to_le_bytes())?;
        self.sink.write_all(&data_crc.to_le_bytes())?;
        self.sink.write_all(&[0u8; 4])?;
        self.sink.flush()?;

        // Seek back and update partition count in header
        let mut file = self.sink.into_file()?;
        file.seek(SeekFrom::Start(6))?; // After magic + version
        file.write_all(&self.stats.partition_count.to_le_bytes())?;
        file.sync_all()?;

        tracing::debug!(
            path = %self.path.display(),
            partitions = self.stats.partition_count,
            columns = self.stats.column_count,
            "Finished compacted table"
        );

        Ok(self.stats)
    }
}
