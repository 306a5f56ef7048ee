//! Table Reader
//!
//! Opens compacted table files and hands out their partitions as fragments
//! for the next compaction or validation pass.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fragment::SerializedFragment;
use crate::key::DecoratedKey;
use crate::AtlasError;

use super::iterator::{read_partition, FragmentOptions, PartitionIterator};
use super::{TableStats, FOOTER_SIZE, HEADER_SIZE, MAGIC, VERSION};

/// Rows up to this size are read into memory unless told otherwise
const DEFAULT_BUFFERED_ROW_LIMIT: u64 = 64 * 1024 * 1024;

/// Reader for compacted table files with an in-memory partition index
pub struct TableReader {
    path: PathBuf,
    /// File handle for reading partitions
    file: BufReader<File>,
    /// In-memory index: key → file offset
    index: BTreeMap<DecoratedKey, u64>,
    partition_count: u64,
    /// Index block starting offset (end of data)
    index_offset: u64,
    data_crc: u32,
    stats: TableStats,
    /// Whether this table's data is believed to be page-cache resident
    cached: bool,
    /// Larger rows are decoded straight from the file
    buffered_row_limit: u64,
}

impl TableReader {
    /// Open a table for reading
    ///
    /// Loads the partition index and statistics into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(AtlasError::Corruption(format!(
                "Table {} too short: {} bytes",
                path.display(),
                file_size
            )));
        }

        // Read and validate header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(AtlasError::Corruption(format!(
                "Invalid table magic: expected ATCR, got {:?}",
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(AtlasError::Corruption(format!(
                "Unsupported table version: {}",
                version
            )));
        }

        let partition_count = u64::from_le_bytes(header[6..14].try_into().unwrap_or_default());

        // Read footer
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let index_offset = u64::from_le_bytes(footer[0..8].try_into().unwrap_or_default());
        let stats_offset = u64::from_le_bytes(footer[8..16].try_into().unwrap_or_default());
        let data_crc = u32::from_le_bytes(footer[16..20].try_into().unwrap_or_default());

        let stats_end = file_size - FOOTER_SIZE;
        if index_offset < HEADER_SIZE || index_offset > stats_offset || stats_offset > stats_end {
            return Err(AtlasError::Corruption(format!(
                "Table {} footer offsets out of range: index {}, stats {}, size {}",
                path.display(),
                index_offset,
                stats_offset,
                file_size
            )));
        }

        // Load index into memory
        file.seek(SeekFrom::Start(index_offset))?;
        let mut index_data = vec![0u8; (stats_offset - index_offset) as usize];
        file.read_exact(&mut index_data)?;
        let index = parse_index(&index_data, index_offset)?;

        if index.len() as u64 != partition_count {
            return Err(AtlasError::Corruption(format!(
                "Table {} header claims {} partitions, index holds {}",
                path.display(),
                partition_count,
                index.len()
            )));
        }

        // Load statistics
        let mut stats_data = vec![0u8; (stats_end - stats_offset) as usize];
        file.read_exact(&mut stats_data)?;
        let stats: TableStats = bincode::deserialize(&stats_data)?;

        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            file: BufReader::new(file),
            index,
            partition_count,
            index_offset,
            data_crc,
            stats,
            cached: false,
            buffered_row_limit: DEFAULT_BUFFERED_ROW_LIMIT,
        })
    }

    /// Look up one partition by key
    pub fn get(&mut self, key: &DecoratedKey) -> Result<Option<SerializedFragment>> {
        let offset = match self.index.get(key) {
            Some(&offset) => offset,
            None => return Ok(None),
        };

        self.file.seek(SeekFrom::Start(offset))?;
        let options = FragmentOptions {
            path: &self.path,
            buffered_row_limit: self.buffered_row_limit,
            cached: self.cached,
        };
        let (stored, fragment, _) =
            read_partition(&mut self.file, &options, offset, self.index_offset)?;
        if &stored != key {
            return Err(AtlasError::Corruption(format!(
                "Index points {} at partition {}",
                key, stored
            )));
        }

        Ok(Some(fragment))
    }

    /// Iterate over every partition in key order
    pub fn iter(&mut self) -> Result<PartitionIterator<'_>> {
        let options = FragmentOptions {
            path: &self.path,
            buffered_row_limit: self.buffered_row_limit,
            cached: self.cached,
        };
        PartitionIterator::new(&mut self.file, options, self.index_offset)
    }

    /// Recompute the data block CRC and compare it with the footer
    pub fn verify_checksum(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(HEADER_SIZE))?;

        let mut hasher = crc32fast::Hasher::new();
        let mut remaining = self.index_offset - HEADER_SIZE;
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            self.file.read_exact(&mut buf[..chunk])?;
            hasher.update(&buf[..chunk]);
            remaining -= chunk as u64;
        }

        let actual = hasher.finalize();
        if actual != self.data_crc {
            return Err(AtlasError::Corruption(format!(
                "Table {} data checksum mismatch: footer {:08x}, computed {:08x}",
                self.path.display(),
                self.data_crc,
                actual
            )));
        }
        Ok(())
    }

    /// Quick check if a key might be in this table (range check)
    pub fn might_contain(&self, key: &DecoratedKey) -> bool {
        match (self.index.keys().next(), self.index.keys().next_back()) {
            (Some(min), Some(max)) => key >= min && key <= max,
            _ => false, // Empty table
        }
    }

    /// Flag this table's data as page-cache resident (or not)
    pub fn set_cached(&mut self, cached: bool) {
        self.cached = cached;
    }

    /// Rows larger than `limit` bytes are handed out as file-backed
    /// fragments instead of being read into memory
    pub fn set_buffered_row_limit(&mut self, limit: u64) {
        self.buffered_row_limit = limit;
    }

    pub fn partition_count(&self) -> u64 {
        self.partition_count
    }

    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Partition keys in order
    pub fn keys(&self) -> impl Iterator<Item = &DecoratedKey> {
        self.index.keys()
    }
}

/// Parse index entries: [token(8)][key_len(4)][offset(8)][key]
///
/// Every offset must point into the data block, which ends at `index_offset`.
fn parse_index(data: &[u8], index_offset: u64) -> Result<BTreeMap<DecoratedKey, u64>> {
    let mut index = BTreeMap::new();
    let mut pos = 0;

    while pos < data.len() {
        if pos + 20 > data.len() {
            return Err(AtlasError::Corruption(format!(
                "Truncated index entry at byte {}",
                pos
            )));
        }
        let token = u64::from_le_bytes(data[pos..pos + 8].try_into().unwrap_or_default());
        let key_len =
            u32::from_le_bytes(data[pos + 8..pos + 12].try_into().unwrap_or_default()) as usize;
        let offset = u64::from_le_bytes(data[pos + 12..pos + 20].try_into().unwrap_or_default());
        if offset < HEADER_SIZE || offset >= index_offset {
            return Err(AtlasError::Corruption(format!(
                "Index entry at byte {} points outside the data block: offset {}",
                pos, offset
            )));
        }
        pos += 20;

        if pos + key_len > data.len() {
            return Err(AtlasError::Corruption(format!(
                "Truncated index key at byte {}",
                pos
            )));
        }
        let key = data[pos..pos + key_len].to_vec();
        pos += key_len;

        index.insert(DecoratedKey::with_token(token, key), offset);
    }

    Ok(index)
}
