//! Row encoding
//!
//! Header construction (bloom filter + column index), the row summary shared
//! by both emission strategies, and the reader that decodes a written row.

use bytes::Bytes;

use crate::codec::{put_short_bytes, Decoder, RowRead};
use crate::column::{decode_deletion, deletion_size, encode_deletion, Column, DeletionInfo};
use crate::error::{AtlasError, Result};

use super::bloom::ColumnBloom;

// =============================================================================
// Column Index
// =============================================================================

/// One block of consecutive columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnIndexEntry {
    pub first_name: Bytes,
    pub last_name: Bytes,
    /// Offset of the block's first byte from the first column
    pub offset: u64,
    /// Encoded size of the block
    pub width: u64,
}

impl ColumnIndexEntry {
    fn serialized_size(&self) -> u64 {
        2 + self.first_name.len() as u64 + 2 + self.last_name.len() as u64 + 8 + 8
    }
}

/// Accumulates index blocks, size and count while columns stream past
pub(crate) struct ColumnIndexer {
    block_size: u64,
    entries: Vec<ColumnIndexEntry>,
    block_first: Option<Bytes>,
    block_start: u64,
    last_name: Option<Bytes>,
    data_size: u64,
    column_count: u64,
    max_timestamp: Option<i64>,
}

impl ColumnIndexer {
    pub(crate) fn new(block_size: u64) -> Self {
        Self {
            block_size: block_size.max(1),
            entries: Vec::new(),
            block_first: None,
            block_start: 0,
            last_name: None,
            data_size: 0,
            column_count: 0,
            max_timestamp: None,
        }
    }

    pub(crate) fn add(&mut self, column: &Column) {
        if self.block_first.is_none() {
            self.block_first = Some(column.name_bytes());
            self.block_start = self.data_size;
        }

        self.data_size += column.serialized_size();
        self.column_count += 1;
        self.last_name = Some(column.name_bytes());
        self.max_timestamp = Some(
            self.max_timestamp
                .map_or(column.timestamp(), |ts| ts.max(column.timestamp())),
        );

        if self.data_size - self.block_start >= self.block_size {
            self.close_block();
        }
    }

    fn close_block(&mut self) {
        if let (Some(first_name), Some(last_name)) = (self.block_first.take(), &self.last_name) {
            self.entries.push(ColumnIndexEntry {
                first_name,
                last_name: last_name.clone(),
                offset: self.block_start,
                width: self.data_size - self.block_start,
            });
        }
    }

    /// Close the trailing block and size the bloom filter from the final count
    pub(crate) fn finish(mut self, bloom: ColumnBloom) -> Result<RowSummary> {
        self.close_block();
        let column_count = u32::try_from(self.column_count).map_err(|_| {
            AtlasError::Serialization(format!("Too many columns in row: {}", self.column_count))
        })?;

        Ok(RowSummary {
            header: RowHeader {
                bloom,
                index: self.entries,
            },
            column_count,
            columns_size: self.data_size,
            max_timestamp: self.max_timestamp,
        })
    }

    pub(crate) fn column_count(&self) -> u64 {
        self.column_count
    }
}

// =============================================================================
// Row Header
// =============================================================================

/// Column-existence summary written ahead of the row's data
#[derive(Debug)]
pub struct RowHeader {
    pub bloom: ColumnBloom,
    pub index: Vec<ColumnIndexEntry>,
}

impl RowHeader {
    pub fn serialized_size(&self) -> u64 {
        self.bloom.serialized_size()
            + 4
            + self
                .index
                .iter()
                .map(ColumnIndexEntry::serialized_size)
                .sum::<u64>()
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        self.bloom.encode(buf);
        buf.extend_from_slice(&(self.index.len() as u32).to_be_bytes());
        for entry in &self.index {
            put_short_bytes(buf, &entry.first_name, "Index column name")?;
            put_short_bytes(buf, &entry.last_name, "Index column name")?;
            buf.extend_from_slice(&entry.offset.to_be_bytes());
            buf.extend_from_slice(&entry.width.to_be_bytes());
        }
        Ok(())
    }

    pub(crate) fn decode<D: RowRead>(decoder: &mut D) -> Result<Self> {
        let bloom = ColumnBloom::decode(decoder)?;
        let count = decoder.get_u32("column index count")?;

        let mut index = Vec::new();
        for _ in 0..count {
            let first_name = decoder.get_short_bytes("index first name")?;
            let last_name = decoder.get_short_bytes("index last name")?;
            let offset = decoder.get_u64("index offset")?;
            let width = decoder.get_u64("index width")?;
            index.push(ColumnIndexEntry {
                first_name,
                last_name,
                offset,
                width,
            });
        }

        Ok(Self { bloom, index })
    }

    /// Step over an encoded header, leaving the decoder at the row marker
    pub(crate) fn skip<D: RowRead>(decoder: &mut D) -> Result<()> {
        ColumnBloom::skip(decoder)?;
        let count = decoder.get_u32("column index count")?;
        for _ in 0..count {
            let first_len = decoder.get_u16("index first name")?;
            decoder.skip(first_len as u64, "index first name")?;
            let last_len = decoder.get_u16("index last name")?;
            decoder.skip(last_len as u64 + 16, "index entry")?;
        }
        Ok(())
    }
}

// =============================================================================
// Row Summary
// =============================================================================

/// Everything needed to frame a row before its columns are emitted
#[derive(Debug)]
pub struct RowSummary {
    pub header: RowHeader,
    pub column_count: u32,
    /// Encoded size of all column entries
    pub columns_size: u64,
    /// Highest surviving column timestamp
    pub max_timestamp: Option<i64>,
}

impl RowSummary {
    /// Summarize already-merged columns in a single pass
    pub(crate) fn of_columns(columns: &[Column], block_size: u64, fp_rate: f64) -> Result<Self> {
        let mut indexer = ColumnIndexer::new(block_size);
        let mut bloom = ColumnBloom::with_capacity(columns.len(), fp_rate)?;
        for column in columns {
            indexer.add(column);
            bloom.insert(column.name());
        }
        indexer.finish(bloom)
    }

    /// Exact size of the encoded row with the given marker
    pub fn row_size(&self, deletion: Option<&DeletionInfo>) -> u64 {
        self.header.serialized_size() + deletion_size(deletion) + 4 + self.columns_size
    }

    /// Encode everything that precedes the first column
    pub(crate) fn encode_prefix(
        &self,
        deletion: Option<&DeletionInfo>,
        buf: &mut Vec<u8>,
    ) -> Result<()> {
        self.header.encode(buf)?;
        encode_deletion(deletion, buf);
        buf.extend_from_slice(&self.column_count.to_be_bytes());
        Ok(())
    }
}

// =============================================================================
// Row Reader
// =============================================================================

/// A row decoded back from its encoded form
#[derive(Debug)]
pub struct DeserializedRow {
    pub header: RowHeader,
    pub deletion: Option<DeletionInfo>,
    pub columns: Vec<Column>,
}

impl DeserializedRow {
    /// Decode a complete row as written by `CompactedRow::write`
    pub fn decode(row: impl Into<Bytes>) -> Result<Self> {
        let mut decoder = Decoder::new(row.into());

        let header = RowHeader::decode(&mut decoder)?;
        let deletion = decode_deletion(&mut decoder)?;
        let count = decoder.get_u32("column count")?;

        let mut columns = Vec::new();
        for _ in 0..count {
            columns.push(Column::decode(&mut decoder)?);
        }

        if decoder.remaining() != 0 {
            return Err(AtlasError::Corruption(format!(
                "{} trailing bytes after last column",
                decoder.remaining()
            )));
        }

        Ok(Self {
            header,
            deletion,
            columns,
        })
    }
}
