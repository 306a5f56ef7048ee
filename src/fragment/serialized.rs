//! Serialized fragment
//!
//! A partition read back from a compacted table file. The row marker is
//! decoded up front; columns are decoded one at a time as the merge asks for
//! them. Small rows are held in memory. Large rows stay in their table file
//! and are read through a positioned reader that is opened on first use.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::codec::{Decoder, RowRead, RowStream};
use crate::column::{decode_deletion, Column, DeletionInfo};
use crate::error::{AtlasError, Result};
use crate::row::RowHeader;

use super::FragmentSource;

/// Where the encoded row lives
#[derive(Debug)]
enum Backing {
    /// Whole row held in memory
    Buffered(Decoder),

    /// Row left at `offset..offset + len` of a table file
    File {
        path: PathBuf,
        offset: u64,
        len: u64,
        stream: Option<RowStream<BufReader<File>>>,
    },
}

impl Backing {
    /// Cursor position relative to the start of the row
    fn position(&self, columns_start: u64) -> u64 {
        match self {
            Backing::Buffered(decoder) => decoder.position() as u64,
            Backing::File {
                stream: Some(stream),
                ..
            } => stream.position(),
            Backing::File { stream: None, .. } => columns_start,
        }
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        match self {
            Backing::Buffered(decoder) => {
                decoder.seek(pos as usize);
                Ok(())
            }
            Backing::File {
                stream: Some(stream),
                ..
            } => stream.seek(pos),
            // Opened at the first column when next read
            Backing::File { stream: None, .. } => Ok(()),
        }
    }

    fn decode_column(&mut self, columns_start: u64) -> Result<Column> {
        match self {
            Backing::Buffered(decoder) => Column::decode(decoder),
            Backing::File {
                path,
                offset,
                len,
                stream,
            } => {
                let opened = match stream.take() {
                    Some(opened) => opened,
                    None => {
                        let file = BufReader::new(File::open(&*path)?);
                        let mut opened = RowStream::new(file, *offset, *len)?;
                        opened.seek(columns_start)?;
                        opened
                    }
                };
                Column::decode(stream.insert(opened))
            }
        }
    }
}

/// Fragment decoding columns from an encoded row
#[derive(Debug)]
pub struct SerializedFragment {
    backing: Backing,
    deletion: Option<DeletionInfo>,
    /// Offset of the first column within the row
    columns_start: u64,
    column_count: u32,
    /// Columns left before the cursor is exhausted
    remaining: u32,
    size: u64,
    cached: bool,
    /// Set after a decode error so it is reported once
    poisoned: bool,
}

impl SerializedFragment {
    /// Parse the row prefix of `row` (as produced by `CompactedRow::write`)
    pub fn new(row: Bytes) -> Result<Self> {
        let size = row.len() as u64;
        let mut decoder = Decoder::new(row);
        let (deletion, column_count) = decode_prefix(&mut decoder)?;
        let columns_start = decoder.position() as u64;

        Ok(Self::with_backing(
            Backing::Buffered(decoder),
            deletion,
            columns_start,
            column_count,
            size,
        ))
    }

    /// Parse the prefix of the row stored at `offset..offset + len` of the
    /// table at `path`, leaving the columns on disk
    ///
    /// `reader` must be a handle on the same file; its position is left
    /// somewhere inside the row.
    pub(crate) fn from_file<R: Read + Seek>(
        reader: &mut R,
        path: &Path,
        offset: u64,
        len: u64,
    ) -> Result<Self> {
        let mut stream = RowStream::new(reader, offset, len)?;
        let (deletion, column_count) = decode_prefix(&mut stream)?;
        let columns_start = stream.position();

        let backing = Backing::File {
            path: path.to_path_buf(),
            offset,
            len,
            stream: None,
        };
        Ok(Self::with_backing(
            backing,
            deletion,
            columns_start,
            column_count,
            len,
        ))
    }

    fn with_backing(
        backing: Backing,
        deletion: Option<DeletionInfo>,
        columns_start: u64,
        column_count: u32,
        size: u64,
    ) -> Self {
        Self {
            backing,
            deletion,
            columns_start,
            column_count,
            remaining: column_count,
            size,
            cached: false,
            poisoned: false,
        }
    }

    /// Mark the fragment's data as page-cache resident
    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    /// Number of columns encoded in the row
    pub fn column_count(&self) -> u32 {
        self.column_count
    }

    /// Whether columns are read from the table file rather than memory
    pub fn is_file_backed(&self) -> bool {
        matches!(self.backing, Backing::File { .. })
    }

    fn advance(&mut self) -> Option<Result<Column>> {
        if self.remaining == 0 {
            let trailing = self
                .size
                .saturating_sub(self.backing.position(self.columns_start));
            if trailing != 0 {
                return Some(Err(AtlasError::Corruption(format!(
                    "{} trailing bytes after last column",
                    trailing
                ))));
            }
            return None;
        }

        self.remaining -= 1;
        Some(self.backing.decode_column(self.columns_start))
    }
}

/// Step over the row header and decode the row marker and column count
fn decode_prefix<D: RowRead>(decoder: &mut D) -> Result<(Option<DeletionInfo>, u32)> {
    RowHeader::skip(decoder)?;
    let deletion = decode_deletion(decoder)?;
    let column_count = decoder.get_u32("column count")?;
    Ok((deletion, column_count))
}

impl FragmentSource for SerializedFragment {
    fn deletion_info(&self) -> Option<DeletionInfo> {
        self.deletion
    }

    fn next_column(&mut self) -> Option<Result<Column>> {
        if self.poisoned {
            return None;
        }
        let next = self.advance();
        if matches!(next, Some(Err(_))) {
            self.poisoned = true;
        }
        next
    }

    fn rewind(&mut self) -> Result<()> {
        self.backing.seek(self.columns_start)?;
        self.remaining = self.column_count;
        self.poisoned = false;
        Ok(())
    }

    fn is_cached(&self) -> bool {
        self.cached
    }

    fn serialized_size(&self) -> u64 {
        self.size
    }

    fn buffered_size(&self) -> u64 {
        match self.backing {
            Backing::Buffered(_) => self.size,
            Backing::File { .. } => 0,
        }
    }
}
