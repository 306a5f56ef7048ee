//! Row codec helpers
//!
//! Big-endian decoding of encoded rows, either over a shared buffer or
//! straight from a positioned file. Every read is bounds checked against the
//! row; running off the end is reported as corruption, since the bytes always
//! came from a table file or a fragment source.

use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;

use crate::error::{AtlasError, Result};

fn incomplete(what: &str, expected: u64, got: u64) -> AtlasError {
    AtlasError::Corruption(format!(
        "Incomplete {}: expected {} bytes, got {}",
        what, expected, got
    ))
}

/// Bounded big-endian reads over one encoded row
pub(crate) trait RowRead {
    /// Read exactly `N` bytes
    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]>;

    /// Read the next `len` bytes
    fn take(&mut self, len: usize, what: &str) -> Result<Bytes>;

    /// Step over the next `len` bytes without reading them
    fn skip(&mut self, len: u64, what: &str) -> Result<()>;

    fn get_u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.array::<1>(what)?[0])
    }

    fn get_u16(&mut self, what: &str) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array(what)?))
    }

    fn get_u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array(what)?))
    }

    fn get_u64(&mut self, what: &str) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array(what)?))
    }

    fn get_i64(&mut self, what: &str) -> Result<i64> {
        Ok(i64::from_be_bytes(self.array(what)?))
    }

    /// Read a u16 length prefix followed by that many bytes
    fn get_short_bytes(&mut self, what: &str) -> Result<Bytes> {
        let len = self.get_u16(what)? as usize;
        self.take(len, what)
    }
}

/// Positioned reader over an immutable row buffer
#[derive(Debug, Clone)]
pub(crate) struct Decoder {
    data: Bytes,
    pos: usize,
}

impl Decoder {
    pub(crate) fn new(data: Bytes) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }
}

impl RowRead for Decoder {
    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        if self.remaining() < N {
            return Err(incomplete(what, N as u64, self.remaining() as u64));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    /// Slices the shared buffer without copying
    fn take(&mut self, len: usize, what: &str) -> Result<Bytes> {
        if self.remaining() < len {
            return Err(incomplete(what, len as u64, self.remaining() as u64));
        }
        let bytes = self.data.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(bytes)
    }

    fn skip(&mut self, len: u64, what: &str) -> Result<()> {
        if (self.remaining() as u64) < len {
            return Err(incomplete(what, len, self.remaining() as u64));
        }
        self.pos += len as usize;
        Ok(())
    }
}

// =============================================================================
// File-backed Rows
// =============================================================================

/// Positioned reader over one row stored at `base..base + len` of a file
///
/// Positions are relative to the start of the row. Only the value being
/// decoded is held in memory.
#[derive(Debug)]
pub(crate) struct RowStream<R> {
    reader: R,
    base: u64,
    pos: u64,
    len: u64,
}

impl<R: Read + Seek> RowStream<R> {
    pub(crate) fn new(mut reader: R, base: u64, len: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(base))?;
        Ok(Self {
            reader,
            base,
            pos: 0,
            len,
        })
    }

    pub(crate) fn position(&self) -> u64 {
        self.pos
    }

    pub(crate) fn remaining(&self) -> u64 {
        self.len.saturating_sub(self.pos)
    }

    pub(crate) fn seek(&mut self, pos: u64) -> Result<()> {
        self.reader.seek(SeekFrom::Start(self.base + pos))?;
        self.pos = pos;
        Ok(())
    }

    fn ensure(&self, len: u64, what: &str) -> Result<()> {
        if self.remaining() < len {
            return Err(incomplete(what, len, self.remaining()));
        }
        Ok(())
    }
}

impl<R: Read + Seek> RowRead for RowStream<R> {
    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        self.ensure(N as u64, what)?;
        let mut out = [0u8; N];
        self.reader.read_exact(&mut out)?;
        self.pos += N as u64;
        Ok(out)
    }

    fn take(&mut self, len: usize, what: &str) -> Result<Bytes> {
        self.ensure(len as u64, what)?;
        let mut out = vec![0u8; len];
        self.reader.read_exact(&mut out)?;
        self.pos += len as u64;
        Ok(Bytes::from(out))
    }

    fn skip(&mut self, len: u64, what: &str) -> Result<()> {
        self.ensure(len, what)?;
        self.seek(self.pos + len)
    }
}

/// Append a u16 length-prefixed byte string
pub(crate) fn put_short_bytes(out: &mut Vec<u8>, bytes: &[u8], what: &str) -> Result<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| {
        AtlasError::Serialization(format!(
            "{} too long: {} bytes (max {})",
            what,
            bytes.len(),
            u16::MAX
        ))
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}
