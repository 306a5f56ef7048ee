//! Output sinks
//!
//! Compacted rows write into a `PageCacheInformer`: a byte sink that knows its
//! position and keeps track of which written ranges came from page-cache
//! resident data, so the caller can keep those ranges hot after compaction.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::ops::Range;
use std::path::Path;

use crate::error::{AtlasError, Result};

/// Byte sink with page-cache residency bookkeeping
pub trait PageCacheInformer: Write {
    /// Bytes written so far
    fn position(&self) -> u64;

    /// Record that `start..end` holds data that was page-cache resident
    fn keep_cached(&mut self, start: u64, end: u64);

    /// Whether `start..end` lies inside a range recorded as resident.
    /// Empty ranges are never reported as cached.
    fn is_cached(&self, start: u64, end: u64) -> bool;
}

/// Sorted, coalesced set of byte ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedRanges {
    ranges: Vec<Range<u64>>,
}

impl CachedRanges {
    pub fn insert(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        self.ranges.push(start..end);
        self.ranges.sort_by_key(|r| r.start);

        let mut coalesced: Vec<Range<u64>> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            match coalesced.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => coalesced.push(range),
            }
        }
        self.ranges = coalesced;
    }

    pub fn contains(&self, start: u64, end: u64) -> bool {
        start < end
            && self
                .ranges
                .iter()
                .any(|r| r.start <= start && end <= r.end)
    }

    /// Total bytes covered
    pub fn cached_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    pub fn ranges(&self) -> &[Range<u64>] {
        &self.ranges
    }
}

// =============================================================================
// File Sink
// =============================================================================

/// Buffered file sink that checksums everything written through it
pub struct FileSink {
    writer: BufWriter<File>,
    position: u64,
    hasher: crc32fast::Hasher,
    cached: CachedRanges,
}

impl FileSink {
    /// Create (or truncate) the file at `path`
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            position: 0,
            hasher: crc32fast::Hasher::new(),
            cached: CachedRanges::default(),
        })
    }

    /// CRC32 of every byte written so far
    pub fn checksum(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    /// Restart the checksum (the next bytes start a new checksummed section)
    pub fn reset_checksum(&mut self) {
        self.hasher = crc32fast::Hasher::new();
    }

    pub fn cached_ranges(&self) -> &CachedRanges {
        &self.cached
    }

    /// Flush buffered bytes and hand back the file
    pub fn into_file(self) -> Result<File> {
        self.writer
            .into_inner()
            .map_err(|e| AtlasError::Storage(format!("Failed to flush sink: {}", e)))
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.writer.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.position += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl PageCacheInformer for FileSink {
    fn position(&self) -> u64 {
        self.position
    }

    fn keep_cached(&mut self, start: u64, end: u64) {
        self.cached.insert(start, end);
    }

    fn is_cached(&self, start: u64, end: u64) -> bool {
        self.cached.contains(start, end)
    }
}

// =============================================================================
// Memory Sink
// =============================================================================

/// Sink collecting bytes in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    buffer: Vec<u8>,
    cached: CachedRanges,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    pub fn cached_ranges(&self) -> &CachedRanges {
        &self.cached
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl PageCacheInformer for MemorySink {
    fn position(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn keep_cached(&mut self, start: u64, end: u64) {
        self.cached.insert(start, end);
    }

    fn is_cached(&self, start: u64, end: u64) -> bool {
        self.cached.contains(start, end)
    }
}
