//! Repair Validation
//!
//! Digest-only compaction pass used by anti-entropy repair. Every partition of
//! a set of tables is compacted exactly as a real compaction would, but
//! instead of being written each row is folded into a SHA-256 digest. Two
//! replicas holding the same logical data produce the same digests no matter
//! how that data is split across their table files.
//!
//! ## Concurrency
//! Partitions are read sequentially, then digested in batches on scoped
//! worker threads. Each worker owns the fragments of its partitions. A batch
//! is closed once it holds `BATCH_PARTITIONS` partitions or `BATCH_BYTES` of
//! buffered fragment data; rows above the in-memory limit are read from their
//! table files and count for nothing.

use sha2::{Digest, Sha256};

use crate::compaction::{CompactionController, PartitionFragments, PartitionMerger};
use crate::error::{AtlasError, Result};
use crate::key::DecoratedKey;
use crate::table::TableReader;

/// Partitions read before a batch is handed to the workers
const BATCH_PARTITIONS: usize = 1024;

/// Buffered fragment bytes read before a batch is handed to the workers
const BATCH_BYTES: u64 = 64 * 1024 * 1024;

/// Digest of one non-empty partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDigest {
    pub key: DecoratedKey,
    pub digest: [u8; 32],
}

impl PartitionDigest {
    pub fn hex(&self) -> String {
        hex::encode(self.digest)
    }
}

/// Result of a validation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Digests of non-empty partitions in key order
    pub partitions: Vec<PartitionDigest>,
    /// Digest over every partition's key and digest, in key order
    pub root: [u8; 32],
    /// Partitions that compacted to nothing and were left out
    pub skipped: u64,
}

impl ValidationReport {
    pub fn root_hex(&self) -> String {
        hex::encode(self.root)
    }
}

/// Computes repair digests over compacted rows
pub struct Validator<'c> {
    controller: &'c CompactionController,
    threads: usize,
}

impl<'c> Validator<'c> {
    pub fn new(controller: &'c CompactionController, threads: usize) -> Self {
        Self {
            controller,
            threads: threads.max(1),
        }
    }

    /// Digest every partition of `inputs`
    pub fn validate(&self, inputs: &mut [TableReader]) -> Result<ValidationReport> {
        let row_limit = self.controller.in_memory_limit();
        let streams = inputs
            .iter_mut()
            .map(|reader| {
                reader.set_buffered_row_limit(row_limit);
                reader.iter()
            })
            .collect::<Result<Vec<_>>>()?;

        let mut partitions = Vec::new();
        let mut skipped = 0;
        let mut batch = Vec::new();
        let mut batch_bytes = 0u64;

        for partition in PartitionMerger::new(streams) {
            let (key, sources) = partition?;
            batch_bytes += sources.iter().map(|s| s.buffered_size()).sum::<u64>();
            batch.push((key, sources));

            if batch.len() >= BATCH_PARTITIONS || batch_bytes >= BATCH_BYTES {
                skipped += self.digest_batch(std::mem::take(&mut batch), &mut partitions)?;
                batch_bytes = 0;
            }
        }
        skipped += self.digest_batch(batch, &mut partitions)?;

        let report = finish_report(partitions, skipped);
        tracing::info!(
            tables = inputs.len(),
            partitions = report.partitions.len(),
            skipped = report.skipped,
            root = %report.root_hex(),
            "Validation finished"
        );
        Ok(report)
    }

    /// Digest partitions that are already grouped by key
    ///
    /// `partitions` must be in ascending key order.
    pub fn digest_partitions(&self, partitions: Vec<PartitionFragments>) -> Result<ValidationReport> {
        let mut digests = Vec::with_capacity(partitions.len());
        let skipped = self.digest_batch(partitions, &mut digests)?;
        Ok(finish_report(digests, skipped))
    }

    /// Digest one batch in parallel, appending results in input order.
    /// Returns the number of empty partitions.
    fn digest_batch(
        &self,
        batch: Vec<PartitionFragments>,
        out: &mut Vec<PartitionDigest>,
    ) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let chunk_size = batch.len().div_ceil(self.threads);
        let mut chunks: Vec<Vec<PartitionFragments>> = Vec::with_capacity(self.threads);
        let mut rest = batch.into_iter().peekable();
        while rest.peek().is_some() {
            chunks.push(rest.by_ref().take(chunk_size).collect());
        }

        let controller = self.controller;
        let results = crossbeam::thread::scope(|scope| {
            let handles: Vec<_> = chunks
                .into_iter()
                .map(|chunk| scope.spawn(move |_| digest_chunk(controller, chunk)))
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(AtlasError::Digest("Validation worker panicked".to_string()))
                    })
                })
                .collect::<Vec<_>>()
        })
        .map_err(|_| AtlasError::Digest("Validation scope panicked".to_string()))?;

        let mut skipped = 0;
        for result in results {
            let (digests, empty) = result?;
            out.extend(digests);
            skipped += empty;
        }
        Ok(skipped)
    }
}

/// Compact and digest a run of partitions on the current thread
fn digest_chunk(
    controller: &CompactionController,
    chunk: Vec<PartitionFragments>,
) -> Result<(Vec<PartitionDigest>, u64)> {
    let mut digests = Vec::with_capacity(chunk.len());
    let mut skipped = 0;

    for (key, sources) in chunk {
        let digest = {
            let mut row = controller.compacted_row(&key, sources)?;
            if row.is_empty() {
                None
            } else {
                let mut hasher = Sha256::new();
                row.update(&mut hasher)?;
                let mut digest = [0u8; 32];
                digest.copy_from_slice(&hasher.finalize());
                Some(digest)
            }
        };

        match digest {
            Some(digest) => digests.push(PartitionDigest { key, digest }),
            None => skipped += 1,
        }
    }

    Ok((digests, skipped))
}

fn finish_report(partitions: Vec<PartitionDigest>, skipped: u64) -> ValidationReport {
    let mut hasher = Sha256::new();
    for partition in &partitions {
        let key = partition.key.key();
        hasher.update(partition.key.token().to_be_bytes());
        hasher.update((key.len() as u32).to_be_bytes());
        hasher.update(key);
        hasher.update(partition.digest);
    }

    let mut root = [0u8; 32];
    root.copy_from_slice(&hasher.finalize());

    ValidationReport {
        partitions,
        root,
        skipped,
    }
}
