//! Compaction Task
//!
//! Compacts several tables into one new table.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::table::{TableReader, TableWriter};

use super::{CompactionController, PartitionMerger};

/// Counters reported by a finished compaction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Partitions across all input tables (a key present in two tables counts twice)
    pub input_partitions: u64,
    /// Partitions written to the output table
    pub output_partitions: u64,
    /// Partitions that compacted to nothing
    pub dropped_partitions: u64,
    /// Partitions assembled from more than one input
    pub merged_partitions: u64,
    /// Rows streamed instead of merged in memory
    pub lazy_rows: u64,
    /// Rows written from page-cache resident fragments
    pub cached_rows: u64,
    /// Data block bytes written
    pub bytes_written: u64,
}

/// Compacts input tables into a single output table
pub struct CompactionTask<'c> {
    controller: &'c CompactionController,
}

impl<'c> CompactionTask<'c> {
    pub fn new(controller: &'c CompactionController) -> Self {
        Self { controller }
    }

    /// Merge every partition of `inputs` into a new table at `output`
    ///
    /// Inputs are read in key order; empty partitions are not written. On
    /// failure the partial output file is removed.
    pub fn compact(&self, inputs: &mut [TableReader], output: &Path) -> Result<CompactionStats> {
        let input_tables = inputs.len();

        match self.run(inputs, output) {
            Ok(stats) => {
                tracing::info!(
                    inputs = input_tables,
                    output = %output.display(),
                    partitions_in = stats.input_partitions,
                    partitions_out = stats.output_partitions,
                    dropped = stats.dropped_partitions,
                    lazy = stats.lazy_rows,
                    bytes = stats.bytes_written,
                    "Compaction finished"
                );
                Ok(stats)
            }
            Err(e) => {
                tracing::warn!(output = %output.display(), error = %e, "Compaction failed");
                let _ = fs::remove_file(output);
                Err(e)
            }
        }
    }

    fn run(&self, inputs: &mut [TableReader], output: &Path) -> Result<CompactionStats> {
        let mut stats = CompactionStats {
            input_partitions: inputs.iter().map(TableReader::partition_count).sum(),
            ..CompactionStats::default()
        };

        let row_limit = self.controller.in_memory_limit();
        let streams = inputs
            .iter_mut()
            .map(|reader| {
                reader.set_buffered_row_limit(row_limit);
                reader.iter()
            })
            .collect::<Result<Vec<_>>>()?;

        let mut writer = TableWriter::new(output)?;

        for partition in PartitionMerger::new(streams) {
            let (key, sources) = partition?;
            if sources.len() > 1 {
                stats.merged_partitions += 1;
            }

            let mut row = self.controller.compacted_row(&key, sources)?;
            if row.is_empty() {
                tracing::debug!(key = %key, "Dropping empty partition");
                stats.dropped_partitions += 1;
                continue;
            }

            if row.is_lazy() {
                stats.lazy_rows += 1;
            }
            if row.has_columns_in_page_cache() {
                stats.cached_rows += 1;
            }
            stats.bytes_written += writer.append(&mut row)?;
            stats.output_partitions += 1;
        }

        writer.finish()?;
        Ok(stats)
    }
}

/// Generate the file path for a table with the given generation
pub fn table_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("table_{:06}.atc", generation))
}

/// Parse the generation from a table filename
/// "table_000042.atc" → Some(42)
pub fn parse_generation(path: &Path) -> Option<u64> {
    if path.extension()? != "atc" {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    let generation = name.strip_prefix("table_")?;
    generation.parse().ok()
}
