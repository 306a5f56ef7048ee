//! Configuration for atlas-compaction
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{AtlasError, Result};

/// Main configuration for a compaction run
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory compacted tables are written to
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Row Emission Configuration
    // -------------------------------------------------------------------------
    /// Partitions whose fragments total more than this many bytes are
    /// compacted lazily (streamed) instead of merged in memory
    pub in_memory_compaction_limit: u64,

    /// Bytes of column data covered by one column index entry
    pub column_index_size: u64,

    /// Target false positive rate of the per-row column bloom filter
    pub bloom_fp_rate: f64,

    // -------------------------------------------------------------------------
    // Tombstone Configuration
    // -------------------------------------------------------------------------
    /// Seconds a tombstone is kept before it may be purged
    pub gc_grace_seconds: u32,

    // -------------------------------------------------------------------------
    // Repair Configuration
    // -------------------------------------------------------------------------
    /// Worker threads used to digest partitions during validation
    pub validation_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./atlaskv_data"),
            in_memory_compaction_limit: 64 * 1024 * 1024, // 64 MB
            column_index_size: 64 * 1024,                 // 64 KB
            bloom_fp_rate: 0.01,
            gc_grace_seconds: 864_000, // 10 days
            validation_threads: 4,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the row format cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.column_index_size == 0 {
            return Err(AtlasError::Config(
                "column_index_size must be greater than zero".to_string(),
            ));
        }
        if !(self.bloom_fp_rate > 0.0 && self.bloom_fp_rate < 1.0) {
            return Err(AtlasError::Config(format!(
                "bloom_fp_rate must be in (0, 1), got {}",
                self.bloom_fp_rate
            )));
        }
        if self.validation_threads == 0 {
            return Err(AtlasError::Config(
                "validation_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the output directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the lazy compaction threshold (in bytes)
    pub fn in_memory_compaction_limit(mut self, bytes: u64) -> Self {
        self.config.in_memory_compaction_limit = bytes;
        self
    }

    /// Set the column index block size (in bytes)
    pub fn column_index_size(mut self, bytes: u64) -> Self {
        self.config.column_index_size = bytes;
        self
    }

    /// Set the bloom filter false positive rate
    pub fn bloom_fp_rate(mut self, rate: f64) -> Self {
        self.config.bloom_fp_rate = rate;
        self
    }

    /// Set the tombstone grace period (in seconds)
    pub fn gc_grace_seconds(mut self, seconds: u32) -> Self {
        self.config.gc_grace_seconds = seconds;
        self
    }

    /// Set the number of validation worker threads
    pub fn validation_threads(mut self, count: usize) -> Self {
        self.config.validation_threads = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
