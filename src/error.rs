//! Error types for atlas-compaction
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using AtlasError
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Unified error type for compaction operations
#[derive(Debug, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Sink or file failure. Aborts the current partition.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Source Data Errors
    // -------------------------------------------------------------------------
    /// Malformed or inconsistent fragment / table data
    #[error("Corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Repair Errors
    // -------------------------------------------------------------------------
    /// Digest pass failure, fatal to the current validation
    #[error("Digest error: {0}")]
    Digest(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for AtlasError {
    fn from(e: bincode::Error) -> Self {
        AtlasError::Serialization(e.to_string())
    }
}
