//! Storage error taxonomy
//!
//! Corruption is recovered internally by resetting the affected structure
//! and never crosses an API boundary as a crash; capacity and disk faults
//! are surfaced synchronously before anything destructive happens.

use thiserror::Error;

/// Errors from the storage layer
#[derive(Debug, Error)]
pub enum StoreError {
    /// Checksum mismatch in a durable structure. Surfaced only where a
    /// caller explicitly asks about integrity; normal operations recover by
    /// resetting and logging instead of returning this.
    #[error("Corrupted {what}: {detail}")]
    Corruption { what: &'static str, detail: String },

    /// A configured ceiling was exceeded; the write was rejected up front
    #[error("Capacity exceeded for {what}: {actual} > {limit}")]
    Capacity { what: &'static str, limit: u64, actual: u64 },

    /// Free disk space below the configured buffer
    #[error("Insufficient disk space: {available} bytes available, {needed} required")]
    InsufficientDisk { needed: u64, available: u64 },

    /// Configuration could not be parsed
    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
