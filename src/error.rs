//! Error types for the safety core.
//!
//! Errors fall into three kinds the caller must distinguish: validation
//! failures (malformed input, no action attempted), storage failures (I/O or
//! database errors, fatal for the current operation), and not-found lookups.
//! Policy denials are never errors — they are ordinary `Decision` values.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type SamResult<T> = Result<T, SamError>;

#[derive(Debug, Error)]
pub enum SamError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("path contains a null byte: {0:?}")]
    NullByteInPath(PathBuf),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("project-local permissions override at {path:?} is malformed: {source}")]
    InvalidOverride {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SamError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
