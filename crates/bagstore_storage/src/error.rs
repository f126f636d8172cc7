//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by backends and record stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a backend.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current backend size.
        size: u64,
    },

    /// A record frame failed validation.
    #[error("record log corrupted: {0}")]
    Corrupted(String),

    /// The record store has been closed or removed.
    #[error("record store is closed")]
    Closed,

    /// A record with this key already exists.
    #[error("record already exists: {key}")]
    RecordExists {
        /// Primary key of the record.
        key: String,
    },

    /// No live record exists for this key.
    #[error("record not found: {key}")]
    RecordNotFound {
        /// Primary key of the record.
        key: String,
    },

    /// The key extraction callback failed during verification.
    #[error("unable to extract primary key at offset {offset}: {message}")]
    KeyExtraction {
        /// Offset of the offending frame.
        offset: u64,
        /// Description of the failure.
        message: String,
    },
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }

    /// Creates an invalid-input I/O error.
    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::Io(io::Error::new(io::ErrorKind::InvalidInput, message.into()))
    }
}
