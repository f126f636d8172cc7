//! Error types for BagStore core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Coarse classification of a [`CoreError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The bag cannot be set up: unusable store, bad configuration.
    Configuration,
    /// A read, write, decode or precondition failure on the data path.
    Storage,
    /// Index rebuild failed; the bag must not be considered open.
    FatalInitialization,
    /// The bag was closed or removed.
    Closed,
}

/// Errors that can occur in BagStore core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Record store or backend error.
    #[error("storage error: {0}")]
    Storage(#[from] bagstore_storage::StorageError),

    /// Entity payload could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The bag cannot be opened with the given setup.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// Operation not permitted with the given arguments.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// No record exists for this id.
    #[error("entity not found: {id}")]
    EntityNotFound {
        /// The id that was looked up.
        id: String,
    },

    /// A record already exists for this id.
    #[error("entity already exists: {id}")]
    EntityExists {
        /// The conflicting id.
        id: String,
    },

    /// A field value cannot be turned into an index key.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// A key or value header string is malformed.
    #[error("invalid header: {message}")]
    InvalidHeader {
        /// Description of the problem.
        message: String,
    },

    /// No index with this name exists on the bag.
    #[error("index not found: {name}")]
    IndexNotFound {
        /// Name of the index.
        name: String,
    },

    /// The index has no persisted definition.
    #[error("index definition not persisted: {name}")]
    IndexNotPersisted {
        /// Name of the index.
        name: String,
    },

    /// A unique index already maps this key to another entity.
    #[error("unique constraint violated on index {index} for key {key}")]
    UniqueViolation {
        /// Name of the index.
        index: String,
        /// Rendering of the conflicting key.
        key: String,
    },

    /// Rebuilding the indexes of a bag failed.
    #[error("index rebuild failed: {message}")]
    RebuildFailed {
        /// Description of the first failure.
        message: String,
    },

    /// The bag has been closed or removed.
    #[error("bag is closed")]
    BagClosed,

    /// Another process holds the instance directory.
    #[error("instance locked: another process has exclusive access")]
    InstanceLocked,
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Creates a rebuild failed error.
    pub fn rebuild_failed(message: impl Into<String>) -> Self {
        Self::RebuildFailed {
            message: message.into(),
        }
    }

    /// Classifies this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } | Self::InstanceLocked => ErrorKind::Configuration,
            Self::RebuildFailed { .. } => ErrorKind::FatalInitialization,
            Self::BagClosed => ErrorKind::Closed,
            _ => ErrorKind::Storage,
        }
    }
}
