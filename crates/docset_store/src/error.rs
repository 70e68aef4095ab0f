//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A unique index rejected a write.
    #[error("duplicate key in {collection}.{index}: {key}")]
    DuplicateKey {
        /// Collection the write targeted.
        collection: String,
        /// Name of the violated index.
        index: String,
        /// Rendered key that collided.
        key: String,
    },

    /// A filter document could not be parsed or evaluated.
    #[error("invalid filter: {message}")]
    InvalidFilter {
        /// Description of the problem.
        message: String,
    },

    /// A document identifier could not be parsed.
    #[error("invalid document id: {value}")]
    InvalidId {
        /// The rejected input.
        value: String,
    },

    /// A document is missing its `_id` or has the wrong shape.
    #[error("invalid document: {message}")]
    InvalidDocument {
        /// Description of the problem.
        message: String,
    },

    /// The session was already committed or aborted.
    #[error("session {id} is {state}")]
    SessionClosed {
        /// Session number.
        id: u64,
        /// Terminal state name.
        state: &'static str,
    },

    /// A savepoint was restored into a session it was not taken from.
    #[error("savepoint of session {savepoint} restored into session {session}")]
    ForeignSavepoint {
        /// Session the savepoint was taken from.
        savepoint: u64,
        /// Session it was restored into.
        session: u64,
    },

    /// The snapshot on disk is damaged.
    #[error("snapshot corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the data directory.
    #[error("data directory locked: another process has exclusive access")]
    Locked,

    /// Snapshot encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an invalid filter error.
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            message: message.into(),
        }
    }

    /// Creates an invalid document error.
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns true if this error is a unique index violation.
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }
}
