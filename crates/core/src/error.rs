//! Error types for the scid-sync system.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the scid-sync system.
#[derive(Error, Debug)]
pub enum Error {
    /// Corrupt or unsupported binary layout.
    #[error("Format error at byte offset {offset}: {reason}")]
    Format { offset: u64, reason: String },

    /// Invalid configuration (overlapping or missing contract windows, bad names).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store failure that may succeed when retried (timeout, busy, reset).
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Store failure that is not attributable to expected duplication.
    #[error("Persistent store error: {0}")]
    PersistentStore(String),

    /// Unreadable or partial checkpoint state. Requires operator action.
    #[error("Checkpoint corrupted at {}: {reason}", path.display())]
    CheckpointCorruption { path: PathBuf, reason: String },

    /// The run was cancelled at a state boundary.
    #[error("Cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a format error at the given byte offset.
    pub fn format(offset: u64, reason: impl Into<String>) -> Self {
        Error::Format {
            offset,
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a transient store error.
    pub fn transient_store(msg: impl Into<String>) -> Self {
        Error::TransientStore(msg.into())
    }

    /// Create a persistent store error.
    pub fn persistent_store(msg: impl Into<String>) -> Self {
        Error::PersistentStore(msg.into())
    }

    /// Create a checkpoint corruption error.
    pub fn checkpoint_corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CheckpointCorruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the operation that produced this error may be retried in place.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientStore(_))
    }
}
