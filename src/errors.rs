//! Error types for sg-tree.

use thiserror::Error;

/// Top-level error type for tree construction and serialization.
#[derive(Debug, Error)]
pub enum SgTreeError {
    /// Serialized buffer ended before a complete record could be read.
    #[error("serialized buffer truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Serialized buffer is structurally inconsistent.
    #[error("corrupt serialized tree: {0}")]
    Corrupt(String),

    /// Bulk construction was handed an empty matrix.
    #[error("matrix must contain at least one row")]
    EmptyInput,

    /// Bulk construction was handed a UID slice of the wrong length.
    #[error("expected {expected} UIDs, got {actual}")]
    UidMismatch { expected: usize, actual: usize },

    /// Worker pool for bulk construction could not be created.
    #[error("thread pool error: {0}")]
    ThreadPool(String),

    /// I/O error wrapper (tree dumps).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sg-tree operations.
pub type Result<T> = std::result::Result<T, SgTreeError>;
