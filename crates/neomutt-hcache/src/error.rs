//! Error types for the header cache.

use thiserror::Error;

/// Errors that can occur in header cache operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache name would escape the cache directory.
    #[error("Invalid cache name: {0}")]
    InvalidName(String),

    /// A raw entry had the wrong size for its type.
    #[error("Corrupt entry {key}: expected {expected} bytes, found {found}")]
    Corrupt {
        /// Key of the bad entry.
        key: String,
        /// Expected length.
        expected: usize,
        /// Actual length.
        found: usize,
    },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
