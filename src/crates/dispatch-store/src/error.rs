//! Error types for the dispatch store

use thiserror::Error;

/// Convenience result type using [`StoreError`]
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the durable store and blob backends
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database connection or query failure
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// No backend registered for a storage type
    #[error("unknown storage backend '{0}'")]
    UnknownBackend(String),

    /// A blob address escapes the backend's base directory
    #[error("invalid storage path '{0}'")]
    InvalidPath(String),

    /// Filesystem failure in a blob backend
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// Miscellaneous store failure
    #[error("store error: {0}")]
    Other(String),
}
