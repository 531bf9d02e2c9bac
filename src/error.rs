//! Error types for the cache storage engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// An argument failed validation before any storage was touched.
    #[error("invalid argument: {0}")]
    BadArgument(&'static str),

    /// The manifest database is unavailable: either the open-retry budget is
    /// exhausted or the backoff window since the last failure has not elapsed.
    #[error("manifest database unavailable")]
    Unavailable,

    /// Blob file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The manifest database rejected a statement.
    #[error("manifest error: {0}")]
    Index(#[from] rusqlite::Error),

    /// The cache root path is too long to leave room for nested blob names.
    #[error("cache root path too long: {}", .0.display())]
    PathTooLong(PathBuf),

    /// The manifest could not be recovered by resetting on-disk state.
    #[error("manifest reset failed: {0}")]
    Reset(String),
}

/// Result type for cache operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
