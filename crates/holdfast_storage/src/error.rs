//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in the backing store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite error from the backing database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of a stored blob.
    #[error("read beyond end of blob: offset {offset}, len {len}, blob size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: usize,
        /// The requested read length.
        len: usize,
        /// The stored blob size.
        size: usize,
    },

    /// A referenced row does not exist.
    #[error("row not found: {0}")]
    RowNotFound(String),

    /// The backing store is corrupted or unreadable.
    #[error("backing store corrupted: {0}")]
    Corrupted(String),

    /// The backing store has been closed.
    #[error("backing store is closed")]
    Closed,
}
