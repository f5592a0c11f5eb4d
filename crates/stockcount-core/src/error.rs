//! Error types for stockcount-core

use thiserror::Error;

/// Result type alias using stockcount-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stockcount-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local storage is exhausted; the mutation was not queued
    #[error("Offline queue is full: local storage is exhausted")]
    QueueFull,

    /// Mutation payload cannot be serialized or replayed
    #[error("Malformed mutation: {0}")]
    MalformedMutation(String),

    /// A blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    StorageTask(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid settings
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Map a raw `SQLite` error, turning `SQLITE_FULL` into [`Error::QueueFull`].
    pub(crate) fn from_storage(error: rusqlite::Error) -> Self {
        if is_storage_full(&error) {
            Self::QueueFull
        } else {
            Self::Database(error)
        }
    }
}

fn is_storage_full(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::DiskFull
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_full_maps_to_queue_full() {
        let raw = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
            Some("database or disk is full".to_string()),
        );
        assert!(matches!(Error::from_storage(raw), Error::QueueFull));
    }

    #[test]
    fn other_failures_stay_database_errors() {
        let raw = rusqlite::Error::QueryReturnedNoRows;
        assert!(matches!(Error::from_storage(raw), Error::Database(_)));
    }
}
