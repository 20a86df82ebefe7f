//! Error types for heatwatch-store.

use std::path::PathBuf;

/// Result type for heatwatch-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in heatwatch-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error from SQLite.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to create database directory.
    #[error("Failed to create database directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A timestamp or bucket boundary could not be represented.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The database was written with a schema this build does not know.
    #[error("Unsupported schema version {found} (supported: {supported})")]
    UnsupportedSchema { found: i32, supported: i32 },

    /// An update targeted an episode row that does not exist or is already closed.
    #[error("No open {kind} episode with id {id}")]
    EpisodeNotFound { kind: &'static str, id: i64 },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<time::error::ComponentRange> for Error {
    fn from(err: time::error::ComponentRange) -> Self {
        Error::InvalidTimestamp(err.to_string())
    }
}
