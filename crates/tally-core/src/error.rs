//! Error types for tally-core

use thiserror::Error;

/// Result type alias using tally-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tally-core store operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The on-disk schema is newer than this build understands
    #[error("Incompatible schema version {found} (this build supports up to {supported})")]
    IncompatibleSchema {
        /// Version recorded in the store
        found: i32,
        /// Highest version this build can migrate to
        supported: i32,
    },
}

impl Error {
    /// Whether this error means the store can never be opened by this build.
    pub const fn is_incompatible_schema(&self) -> bool {
        matches!(self, Self::IncompatibleSchema { .. })
    }
}
