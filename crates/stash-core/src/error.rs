//! Error types for stash-core

use thiserror::Error;

use crate::models::ConflictRecord;

/// Result type alias using stash-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stash-core operations
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

    /// Document not found
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network or server failure talking to the remote store.
    ///
    /// Retried with backoff and then queued; never means data loss.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Compare-and-swap predicate mismatch. Only the user can resolve it.
    #[error(
        "Revision conflict on {}: local revision {}, server revision {}",
        .0.document_id,
        .0.current_revision,
        .0.server_revision.map_or_else(|| "unknown".to_string(), |revision| revision.to_string())
    )]
    Conflict(ConflictRecord),

    /// Secondary record rejected the propagated fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// A background task has already shut down
    #[error("Shut down: {0}")]
    Shutdown(String),
}

impl Error {
    /// Whether this failure should be retried and, after that, queued.
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether this failure is a revision conflict.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}
