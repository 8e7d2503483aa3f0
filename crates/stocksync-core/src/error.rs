//! Error types for stocksync-core

use thiserror::Error;

/// Result type alias using stocksync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in stocksync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The local store was closed
    #[error("Local store is closed")]
    StoreClosed,

    /// Document already exists locally
    #[error("Document already exists: {0}")]
    ConstraintViolation(String),

    /// Document not found (locally or on the remote)
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Network or connection failure talking to the remote
    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    /// Remote rejected the configured credentials
    #[error("Remote authentication failed: {0}")]
    AuthFailed(String),

    /// Revision mismatch on a remote write
    #[error("Revision conflict: {0}")]
    Conflict(String),

    /// Unexpected remote response
    #[error("Remote error: {0}")]
    Remote(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the error means the remote could not be talked to at all.
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Whether the error is a revision conflict on a remote write.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
