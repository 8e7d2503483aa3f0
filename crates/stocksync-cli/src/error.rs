use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] stocksync_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("{kind} not found for id/prefix: {query}")]
    NotFound { kind: &'static str, query: String },
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Nothing to update; pass --name, --qty or --price")]
    NoChanges,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("`{0}` needs the remote; run it without --offline")]
    OfflineMode(&'static str),
    #[error("Sync did not complete: {0}")]
    SyncIncomplete(String),
}
