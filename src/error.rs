//! Error types for the conversation synchronizer.

use thiserror::Error;

/// Main error type for synchronizer operations.
///
/// `Clone` so a single in-flight fetch result can be handed to every caller
/// waiting on it.
#[derive(Clone, Debug, Error)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Action failed: {0}")]
    Action(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unsupported event: {event} on {table}")]
    UnsupportedEvent { event: String, table: String },

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Session is not mounted")]
    NotMounted,

    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    #[error("Fetch abandoned before producing a result")]
    FetchAbandoned,
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

/// Result type for synchronizer operations.
pub type Result<T> = std::result::Result<T, SyncError>;
