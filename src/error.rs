//! Error surface of the coordination layer.

use thiserror::Error;
use validator::ValidationErrors;

use crate::store::StoreError;

/// Result alias for coordination-layer operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors surfaced by the coordination layer.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Underlying document store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    /// The session document is gone, deleted or never created.
    #[error("session `{session_id}` no longer exists")]
    SessionGone {
        /// Id of the missing session document.
        session_id: String,
    },
    /// A participant outside the roster tried to join after phase 1 started.
    #[error("participant `{user_id}` cannot join session `{session_id}` after the match started")]
    LateJoin {
        /// Id of the session being joined.
        session_id: String,
        /// Id of the rejected participant.
        user_id: String,
    },
    /// Operation is not valid in the current session state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Policy knobs are inconsistent with each other.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Join parameters failed validation.
    #[error("invalid parameters: {0}")]
    InvalidParams(#[from] ValidationErrors),
    /// Session document or patch payload could not be (de)serialized.
    #[error("document encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Store(err) if err.is_transient())
    }

    /// Shorthand for the missing-session error.
    pub fn session_gone(session_id: impl Into<String>) -> Self {
        SyncError::SessionGone {
            session_id: session_id.into(),
        }
    }
}
