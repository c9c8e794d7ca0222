use serde::{Deserialize, Serialize};

use crate::types::{Color, SessionId};

/// Errors returned by Session Engine operations.
///
/// Validation errors never mutate state. The enum is serializable so the
/// gateway can hand it to the calling client unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionError {
    #[error("session {session_id} not found")]
    SessionNotFound { session_id: SessionId },

    #[error("user is not a participant in this session")]
    NotInSession,

    #[error("not your turn - it is {expected}'s turn")]
    NotYourTurn { expected: Color },

    #[error("illegal move: {reason}")]
    IllegalMove { reason: String },

    #[error("session {session_id} already exists")]
    DuplicateSession { session_id: SessionId },

    #[error("timeout not corroborated: {remaining_secs}s remain on the server clock")]
    StaleTimeout { remaining_secs: u32 },

    #[error("session {session_id} has already finished")]
    SessionAlreadyFinished { session_id: SessionId },

    #[error("chess rules oracle unavailable: {reason}")]
    OracleUnavailable { reason: String },

    /// The client sent a frame that is not a valid command.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl SessionError {
    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::OracleUnavailable { .. })
    }
}

/// Errors raised by a Persistence Port backend.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("persistence backend error: {reason}")]
    Backend {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Errors raised by a Rating Port backend.
#[derive(Debug, thiserror::Error)]
pub enum RatingError {
    #[error("rating backend error: {reason}")]
    Backend { reason: String },
}

/// Configuration rejected by `ServerConfig::validate`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}
