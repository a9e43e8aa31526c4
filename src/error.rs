//! Error types for the matchmaking service
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the application. Every variant maps to a stable wire code that is
//! sent to clients inside `game:error` events.

use crate::types::{GameId, QueueId};

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid join request: {reason}")]
    InvalidJoinRequest { reason: String },

    #[error("Unknown time control: {value}")]
    UnknownTimeControl { value: String },

    #[error("Duplicate queue id: {queue_id}")]
    DuplicateQueueId { queue_id: QueueId },

    #[error("Queue entry not found: {queue_id}")]
    QueueNotFound { queue_id: QueueId },

    #[error("Queue entry {queue_id} is not owned by this connection")]
    QueueNotOwned { queue_id: QueueId },

    #[error("Game not found: {game_id}")]
    GameNotFound { game_id: GameId },

    #[error("Unauthorized: {reason}")]
    Unauthorized { reason: String },

    #[error("Persistence failed: {message}")]
    PersistenceFailed { message: String },

    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Wire code reported to clients in `game:error` payloads
    pub fn code(&self) -> &'static str {
        match self {
            MatchmakingError::InvalidJoinRequest { .. }
            | MatchmakingError::UnknownTimeControl { .. } => "VALIDATION_FAILED",
            MatchmakingError::DuplicateQueueId { .. } => "DUPLICATE_QUEUE_ID",
            MatchmakingError::QueueNotFound { .. } => "QUEUE_NOT_FOUND",
            MatchmakingError::QueueNotOwned { .. } => "QUEUE_NOT_OWNED",
            MatchmakingError::GameNotFound { .. } => "GAME_NOT_FOUND",
            MatchmakingError::Unauthorized { .. } => "UNAUTHORIZED",
            MatchmakingError::PersistenceFailed { .. } => "MATCH_FAILED",
            MatchmakingError::AmqpConnectionFailed { .. }
            | MatchmakingError::ConfigurationError { .. }
            | MatchmakingError::InternalError { .. } => "INTERNAL_ERROR",
        }
    }
}

/// Resolve the wire code for any error flowing out of the engine
pub fn error_code(error: &anyhow::Error) -> &'static str {
    error
        .downcast_ref::<MatchmakingError>()
        .map(MatchmakingError::code)
        .unwrap_or("INTERNAL_ERROR")
}
