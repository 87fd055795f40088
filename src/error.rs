//! Error types for the matchmaking service
//!
//! All fallible operations return `anyhow::Result`; the variants below are
//! raised with `.into()` and can be recovered with `downcast_ref` when a
//! caller needs to tell them apart.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Invalid player event: {reason}")]
    InvalidPlayerEvent { reason: String },

    #[error("Player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("Persistence failed for {player_ids:?}: {message}")]
    PersistenceFailed {
        player_ids: Vec<String>,
        message: String,
    },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            MatchmakingError::AmqpConnectionFailed { .. } => "amqp",
            MatchmakingError::InvalidPlayerEvent { .. } => "validation",
            MatchmakingError::PlayerNotFound { .. } => "not_found",
            MatchmakingError::PersistenceFailed { .. } => "persistence",
            MatchmakingError::ConfigurationError { .. } => "configuration",
            MatchmakingError::InternalError { .. } => "internal",
        }
    }
}
