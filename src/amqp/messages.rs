//! AMQP message definitions and serialization

use crate::error::{MatchmakingError, Result};
use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_json;

/// Default queue player-state events are consumed from
pub const PLAYER_EVENTS_QUEUE: &str = "matchmaking.player_events";
/// Default exchange outcomes are published to
pub const MATCH_EVENTS_EXCHANGE: &str = "matchmaking.match_events";

/// Routing keys for events
pub const MATCH_RESOLVED_ROUTING_KEY: &str = "match.resolved";
pub const PLAYER_QUEUED_ROUTING_KEY: &str = "player.queued";
pub const PLAYER_EVENT_ROUTING_KEY: &str = "player.event";

/// Player-state event as it arrives on the wire
///
/// Numeric fields are signed so that out-of-range values are rejected with a
/// validation error rather than a parse failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEventMessage {
    pub user_id: String,
    pub mmr: i64,
    pub region: String,
    #[serde(default)]
    pub games_played: i64,
    #[serde(default = "default_level")]
    pub level: i64,
    #[serde(default)]
    pub ingame: bool,
}

fn default_level() -> i64 {
    1
}

impl PlayerEventMessage {
    /// Check every field and convert into a [`PlayerEvent`]
    pub fn into_event(self) -> Result<PlayerEvent> {
        let invalid = |reason: String| MatchmakingError::InvalidPlayerEvent { reason };

        let mmr = Rating::try_from(self.mmr)
            .ok()
            .filter(|mmr| *mmr <= MAX_RATING)
            .ok_or_else(|| {
                invalid(format!(
                    "mmr {} for '{}' is outside [{}, {}]",
                    self.mmr, self.user_id, MIN_RATING, MAX_RATING
                ))
            })?;
        let games_played = u32::try_from(self.games_played).map_err(|_| {
            invalid(format!(
                "games_played {} for '{}' must be a non-negative integer",
                self.games_played, self.user_id
            ))
        })?;
        let level = u32::try_from(self.level).map_err(|_| {
            invalid(format!(
                "level {} for '{}' must be a non-negative integer",
                self.level, self.user_id
            ))
        })?;
        let region: Region = self.region.parse()?;

        let event = PlayerEvent {
            user_id: self.user_id,
            mmr,
            region,
            games_played,
            level,
            ingame: self.ingame,
        };
        event.validate()?;
        Ok(event)
    }
}

impl From<&PlayerEvent> for PlayerEventMessage {
    fn from(event: &PlayerEvent) -> Self {
        Self {
            user_id: event.user_id.clone(),
            mmr: event.mmr as i64,
            region: event.region.to_string(),
            games_played: event.games_played as i64,
            level: event.level as i64,
            ingame: event.ingame,
        }
    }
}

/// Every message shape the service sends or receives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AmqpMessage {
    PlayerEvent(PlayerEventMessage),
    MatchResolved(MatchOutcome),
    PlayerQueued(PlayerQueued),
}

/// Message envelope with metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    pub fn new(payload: T, routing_key: String) -> Self {
        Self {
            payload,
            correlation_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Envelope with a caller-chosen correlation id, so re-publishing the
    /// same payload is recognized as a duplicate
    pub fn with_correlation_id(payload: T, routing_key: String, correlation_id: String) -> Self {
        Self {
            payload,
            correlation_id,
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            MatchmakingError::InvalidPlayerEvent {
                reason: format!("Failed to deserialize message: {}", e),
            }
            .into()
        })
    }
}

/// Message serialization and validation utilities
pub struct MessageUtils;

impl MessageUtils {
    /// Decode and validate a player event delivery
    ///
    /// Accepts the bare event object or one wrapped in a [`MessageEnvelope`].
    pub fn deserialize_player_event(bytes: &[u8]) -> Result<PlayerEvent> {
        let message = match serde_json::from_slice::<PlayerEventMessage>(bytes) {
            Ok(message) => message,
            Err(bare_err) => MessageEnvelope::<PlayerEventMessage>::from_bytes(bytes)
                .map(|envelope| envelope.payload)
                .map_err(|_| MatchmakingError::InvalidPlayerEvent {
                    reason: format!("Failed to deserialize player event: {}", bare_err),
                })?,
        };

        message.into_event()
    }

    /// Serialize a player event in its wire shape
    pub fn serialize_player_event(event: &PlayerEvent) -> Result<Vec<u8>> {
        event.validate()?;
        Self::serialize_message(&PlayerEventMessage::from(event))
    }

    /// Serialize any AMQP message to bytes
    pub fn serialize_message<T: serde::Serialize>(message: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(message).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    pub fn get_routing_key(message: &AmqpMessage) -> &'static str {
        match message {
            AmqpMessage::PlayerEvent(_) => PLAYER_EVENT_ROUTING_KEY,
            AmqpMessage::MatchResolved(_) => MATCH_RESOLVED_ROUTING_KEY,
            AmqpMessage::PlayerQueued(_) => PLAYER_QUEUED_ROUTING_KEY,
        }
    }
}
