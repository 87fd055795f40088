//! Common types used throughout the matchmaking service

use crate::error::{MatchmakingError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for players
pub type PlayerId = String;

/// Unique identifier for resolved matches
pub type MatchId = Uuid;

/// Skill rating (MMR)
pub type Rating = u32;

/// Lowest rating a player can hold
pub const MIN_RATING: Rating = 0;

/// Highest rating a player can hold
pub const MAX_RATING: Rating = 5000;

/// Geographic bucket players are matched within
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
    #[serde(alias = "NA")]
    America,
    #[serde(alias = "EU")]
    Europe,
    #[serde(alias = "ASIA")]
    Asia,
    #[serde(alias = "SA")]
    Africa,
    #[serde(alias = "OCE")]
    Oceania,
}

impl Region {
    pub const ALL: [Region; 5] = [
        Region::America,
        Region::Europe,
        Region::Asia,
        Region::Africa,
        Region::Oceania,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::America => "America",
            Region::Europe => "Europe",
            Region::Asia => "Asia",
            Region::Africa => "Africa",
            Region::Oceania => "Oceania",
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Region {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "america" | "na" => Ok(Region::America),
            "europe" | "eu" => Ok(Region::Europe),
            "asia" => Ok(Region::Asia),
            "africa" | "sa" => Ok(Region::Africa),
            "oceania" | "oce" => Ok(Region::Oceania),
            other => Err(MatchmakingError::InvalidPlayerEvent {
                reason: format!("Unknown region: {}", other),
            }
            .into()),
        }
    }
}

/// Key of a waiting pool: one per region, or a single global pool when
/// matching across regions is allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoolKey {
    Region(Region),
    Global,
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolKey::Region(region) => write!(f, "{}", region),
            PoolKey::Global => write!(f, "global"),
        }
    }
}

/// Durable record of one player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: PlayerId,
    pub rating: Rating,
    pub region: Region,
    pub games_played: u32,
    pub level: u32,
    pub in_match: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlayerRecord {
    /// Create the first record for a player seen in `event`. `in_match` is
    /// owned by the coordinator, so a new record always starts idle.
    pub fn from_event(event: &PlayerEvent) -> Self {
        let now = Utc::now();
        Self {
            id: event.user_id.clone(),
            rating: event.mmr,
            region: event.region,
            games_played: event.games_played,
            level: event.level,
            in_match: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Snapshot of the fields a pool needs
    pub fn queue_entry(&self) -> QueueEntry {
        QueueEntry {
            id: self.id.clone(),
            rating: self.rating,
            region: self.region,
            enqueued_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// A player waiting in a pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: PlayerId,
    pub rating: Rating,
    pub region: Region,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(id: impl Into<PlayerId>, rating: Rating, region: Region) -> Self {
        Self {
            id: id.into(),
            rating,
            region,
            enqueued_at: Utc::now(),
        }
    }
}

/// Validated player-state event handed to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerEvent {
    pub user_id: PlayerId,
    pub mmr: Rating,
    pub region: Region,
    pub games_played: u32,
    pub level: u32,
    pub ingame: bool,
}

impl PlayerEvent {
    /// Convenience constructor for an idle player
    pub fn new(user_id: impl Into<PlayerId>, mmr: Rating, region: Region) -> Self {
        Self {
            user_id: user_id.into(),
            mmr,
            region,
            games_played: 0,
            level: 1,
            ingame: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidPlayerEvent {
                reason: "user_id cannot be empty".to_string(),
            }
            .into());
        }

        if self.mmr > MAX_RATING {
            return Err(MatchmakingError::InvalidPlayerEvent {
                reason: format!(
                    "mmr {} for '{}' is outside [{}, {}]",
                    self.mmr, self.user_id, MIN_RATING, MAX_RATING
                ),
            }
            .into());
        }

        Ok(())
    }
}

/// How a contest ended; descriptive only, no effect on ratings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FinishType {
    #[serde(rename = "KO")]
    Knockout,
    #[serde(rename = "DECISION")]
    Decision,
}

impl FinishType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishType::Knockout => "KO",
            FinishType::Decision => "DECISION",
        }
    }
}

impl std::fmt::Display for FinishType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable result of one resolved pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub match_id: MatchId,
    pub player_a_id: PlayerId,
    pub player_b_id: PlayerId,
    pub winner_id: PlayerId,
    pub loser_id: PlayerId,
    pub winner_old_rating: Rating,
    pub winner_new_rating: Rating,
    pub loser_old_rating: Rating,
    pub loser_new_rating: Rating,
    pub finish_type: FinishType,
    pub resolved_at: DateTime<Utc>,
}

impl MatchOutcome {
    /// (old, new) rating for a participant
    pub fn rating_change_for(&self, player_id: &str) -> Option<(Rating, Rating)> {
        if self.winner_id == player_id {
            Some((self.winner_old_rating, self.winner_new_rating))
        } else if self.loser_id == player_id {
            Some((self.loser_old_rating, self.loser_new_rating))
        } else {
            None
        }
    }

    pub fn involves(&self, player_id: &str) -> bool {
        self.player_a_id == player_id || self.player_b_id == player_id
    }
}

/// Event emitted when a player starts waiting in a pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerQueued {
    pub player_id: PlayerId,
    pub rating: Rating,
    pub pool: PoolKey,
    pub pool_size: usize,
    pub timestamp: DateTime<Utc>,
}
