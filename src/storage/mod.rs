//! Durable player state
//!
//! The coordinator only talks to the [`PlayerStore`] trait; the in-memory
//! implementation backs the service until a database adapter is wired in.

pub mod memory;

pub use memory::InMemoryPlayerStore;

use crate::error::Result;
use crate::types::PlayerRecord;
use async_trait::async_trait;

/// Trait for player record persistence
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Fetch a player's record, `None` when the id has never been seen
    async fn load(&self, player_id: &str) -> Result<Option<PlayerRecord>>;

    /// Insert or replace a single record
    async fn upsert(&self, record: PlayerRecord) -> Result<()>;

    /// Write both records atomically: either both are stored or neither is
    async fn commit_pair(&self, first: PlayerRecord, second: PlayerRecord) -> Result<()>;

    /// Number of stored records
    async fn count(&self) -> Result<usize>;
}
