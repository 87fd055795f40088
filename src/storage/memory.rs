//! In-memory player store

use crate::error::{MatchmakingError, Result};
use crate::storage::PlayerStore;
use crate::types::{PlayerId, PlayerRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryPlayerStore {
    records: RwLock<HashMap<PlayerId, PlayerRecord>>,
}

impl InMemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records`
    pub fn with_records(records: impl IntoIterator<Item = PlayerRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.id.clone(), record))
            .collect();
        Self {
            records: RwLock::new(records),
        }
    }

    /// Copy of every stored record
    pub fn snapshot(&self) -> Result<Vec<PlayerRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire player records read lock".to_string(),
            })?;
        Ok(records.values().cloned().collect())
    }
}

#[async_trait]
impl PlayerStore for InMemoryPlayerStore {
    async fn load(&self, player_id: &str) -> Result<Option<PlayerRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire player records read lock".to_string(),
            })?;
        Ok(records.get(player_id).cloned())
    }

    async fn upsert(&self, mut record: PlayerRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire player records write lock".to_string(),
            })?;
        record.touch();
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn commit_pair(&self, mut first: PlayerRecord, mut second: PlayerRecord) -> Result<()> {
        if first.id == second.id {
            return Err(MatchmakingError::PersistenceFailed {
                player_ids: vec![first.id.clone(), second.id.clone()],
                message: "A player cannot be committed against themselves".to_string(),
            }
            .into());
        }

        // Single write guard: readers see both records updated or neither
        let mut records = self.records.write().map_err(|_| {
            MatchmakingError::PersistenceFailed {
                player_ids: vec![first.id.clone(), second.id.clone()],
                message: "Failed to acquire player records write lock".to_string(),
            }
        })?;
        first.touch();
        second.touch();
        records.insert(first.id.clone(), first);
        records.insert(second.id.clone(), second);
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        let records = self
            .records
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire player records read lock".to_string(),
            })?;
        Ok(records.len())
    }
}
