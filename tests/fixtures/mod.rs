//! Test fixtures and fault-injecting collaborators for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use sparring_ring::amqp::publisher::MockEventPublisher;
use sparring_ring::config::{MatchConfig, ThresholdTable};
use sparring_ring::coordinator::MatchmakingCoordinator;
use sparring_ring::error::{MatchmakingError, Result};
use sparring_ring::metrics::MetricsCollector;
use sparring_ring::outcome::{FlatDeltaStrategy, MatchResolver, ScriptedRandom};
use sparring_ring::storage::{InMemoryPlayerStore, PlayerStore};
use sparring_ring::types::{PlayerEvent, PlayerRecord, Rating, Region};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Player store that delegates to [`InMemoryPlayerStore`] but can fail chosen
/// commits, slow every commit down and hide chosen records
#[derive(Default)]
pub struct FaultyPlayerStore {
    inner: InMemoryPlayerStore,
    /// 1-based commit numbers that fail
    failing_commits: Mutex<HashSet<usize>>,
    commits_attempted: AtomicUsize,
    commit_delay: Option<Duration>,
    /// Ids whose load reports "not found" even when stored
    hidden: Mutex<HashSet<String>>,
}

impl FaultyPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the n-th `commit_pair` call (counting from 1) fail
    pub fn fail_commit(self, n: usize) -> Self {
        if let Ok(mut failing) = self.failing_commits.lock() {
            failing.insert(n);
        }
        self
    }

    /// Sleep for `delay` inside every `commit_pair`
    pub fn with_commit_delay(mut self, delay: Duration) -> Self {
        self.commit_delay = Some(delay);
        self
    }

    pub fn hide(&self, player_id: &str) {
        if let Ok(mut hidden) = self.hidden.lock() {
            hidden.insert(player_id.to_string());
        }
    }

    pub fn commits_attempted(&self) -> usize {
        self.commits_attempted.load(Ordering::SeqCst)
    }

    /// Stored record, bypassing the hidden set
    pub async fn stored(&self, player_id: &str) -> Option<PlayerRecord> {
        self.inner.load(player_id).await.ok().flatten()
    }
}

#[async_trait]
impl PlayerStore for FaultyPlayerStore {
    async fn load(&self, player_id: &str) -> Result<Option<PlayerRecord>> {
        let hidden = self
            .hidden
            .lock()
            .map(|hidden| hidden.contains(player_id))
            .unwrap_or(false);
        if hidden {
            return Ok(None);
        }
        self.inner.load(player_id).await
    }

    async fn upsert(&self, record: PlayerRecord) -> Result<()> {
        self.inner.upsert(record).await
    }

    async fn commit_pair(&self, first: PlayerRecord, second: PlayerRecord) -> Result<()> {
        let attempt = self.commits_attempted.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.commit_delay {
            tokio::time::sleep(delay).await;
        }
        let fail = self
            .failing_commits
            .lock()
            .map(|failing| failing.contains(&attempt))
            .unwrap_or(false);

        if fail {
            return Err(MatchmakingError::PersistenceFailed {
                player_ids: vec![first.id, second.id],
                message: format!("injected failure on commit {}", attempt),
            }
            .into());
        }
        self.inner.commit_pair(first, second).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}

/// Seeded config with no contest delay
pub fn fast_config() -> MatchConfig {
    MatchConfig::default().with_seed(42)
}

pub fn config_with_threshold(threshold: Rating) -> MatchConfig {
    fast_config().with_threshold(ThresholdTable::uniform(threshold))
}

pub struct TestSystem {
    pub coordinator: MatchmakingCoordinator,
    pub publisher: Arc<MockEventPublisher>,
    pub metrics: Arc<MetricsCollector>,
}

pub fn create_test_system(store: Arc<dyn PlayerStore>, config: MatchConfig) -> TestSystem {
    let publisher = Arc::new(MockEventPublisher::new());
    let metrics = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
    let coordinator =
        MatchmakingCoordinator::new(config, store, publisher.clone(), metrics.clone());

    TestSystem {
        coordinator,
        publisher,
        metrics,
    }
}

/// Resolver whose winner and finish draws are fixed
pub fn scripted_resolver(draws: &[f64]) -> MatchResolver {
    MatchResolver::new(
        Arc::new(FlatDeltaStrategy::default()),
        Box::new(ScriptedRandom::new(draws.to_vec())),
    )
}

pub fn player(id: &str, mmr: Rating, region: Region) -> PlayerEvent {
    PlayerEvent::new(id, mmr, region)
}

pub fn europe(id: &str, mmr: Rating) -> PlayerEvent {
    player(id, mmr, Region::Europe)
}
