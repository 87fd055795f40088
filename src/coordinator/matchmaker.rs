//! Matchmaking coordinator
//!
//! Entry point for every player event. A player moves through
//! idle -> searching -> matched -> in game -> resolved -> idle; the
//! coordinator owns every transition and the two pair commits that make the
//! matched and resolved states durable.

use crate::amqp::publisher::EventPublisher;
use crate::config::MatchConfig;
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::outcome::MatchResolver;
use crate::pool::RegionPoolManager;
use crate::storage::PlayerStore;
use crate::types::{
    MatchOutcome, PlayerEvent, PlayerId, PlayerQueued, PlayerRecord, PoolKey, QueueEntry,
};
use crate::utils::{current_timestamp, rating_difference};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Why an event changed no state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DropReason {
    /// The stored record says the player is already matched or playing
    AlreadyInMatch,
    /// The event itself reports the player as in a game
    ReportedInGame,
    /// The player is already waiting in a pool
    AlreadyQueued,
    /// The player was just taken from a pool for a match still being set up
    AlreadyMatched,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::AlreadyInMatch => "already_in_match",
            DropReason::ReportedInGame => "reported_in_game",
            DropReason::AlreadyQueued => "already_queued",
            DropReason::AlreadyMatched => "already_matched",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What handling one event did
#[derive(Debug, Clone, PartialEq)]
pub enum EventDisposition {
    Dropped { reason: DropReason },
    Enqueued { pool: PoolKey, pool_size: usize },
    Matched(MatchOutcome),
}

/// Statistics about coordinator operations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinatorStats {
    pub events_received: u64,
    pub events_dropped: u64,
    pub players_enqueued: u64,
    pub matches_resolved: u64,
    /// Candidates removed from a pool whose record could not be loaded
    pub candidates_lost: u64,
    pub persistence_failures: u64,
    /// Players waiting across all pools right now
    pub players_waiting: usize,
}

/// Result of the single pool critical section
enum PoolStep {
    AlreadyQueued,
    AlreadyMatched,
    Enqueued { pool: PoolKey, pool_size: usize },
    Matched { candidate: QueueEntry },
}

/// Both players of a match, kept out of the pools until dropped
struct Reservation {
    pools: Arc<RegionPoolManager>,
    player_ids: [PlayerId; 2],
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Err(e) = self.pools.release(&self.player_ids) {
            error!(
                "Failed to release reservation of '{}' and '{}': {}",
                self.player_ids[0], self.player_ids[1], e
            );
        }
    }
}

/// Commit stage labels used in logs and metrics
const RESERVE_STAGE: &str = "reserve";
const RESOLVE_STAGE: &str = "resolve";

/// Longest delay between commit retries
const MAX_COMMIT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// The matchmaking coordinator
#[derive(Clone)]
pub struct MatchmakingCoordinator {
    config: MatchConfig,
    store: Arc<dyn PlayerStore>,
    pools: Arc<RegionPoolManager>,
    resolver: Arc<MatchResolver>,
    event_publisher: Arc<dyn EventPublisher>,
    metrics_collector: Arc<MetricsCollector>,
    stats: Arc<RwLock<CoordinatorStats>>,
}

impl MatchmakingCoordinator {
    /// Create a coordinator with fresh pools and a resolver built from `config`
    pub fn new(
        config: MatchConfig,
        store: Arc<dyn PlayerStore>,
        event_publisher: Arc<dyn EventPublisher>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            pools: Arc::new(RegionPoolManager::new(config.same_region_only)),
            resolver: Arc::new(MatchResolver::from_config(&config)),
            config,
            store,
            event_publisher,
            metrics_collector,
            stats: Arc::new(RwLock::new(CoordinatorStats::default())),
        }
    }

    /// Replace the resolver, e.g. with a scripted random source
    pub fn with_resolver(mut self, resolver: MatchResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Share an existing pool manager
    pub fn with_pool_manager(mut self, pools: Arc<RegionPoolManager>) -> Self {
        self.pools = pools;
        self
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn pools(&self) -> Arc<RegionPoolManager> {
        self.pools.clone()
    }

    /// Handle one player-state event
    pub async fn handle_event(&self, event: PlayerEvent) -> Result<EventDisposition> {
        let timer = self.metrics_collector.start_timer();

        if let Err(e) = event.validate() {
            warn!("Rejected player event for '{}': {}", event.user_id, e);
            return Err(e);
        }

        self.update_stats(|stats| stats.events_received += 1);
        self.metrics_collector.record_event_received(event.region);

        info!(
            "Player event received - player: '{}', mmr: {}, region: {}, ingame: {}",
            event.user_id, event.mmr, event.region, event.ingame
        );

        let result = self.process_event(event).await;
        self.metrics_collector.record_event_processing(timer.stop());
        result
    }

    async fn process_event(&self, event: PlayerEvent) -> Result<EventDisposition> {
        let record = self.load_or_create(&event).await?;

        if record.in_match {
            return self.drop_event(&record.id, DropReason::AlreadyInMatch);
        }
        if event.ingame {
            return self.drop_event(&record.id, DropReason::ReportedInGame);
        }

        let threshold = self.config.thresholds.for_region(record.region);
        let entry = record.queue_entry();

        let pool_timer = Instant::now();
        let step = self.pools.with_pools(|pools| {
            if pools.contains(&entry.id) {
                return PoolStep::AlreadyQueued;
            }
            // Out of every pool but not yet durably in a match
            if pools.is_reserved(&entry.id) {
                return PoolStep::AlreadyMatched;
            }

            let pool = pools.key_for(entry.region);
            match pools.find_best_match(pool, entry.rating, threshold) {
                Some(candidate) => {
                    pools.remove_matched(pool, &candidate);
                    pools.reserve(&entry.id, &candidate.id);
                    PoolStep::Matched { candidate }
                }
                None => {
                    let pool_size = pools.enqueue(entry);
                    PoolStep::Enqueued { pool, pool_size }
                }
            }
        })?;
        self.metrics_collector.record_pool_operation(pool_timer.elapsed());

        match step {
            PoolStep::AlreadyQueued => self.drop_event(&record.id, DropReason::AlreadyQueued),
            PoolStep::AlreadyMatched => self.drop_event(&record.id, DropReason::AlreadyMatched),
            PoolStep::Enqueued { pool, pool_size } => {
                self.on_enqueued(&record, pool, pool_size).await
            }
            PoolStep::Matched { candidate } => {
                let reservation = Reservation {
                    pools: self.pools.clone(),
                    player_ids: [record.id.clone(), candidate.id.clone()],
                };
                self.run_match(record, candidate, reservation).await
            }
        }
    }

    /// Existing records are authoritative; first-seen players are created
    /// from the event
    async fn load_or_create(&self, event: &PlayerEvent) -> Result<PlayerRecord> {
        if let Some(record) = self.store.load(&event.user_id).await? {
            return Ok(record);
        }

        let record = PlayerRecord::from_event(event);
        self.store.upsert(record.clone()).await.map_err(|e| {
            error!("Failed to create record for '{}': {}", record.id, e);
            MatchmakingError::PersistenceFailed {
                player_ids: vec![record.id.clone()],
                message: format!("Failed to create player record: {}", e),
            }
        })?;

        debug!(
            "Created record for new player '{}' (mmr {}, region {})",
            record.id, record.rating, record.region
        );
        Ok(record)
    }

    fn drop_event(&self, player_id: &str, reason: DropReason) -> Result<EventDisposition> {
        self.update_stats(|stats| stats.events_dropped += 1);
        self.metrics_collector.record_event_dropped(reason.as_str());

        info!("Event dropped - player: '{}', reason: {}", player_id, reason);
        Ok(EventDisposition::Dropped { reason })
    }

    async fn on_enqueued(
        &self,
        record: &PlayerRecord,
        pool: PoolKey,
        pool_size: usize,
    ) -> Result<EventDisposition> {
        self.update_stats(|stats| stats.players_enqueued += 1);
        self.metrics_collector.record_player_enqueued(pool, pool_size);

        info!(
            "Player enqueued - player: '{}', mmr: {}, pool: {}, pool_size: {}",
            record.id, record.rating, pool, pool_size
        );

        let queued = PlayerQueued {
            player_id: record.id.clone(),
            rating: record.rating,
            pool,
            pool_size,
            timestamp: current_timestamp(),
        };
        if let Err(e) = self.event_publisher.publish_player_queued(queued).await {
            warn!("Failed to publish queue event for '{}': {}", record.id, e);
        }

        Ok(EventDisposition::Enqueued { pool, pool_size })
    }

    /// Matched -> in game -> resolved, entirely outside the pool lock. The
    /// reservation is released once the resolve commit has landed, or on the
    /// first failure.
    async fn run_match(
        &self,
        incoming: PlayerRecord,
        candidate: QueueEntry,
        reservation: Reservation,
    ) -> Result<EventDisposition> {
        info!(
            "Match found - '{}' ({}) vs '{}' ({}), diff: {}",
            incoming.id,
            incoming.rating,
            candidate.id,
            candidate.rating,
            rating_difference(incoming.rating, candidate.rating)
        );
        self.metrics_collector
            .record_match_found(rating_difference(incoming.rating, candidate.rating));

        let opponent = self.load_candidate(&incoming, &candidate).await?;

        let mut a = incoming;
        let mut b = opponent;
        a.in_match = true;
        b.in_match = true;
        self.commit_with_policy(RESERVE_STAGE, &a, &b).await?;

        if !self.config.simulated_match_duration.is_zero() {
            debug!(
                "Simulating contest '{}' vs '{}' for {:?}",
                a.id, b.id, self.config.simulated_match_duration
            );
            sleep(self.config.simulated_match_duration).await;
        }

        let outcome = self.resolver.resolve(&a, &b).map_err(|e| {
            error!(
                "Failed to resolve '{}' vs '{}', pair left in progress: {}",
                a.id, b.id, e
            );
            e
        })?;

        for record in [&mut a, &mut b] {
            if let Some((_, new_rating)) = outcome.rating_change_for(&record.id) {
                record.rating = new_rating;
            }
            record.games_played = record.games_played.saturating_add(1);
            record.in_match = false;
        }
        self.commit_with_policy(RESOLVE_STAGE, &a, &b).await?;
        drop(reservation);

        // Both records are final from here on; nothing below may fail the match
        self.update_stats(|stats| stats.matches_resolved += 1);
        self.metrics_collector.record_match_resolved(outcome.finish_type);

        info!(
            "Match resolved - winner: '{}' {} -> {}, loser: '{}' {} -> {}, finish: {}",
            outcome.winner_id,
            outcome.winner_old_rating,
            outcome.winner_new_rating,
            outcome.loser_id,
            outcome.loser_old_rating,
            outcome.loser_new_rating,
            outcome.finish_type
        );

        if let Err(e) = self
            .event_publisher
            .publish_match_resolved(outcome.clone())
            .await
        {
            warn!(
                "Failed to publish outcome of match {} ('{}' vs '{}'): {}",
                outcome.match_id, outcome.player_a_id, outcome.player_b_id, e
            );
        }

        Ok(EventDisposition::Matched(outcome))
    }

    /// The candidate has already left its pool; if its record is gone the
    /// match is abandoned and the candidate is not put back
    async fn load_candidate(
        &self,
        incoming: &PlayerRecord,
        candidate: &QueueEntry,
    ) -> Result<PlayerRecord> {
        let loaded = self.store.load(&candidate.id).await;

        let error: anyhow::Error = match loaded {
            Ok(Some(record)) => return Ok(record),
            Ok(None) => MatchmakingError::PlayerNotFound {
                player_id: candidate.id.clone(),
            }
            .into(),
            Err(e) => e,
        };

        self.update_stats(|stats| stats.candidates_lost += 1);
        self.metrics_collector.record_candidate_lost();
        error!(
            "Candidate lost - incoming: '{}', candidate: '{}', error: {}",
            incoming.id, candidate.id, error
        );
        Err(error)
    }

    /// Commit both records, retrying per the configured policy
    async fn commit_with_policy(
        &self,
        stage: &str,
        a: &PlayerRecord,
        b: &PlayerRecord,
    ) -> Result<()> {
        let policy = &self.config.commit_policy;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        let mut delay = policy.retry_delay;

        loop {
            let started = Instant::now();
            match self.store.commit_pair(a.clone(), b.clone()).await {
                Ok(()) => {
                    self.metrics_collector.record_commit(stage, started.elapsed());
                    return Ok(());
                }
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "Commit attempt {} ({}) failed for '{}' and '{}': {}. Retrying in {:?}",
                        attempt, stage, a.id, b.id, e, delay
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_COMMIT_RETRY_DELAY);
                    attempt += 1;
                }
                Err(e) => {
                    self.update_stats(|stats| stats.persistence_failures += 1);
                    self.metrics_collector.record_persistence_failure(stage);
                    error!(
                        "Persistence failure - stage: {}, players: '{}' and '{}', attempts: {}, error: {}",
                        stage, a.id, b.id, attempt, e
                    );
                    return Err(MatchmakingError::PersistenceFailed {
                        player_ids: vec![a.id.clone(), b.id.clone()],
                        message: format!("{} commit failed after {} attempt(s): {}", stage, attempt, e),
                    }
                    .into());
                }
            }
        }
    }

    /// Take a waiting player out of their pool; false when they were not waiting
    pub async fn cancel_search(&self, player_id: &str) -> Result<bool> {
        let removed = self.pools.remove_player(player_id)?;

        match removed {
            Some(entry) => {
                let sizes = self.pools.pool_sizes()?;
                self.metrics_collector.update_pool_sizes(&sizes);
                info!(
                    "Search cancelled - player: '{}', waited since {}",
                    entry.id, entry.enqueued_at
                );
                Ok(true)
            }
            None => {
                debug!("Cancel ignored - '{}' was not waiting", player_id);
                Ok(false)
            }
        }
    }

    pub async fn get_stats(&self) -> Result<CoordinatorStats> {
        let mut stats = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?
            .clone();
        stats.players_waiting = self.pools.total_waiting()?;
        Ok(stats)
    }

    pub fn pool_sizes(&self) -> Result<HashMap<PoolKey, usize>> {
        self.pools.pool_sizes()
    }

    /// Counters are bookkeeping only; a poisoned lock is logged, never
    /// surfaced to the event being handled
    fn update_stats(&self, f: impl FnOnce(&mut CoordinatorStats)) {
        match self.stats.write() {
            Ok(mut stats) => f(&mut stats),
            Err(_) => warn!("Failed to acquire stats lock, counters not updated"),
        }
    }
}
