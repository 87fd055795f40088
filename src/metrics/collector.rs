//! Metrics collection using Prometheus
//!
//! Counters and gauges for the matchmaking pipeline, grouped the same way the
//! health endpoints report them: service, matchmaking and performance.

use crate::types::{FinishType, PoolKey, Region};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the matchmaking service
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    matchmaking_metrics: MatchmakingMetrics,
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Matchmaking pipeline metrics
#[derive(Clone)]
pub struct MatchmakingMetrics {
    pub events_received_total: IntCounterVec,
    pub events_dropped_total: IntCounterVec,
    pub players_enqueued_total: IntCounterVec,

    /// Players currently waiting, per pool
    pub players_waiting: IntGaugeVec,

    pub matches_resolved_total: IntCounterVec,

    /// Matched candidates whose record could not be loaded
    pub candidates_lost_total: IntCounter,

    pub persistence_failures_total: IntCounterVec,

    /// Rating difference of each matched pair
    pub match_rating_gap: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// End-to-end processing time of one player event
    pub event_processing_duration: Histogram,

    /// Time spent inside the pool critical section
    pub pool_operation_duration: Histogram,

    /// Store commit durations by stage
    pub commit_duration: HistogramVec,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let matchmaking_metrics = MatchmakingMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            matchmaking_metrics,
            performance_metrics,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn matchmaking(&self) -> &MatchmakingMetrics {
        &self.matchmaking_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a player event arriving at the coordinator
    pub fn record_event_received(&self, region: Region) {
        self.matchmaking_metrics
            .events_received_total
            .with_label_values(&[region.as_str()])
            .inc();
    }

    /// Record an event that changed no state
    pub fn record_event_dropped(&self, reason: &str) {
        self.matchmaking_metrics
            .events_dropped_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Record a player starting to wait in `pool`
    pub fn record_player_enqueued(&self, pool: PoolKey, pool_size: usize) {
        let pool = pool.to_string();
        self.matchmaking_metrics
            .players_enqueued_total
            .with_label_values(&[&pool])
            .inc();
        self.matchmaking_metrics
            .players_waiting
            .with_label_values(&[&pool])
            .set(pool_size as i64);
    }

    /// Overwrite the waiting gauge with current pool sizes
    pub fn update_pool_sizes(&self, sizes: &HashMap<PoolKey, usize>) {
        self.matchmaking_metrics.players_waiting.reset();
        for (pool, size) in sizes {
            self.matchmaking_metrics
                .players_waiting
                .with_label_values(&[&pool.to_string()])
                .set(*size as i64);
        }
    }

    /// Record a pair being taken out of a pool
    pub fn record_match_found(&self, rating_gap: u32) {
        self.matchmaking_metrics
            .match_rating_gap
            .observe(rating_gap as f64);
    }

    pub fn record_match_resolved(&self, finish_type: FinishType) {
        self.matchmaking_metrics
            .matches_resolved_total
            .with_label_values(&[finish_type.as_str()])
            .inc();
    }

    pub fn record_candidate_lost(&self) {
        self.matchmaking_metrics.candidates_lost_total.inc();
    }

    /// Record a failed store write; `stage` is `reserve` or `resolve`
    pub fn record_persistence_failure(&self, stage: &str) {
        self.matchmaking_metrics
            .persistence_failures_total
            .with_label_values(&[stage])
            .inc();
    }

    pub fn record_event_processing(&self, duration: Duration) {
        self.performance_metrics
            .event_processing_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_pool_operation(&self, duration: Duration) {
        self.performance_metrics
            .pool_operation_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_commit(&self, stage: &str, duration: Duration) {
        self.performance_metrics
            .commit_duration
            .with_label_values(&[stage])
            .observe(duration.as_secs_f64());
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("sparring_ring_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "sparring_ring_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("sparring_ring_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "sparring_ring_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("sparring_ring_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl MatchmakingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let events_received_total = IntCounterVec::new(
            Opts::new(
                "sparring_ring_events_received_total",
                "Player events received",
            ),
            &["region"],
        )?;
        registry.register(Box::new(events_received_total.clone()))?;

        let events_dropped_total = IntCounterVec::new(
            Opts::new(
                "sparring_ring_events_dropped_total",
                "Player events dropped without a state change",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(events_dropped_total.clone()))?;

        let players_enqueued_total = IntCounterVec::new(
            Opts::new(
                "sparring_ring_players_enqueued_total",
                "Players added to a waiting pool",
            ),
            &["pool"],
        )?;
        registry.register(Box::new(players_enqueued_total.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new(
                "sparring_ring_players_waiting",
                "Players currently waiting in a pool",
            ),
            &["pool"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let matches_resolved_total = IntCounterVec::new(
            Opts::new(
                "sparring_ring_matches_resolved_total",
                "Matches resolved and committed",
            ),
            &["finish_type"],
        )?;
        registry.register(Box::new(matches_resolved_total.clone()))?;

        let candidates_lost_total = IntCounter::new(
            "sparring_ring_candidates_lost_total",
            "Matched candidates lost because their record was missing",
        )?;
        registry.register(Box::new(candidates_lost_total.clone()))?;

        let persistence_failures_total = IntCounterVec::new(
            Opts::new(
                "sparring_ring_persistence_failures_total",
                "Failed pair commits",
            ),
            &["stage"],
        )?;
        registry.register(Box::new(persistence_failures_total.clone()))?;

        let match_rating_gap = Histogram::with_opts(
            HistogramOpts::new(
                "sparring_ring_match_rating_gap",
                "Rating difference of matched pairs",
            )
            .buckets(vec![0.0, 10.0, 25.0, 50.0, 100.0, 150.0, 200.0, 300.0, 500.0]),
        )?;
        registry.register(Box::new(match_rating_gap.clone()))?;

        Ok(Self {
            events_received_total,
            events_dropped_total,
            players_enqueued_total,
            players_waiting,
            matches_resolved_total,
            candidates_lost_total,
            persistence_failures_total,
            match_rating_gap,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let event_processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "sparring_ring_event_processing_duration_seconds",
                "Player event processing time",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0]),
        )?;
        registry.register(Box::new(event_processing_duration.clone()))?;

        let pool_operation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "sparring_ring_pool_operation_duration_seconds",
                "Time spent holding the pool lock",
            )
            .buckets(vec![0.00001, 0.0001, 0.001, 0.005, 0.01, 0.05]),
        )?;
        registry.register(Box::new(pool_operation_duration.clone()))?;

        let commit_duration = HistogramVec::new(
            HistogramOpts::new(
                "sparring_ring_commit_duration_seconds",
                "Pair commit duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["stage"],
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "sparring_ring_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            event_processing_duration,
            pool_operation_duration,
            commit_duration,
            amqp_operation_duration,
        })
    }
}
