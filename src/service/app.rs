//! Main application state and service coordination
//!
//! This module wires the production components together: the AMQP
//! connection, the player store, the coordinator and the background tasks
//! that keep gauges current.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{MessageHandler, PlayerEventConsumer};
use crate::amqp::publisher::{AmqpEventPublisher, EventPublisher, PublisherConfig};
use crate::config::AppConfig;
use crate::coordinator::{EventDisposition, MatchmakingCoordinator};
use crate::error::{MatchmakingError, Result as MatchmakingResult};
use crate::metrics::MetricsCollector;
use crate::storage::{InMemoryPlayerStore, PlayerStore};
use crate::types::PlayerEvent;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Message handler that feeds decoded events into the coordinator
pub struct ProductionMessageHandler {
    coordinator: MatchmakingCoordinator,
}

impl ProductionMessageHandler {
    pub fn new(coordinator: MatchmakingCoordinator) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl MessageHandler for ProductionMessageHandler {
    async fn handle_player_event(&self, event: PlayerEvent) -> MatchmakingResult<()> {
        let player_id = event.user_id.clone();

        match self.coordinator.handle_event(event).await? {
            EventDisposition::Dropped { reason } => {
                debug!("Event for '{}' dropped: {}", player_id, reason)
            }
            EventDisposition::Enqueued { pool, pool_size } => debug!(
                "Event for '{}' enqueued in {} (size {})",
                player_id, pool, pool_size
            ),
            EventDisposition::Matched(outcome) => debug!(
                "Event for '{}' completed match {}",
                player_id, outcome.match_id
            ),
        }
        Ok(())
    }

    async fn handle_error(&self, error: &anyhow::Error, message_data: &[u8]) {
        let kind = error
            .downcast_ref::<MatchmakingError>()
            .map(MatchmakingError::kind)
            .unwrap_or("unknown");

        error!(
            "Player event handling failed - kind: '{}', message_size: {} bytes, error: {}",
            kind,
            message_data.len(),
            error
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            error!("Message preview: {:?}", preview);
        }
    }
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,
    coordinator: MatchmakingCoordinator,
    store: Arc<dyn PlayerStore>,
    metrics_collector: Arc<MetricsCollector>,

    /// Absent when the state was assembled without a broker
    amqp_connection: Option<Arc<AmqpConnection>>,

    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    event_consumer: Mutex<Option<PlayerEventConsumer>>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Connect to the broker and build every component from `config`
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} matchmaking service", config.service.name);
        info!(
            "Configuration: amqp_url={}, queue={}, exchange={}",
            config.amqp.url, config.amqp.queue_name, config.amqp.exchange_name
        );

        let metrics_collector = Self::initialize_metrics()?;
        let amqp_connection = Self::initialize_amqp(&config).await?;

        let channel =
            amqp_connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to open AMQP channel: {}", e),
                })?;
        let publisher_config = PublisherConfig {
            exchange_name: config.amqp.exchange_name.clone(),
            max_retries: config.amqp.max_retry_attempts,
            retry_delay_ms: config.amqp.retry_delay_ms,
            ..PublisherConfig::default()
        };
        let event_publisher = Arc::new(
            AmqpEventPublisher::new(channel, publisher_config)
                .await
                .map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to initialize event publisher: {}", e),
                })?,
        );

        let mut state = Self::with_components(
            config,
            Arc::new(InMemoryPlayerStore::new()),
            event_publisher,
            metrics_collector,
        )?;
        state.amqp_connection = Some(amqp_connection);
        Ok(state)
    }

    /// Assemble the state around caller-supplied collaborators, without a
    /// broker connection
    pub fn with_components(
        config: AppConfig,
        store: Arc<dyn PlayerStore>,
        event_publisher: Arc<dyn EventPublisher>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<Self, ServiceError> {
        let match_config = config.matchmaking.to_match_config().map_err(|e| {
            ServiceError::Configuration {
                message: e.to_string(),
            }
        })?;

        info!(
            "Matchmaking: max threshold {}, deltas +{}/-{}, same_region_only: {}, seed: {:?}",
            match_config.thresholds.max_threshold(),
            match_config.win_delta,
            match_config.loss_delta,
            match_config.same_region_only,
            match_config.seed
        );

        let coordinator = MatchmakingCoordinator::new(
            match_config,
            store.clone(),
            event_publisher,
            metrics_collector.clone(),
        );

        Ok(Self {
            config,
            coordinator,
            store,
            metrics_collector,
            amqp_connection: None,
            background_tasks: Mutex::new(Vec::new()),
            event_consumer: Mutex::new(None),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Start message consumption and background tasks
    pub async fn start(&self) -> Result<(), ServiceError> {
        info!("Starting {} matchmaking service", self.config.service.name);

        *self.is_running.write().await = true;

        if self.amqp_connection.is_some() {
            self.start_amqp_consumption().await?;
        } else {
            warn!("No AMQP connection configured - player events will not be consumed");
        }

        self.start_background_tasks().await;

        info!("Matchmaking service started");
        Ok(())
    }

    /// Stop consuming, stop background tasks and log final statistics
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;

        if let Some(consumer) = self.event_consumer.lock().await.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("AMQP message consumption stopped");
            }
        }

        self.stop_background_tasks().await;

        let final_stats =
            self.coordinator
                .get_stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("Shutdown of {} completed", self.config.service.name);

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn coordinator(&self) -> &MatchmakingCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> Arc<dyn PlayerStore> {
        self.store.clone()
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn amqp_connection(&self) -> Option<Arc<AmqpConnection>> {
        self.amqp_connection.clone()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn initialize_metrics() -> Result<Arc<MetricsCollector>, ServiceError> {
        MetricsCollector::new()
            .map(Arc::new)
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            })
    }

    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_settings(&config.amqp).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn start_amqp_consumption(&self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            return Ok(());
        };

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let handler: Arc<dyn MessageHandler> =
            Arc::new(ProductionMessageHandler::new(self.coordinator.clone()));
        let consumer = PlayerEventConsumer::new(
            handler,
            channel,
            self.config.service.max_concurrent_operations,
        );

        let queue_name = &self.config.amqp.queue_name;
        consumer
            .start_consuming(queue_name)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming from '{}': {}", queue_name, e),
            })?;

        *self.event_consumer.lock().await = Some(consumer);

        info!(
            "Listening for player events on '{}' (max {} in flight)",
            queue_name, self.config.service.max_concurrent_operations
        );
        Ok(())
    }

    async fn start_background_tasks(&self) {
        let pool_gauge_task = {
            let coordinator = self.coordinator.clone();
            let metrics_collector = self.metrics_collector.clone();
            let is_running = self.is_running.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(15));
                debug!("Pool gauge task started");

                while *is_running.read().await {
                    interval.tick().await;

                    match coordinator.pool_sizes() {
                        Ok(sizes) => metrics_collector.update_pool_sizes(&sizes),
                        Err(e) => warn!("Failed to read pool sizes for metrics: {}", e),
                    }
                }

                debug!("Pool gauge task stopped");
            })
        };

        let health_metrics_task = {
            let metrics_collector = self.metrics_collector.clone();
            let is_running = self.is_running.clone();
            let connection = self.amqp_connection.clone();
            let started_at = self.started_at;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                debug!("Health metrics task started");

                while *is_running.read().await {
                    interval.tick().await;

                    metrics_collector
                        .service()
                        .uptime_seconds
                        .set(started_at.elapsed().as_secs() as i64);

                    let amqp_alive = connection.as_ref().map(|c| c.is_alive()).unwrap_or(false);
                    metrics_collector.update_component_health("amqp", amqp_alive);
                    metrics_collector.update_component_health("coordinator", true);
                    metrics_collector.update_health_status(if amqp_alive { 2 } else { 1 });
                }

                debug!("Health metrics task stopped");
            })
        };

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(pool_gauge_task);
        tasks.push(health_metrics_task);
        info!("{} background tasks started", tasks.len());
    }

    async fn stop_background_tasks(&self) {
        let mut tasks = self.background_tasks.lock().await;
        let task_count = tasks.len();
        if task_count == 0 {
            return;
        }

        for task in tasks.drain(..) {
            task.abort();
        }

        info!("Stopped {} background tasks", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::types::Region;

    fn test_state() -> AppState {
        let mut config = AppConfig::default();
        config.matchmaking.simulated_match_ms = 0;

        AppState::with_components(
            config,
            Arc::new(InMemoryPlayerStore::new()),
            Arc::new(MockEventPublisher::new()),
            Arc::new(MetricsCollector::new().unwrap()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_start_and_shutdown_without_broker() {
        let state = test_state();
        assert!(!state.is_running().await);

        state.start().await.unwrap();
        assert!(state.is_running().await);

        state.shutdown().await.unwrap();
        assert!(!state.is_running().await);
    }

    #[tokio::test]
    async fn test_invalid_matchmaking_config_is_rejected() {
        let mut config = AppConfig::default();
        config.matchmaking.mmr_threshold =
            crate::config::ThresholdConfig::PerRegion(std::collections::BTreeMap::new());

        let result = AppState::with_components(
            config,
            Arc::new(InMemoryPlayerStore::new()),
            Arc::new(MockEventPublisher::new()),
            Arc::new(MetricsCollector::new().unwrap()),
        );
        assert!(matches!(result, Err(ServiceError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_production_handler_drives_coordinator() {
        let state = test_state();
        let handler = ProductionMessageHandler::new(state.coordinator().clone());

        handler
            .handle_player_event(PlayerEvent::new("p1", 2000, Region::Europe))
            .await
            .unwrap();
        handler
            .handle_player_event(PlayerEvent::new("p2", 2050, Region::Europe))
            .await
            .unwrap();

        let stats = state.coordinator().get_stats().await.unwrap();
        assert_eq!(stats.matches_resolved, 1);
        assert_eq!(state.store().count().await.unwrap(), 2);
    }
}
