//! AMQP consumer for player-state events
//!
//! Each delivery is decoded, acknowledged, and then handed to the
//! [`MessageHandler`] on its own task. A semaphore caps how many events are in
//! flight at once, so a long simulated contest never blocks the delivery loop
//! but a flood of events cannot spawn unbounded work either.

use crate::amqp::messages::MessageUtils;
use crate::error::{MatchmakingError, Result};
use crate::types::PlayerEvent;
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicQosArguments,
        Channel, QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling AMQP messages
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one validated player event
    async fn handle_player_event(&self, event: PlayerEvent) -> Result<()>;

    /// Called for deliveries that could not be decoded or processed
    async fn handle_error(&self, error: &anyhow::Error, message_data: &[u8]);
}

/// Consumer for the player events queue
pub struct PlayerEventConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    consumer_tag: String,
    permits: Arc<Semaphore>,
    max_in_flight: usize,
}

impl PlayerEventConsumer {
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel, max_in_flight: usize) -> Self {
        let consumer_tag = format!("player-event-consumer-{}", uuid::Uuid::new_v4());
        let max_in_flight = max_in_flight.max(1);

        Self {
            handler,
            channel,
            consumer_tag,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        }
    }

    /// Declare `queue_name` and start consuming from it
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        self.channel
            .queue_declare(QueueDeclareArguments::durable_client_named(queue_name))
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to declare queue '{}': {}", queue_name, e),
            })?;

        let prefetch = self.max_in_flight.min(u16::MAX as usize) as u16;
        self.channel
            .basic_qos(BasicQosArguments::new(0, prefetch, false))
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to set prefetch: {}", e),
            })?;

        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);
        self.channel
            .basic_consume(
                EventConsumer::new(self.handler.clone(), self.permits.clone()),
                args,
            )
            .await
            .map_err(|e| MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming player events from queue: {}", queue_name);
        Ok(())
    }

    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel.basic_cancel(args).await.map_err(|e| {
            MatchmakingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            }
        })?;

        info!("Stopped consuming player events");
        Ok(())
    }

    /// Events currently being processed
    pub fn in_flight(&self) -> usize {
        self.max_in_flight
            .saturating_sub(self.permits.available_permits())
    }
}

struct EventConsumer {
    handler: Arc<dyn MessageHandler>,
    permits: Arc<Semaphore>,
}

impl EventConsumer {
    fn new(handler: Arc<dyn MessageHandler>, permits: Arc<Semaphore>) -> Self {
        Self { handler, permits }
    }
}

#[async_trait]
impl AsyncConsumer for EventConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let decoded = MessageUtils::deserialize_player_event(&content);

        // At-most-once: the delivery is settled before any matchmaking work
        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            error!("Failed to ack delivery {}: {}", delivery_tag, e);
        }

        let event = match decoded {
            Ok(event) => event,
            Err(e) => {
                warn!("Rejected delivery {}: {}", delivery_tag, e);
                self.handler.handle_error(&e, &content).await;
                return;
            }
        };

        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!(
                    "Consumer shutting down, dropping event for '{}'",
                    event.user_id
                );
                return;
            }
        };

        let handler = self.handler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            dispatch_event(handler.as_ref(), event, &content).await;
        });
    }
}

/// Run one event through the handler, routing failures to `handle_error`
pub async fn dispatch_event(handler: &dyn MessageHandler, event: PlayerEvent, content: &[u8]) {
    let start_time = std::time::Instant::now();
    let player_id = event.user_id.clone();

    match handler.handle_player_event(event).await {
        Ok(()) => debug!(
            "Event for '{}' processed in {:.2}ms",
            player_id,
            start_time.elapsed().as_secs_f64() * 1000.0
        ),
        Err(e) => {
            error!(
                "Event for '{}' failed after {:.2}ms: {}",
                player_id,
                start_time.elapsed().as_secs_f64() * 1000.0,
                e
            );
            handler.handle_error(&e, content).await;
        }
    }
}

/// Mock message handler for testing
pub struct MockMessageHandler {
    pub received_events: Arc<tokio::sync::Mutex<Vec<PlayerEvent>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
}

impl Default for MockMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessageHandler {
    pub fn new() -> Self {
        Self {
            received_events: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl MessageHandler for MockMessageHandler {
    async fn handle_player_event(&self, event: PlayerEvent) -> Result<()> {
        if event.user_id == "explode" {
            return Err(MatchmakingError::InternalError {
                message: "handler refused event".to_string(),
            }
            .into());
        }
        self.received_events.lock().await.push(event);
        Ok(())
    }

    async fn handle_error(&self, error: &anyhow::Error, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}
