//! AMQP integration for the matchmaking service
//!
//! Player-state events come in on a queue; resolved matches and queue
//! notifications go out on a topic exchange.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{MessageHandler, PlayerEventConsumer};
pub use messages::*;
pub use publisher::{AmqpEventPublisher, EventPublisher, MockEventPublisher, PublisherConfig};
