//! Sparring Ring - Matchmaking microservice for one-on-one contests
//!
//! This crate pairs waiting players by rating within their region, simulates
//! the contest, and commits the rating changes for both participants together.

pub mod amqp;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod outcome;
pub mod pool;
pub mod service;
pub mod storage;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use coordinator::{CoordinatorStats, DropReason, EventDisposition, MatchmakingCoordinator};
pub use outcome::MatchResolver;
pub use pool::RegionPoolManager;
pub use storage::{InMemoryPlayerStore, PlayerStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
