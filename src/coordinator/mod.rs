//! Matchmaking coordination
//!
//! Ties the player store, the region pools and the resolver together for each
//! incoming player event.

pub mod matchmaker;

pub use matchmaker::{CoordinatorStats, DropReason, EventDisposition, MatchmakingCoordinator};
