//! Match outcome resolution
//!
//! Simulates a contest between two matched players and computes their new
//! ratings. Randomness and the rating model are both injected.

pub mod random;
pub mod resolver;
pub mod strategy;

pub use random::{RandomSource, ScriptedRandom, SeededRandom};
pub use resolver::{advantage, MatchResolver};
pub use strategy::{FlatDeltaStrategy, RatingStrategy};
