//! Per-region waiting pools
//!
//! Players that could not be matched immediately wait here, one FIFO queue per
//! region (or a single global queue when region scoping is disabled).

pub mod manager;
pub mod matching;

pub use manager::{RegionPoolManager, RegionPools};
pub use matching::{find_best_match, ClosestRatingMatcher, PoolMatcher};
