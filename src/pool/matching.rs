//! Best-candidate search within a single waiting pool

use crate::types::{QueueEntry, Rating};
use crate::utils::rating_difference;

/// Trait for candidate search algorithms
///
/// Implementations must return the entry with the strictly smallest rating
/// difference within `threshold`, preferring the earliest-inserted entry when
/// several share that difference.
pub trait PoolMatcher: Send + Sync {
    /// Index into `pool` of the best candidate for a player rated `rating`
    fn find_best_match(&self, pool: &[QueueEntry], rating: Rating, threshold: Rating)
        -> Option<usize>;
}

/// Linear scan in insertion order. Pools stay in the hundreds, so this is
/// cheaper than maintaining a sorted index.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClosestRatingMatcher;

impl ClosestRatingMatcher {
    pub fn new() -> Self {
        Self
    }
}

impl PoolMatcher for ClosestRatingMatcher {
    fn find_best_match(
        &self,
        pool: &[QueueEntry],
        rating: Rating,
        threshold: Rating,
    ) -> Option<usize> {
        find_best_match(pool, rating, threshold)
    }
}

/// Scan `pool` and return the index of the closest candidate within `threshold`
pub fn find_best_match(pool: &[QueueEntry], rating: Rating, threshold: Rating) -> Option<usize> {
    let mut best: Option<(usize, Rating)> = None;

    for (index, candidate) in pool.iter().enumerate() {
        let diff = rating_difference(candidate.rating, rating);
        if diff > threshold {
            continue;
        }

        // Only a strictly smaller diff replaces the current best
        match best {
            Some((_, best_diff)) if diff >= best_diff => {}
            _ => best = Some((index, diff)),
        }
    }

    best.map(|(index, _)| index)
}
