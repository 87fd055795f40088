//! Rating update strategies applied once a contest has a winner

use crate::types::{Rating, MAX_RATING, MIN_RATING};

/// Computes post-match ratings for a winner and a loser
pub trait RatingStrategy: Send + Sync {
    /// Returns `(winner_new, loser_new)`; both must stay within the rating range
    fn apply(&self, winner_old: Rating, loser_old: Rating) -> (Rating, Rating);

    fn name(&self) -> &'static str;
}

/// Fixed gain for the winner and fixed loss for the loser, clamped to range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatDeltaStrategy {
    pub win_delta: Rating,
    pub loss_delta: Rating,
}

impl FlatDeltaStrategy {
    pub fn new(win_delta: Rating, loss_delta: Rating) -> Self {
        Self {
            win_delta,
            loss_delta,
        }
    }
}

impl Default for FlatDeltaStrategy {
    fn default() -> Self {
        Self::new(25, 25)
    }
}

impl RatingStrategy for FlatDeltaStrategy {
    fn apply(&self, winner_old: Rating, loser_old: Rating) -> (Rating, Rating) {
        let winner_new = winner_old.saturating_add(self.win_delta).min(MAX_RATING);
        let loser_new = loser_old.saturating_sub(self.loss_delta).max(MIN_RATING);
        (winner_new, loser_new)
    }

    fn name(&self) -> &'static str {
        "flat_delta"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_flat_delta_defaults() {
        let strategy = FlatDeltaStrategy::default();
        assert_eq!(strategy.apply(2000, 1900), (2025, 1875));
    }

    #[test]
    fn test_flat_delta_clamps_at_bounds() {
        let strategy = FlatDeltaStrategy::default();
        assert_eq!(strategy.apply(5000, 0), (5000, 0));
        assert_eq!(strategy.apply(4990, 10), (5000, 0));
    }

    proptest! {
        #[test]
        fn prop_ratings_stay_in_range(
            winner in 0u32..=5000,
            loser in 0u32..=5000,
            win_delta in 0u32..=1000,
            loss_delta in 0u32..=1000,
        ) {
            let (winner_new, loser_new) =
                FlatDeltaStrategy::new(win_delta, loss_delta).apply(winner, loser);
            prop_assert!(winner_new <= MAX_RATING);
            prop_assert!(winner_new >= winner);
            prop_assert!(loser_new <= loser);
        }
    }
}
