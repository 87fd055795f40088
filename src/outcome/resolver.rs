//! Contest simulation for a matched pair
//!
//! The higher-rated player is favoured by up to fifteen percentage points,
//! scaled linearly with the rating gap. The finish type is drawn separately
//! and is purely descriptive.

use crate::config::MatchConfig;
use crate::error::{MatchmakingError, Result};
use crate::outcome::random::{RandomSource, SeededRandom};
use crate::outcome::strategy::{FlatDeltaStrategy, RatingStrategy};
use crate::types::{FinishType, MatchOutcome, PlayerRecord, Rating};
use crate::utils::{current_timestamp, generate_match_id};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Rating gap that yields the full advantage
pub const ADVANTAGE_SCALE: f64 = 2000.0;

/// Cap on the win-probability shift from a rating gap
pub const MAX_ADVANTAGE: f64 = 0.15;

/// Probability that a contest ends early
pub const KNOCKOUT_PROBABILITY: f64 = 0.35;

/// Win-probability shift in favour of a player rated `a` against `b`
pub fn advantage(a: Rating, b: Rating) -> f64 {
    let gap = a as f64 - b as f64;
    (gap / ADVANTAGE_SCALE).clamp(-MAX_ADVANTAGE, MAX_ADVANTAGE)
}

/// Turns a matched pair into a [`MatchOutcome`]
pub struct MatchResolver {
    strategy: Arc<dyn RatingStrategy>,
    rng: Mutex<Box<dyn RandomSource>>,
}

impl MatchResolver {
    pub fn new(strategy: Arc<dyn RatingStrategy>, rng: Box<dyn RandomSource>) -> Self {
        Self {
            strategy,
            rng: Mutex::new(rng),
        }
    }

    /// Flat-delta resolver seeded from `config.seed`
    pub fn from_config(config: &MatchConfig) -> Self {
        Self::new(
            Arc::new(FlatDeltaStrategy::new(config.win_delta, config.loss_delta)),
            Box::new(SeededRandom::from_seed_option(config.seed)),
        )
    }

    /// Resolve a contest between `a` and `b`. Pure apart from the random draws.
    pub fn resolve(&self, a: &PlayerRecord, b: &PlayerRecord) -> Result<MatchOutcome> {
        let (win_draw, finish_draw) = {
            let mut rng = self.rng.lock().map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire resolver random source".to_string(),
            })?;
            (rng.next_unit(), rng.next_unit())
        };

        let p_a = 0.5 + advantage(a.rating, b.rating);
        let (winner, loser) = if win_draw < p_a { (a, b) } else { (b, a) };

        let finish_type = if finish_draw < KNOCKOUT_PROBABILITY {
            FinishType::Knockout
        } else {
            FinishType::Decision
        };

        let (winner_new, loser_new) = self.strategy.apply(winner.rating, loser.rating);

        debug!(
            "Resolved '{}' vs '{}' (p_a={:.3}, draw={:.3}) using {}",
            a.id,
            b.id,
            p_a,
            win_draw,
            self.strategy.name()
        );

        Ok(MatchOutcome {
            match_id: generate_match_id(),
            player_a_id: a.id.clone(),
            player_b_id: b.id.clone(),
            winner_id: winner.id.clone(),
            loser_id: loser.id.clone(),
            winner_old_rating: winner.rating,
            winner_new_rating: winner_new,
            loser_old_rating: loser.rating,
            loser_new_rating: loser_new,
            finish_type,
            resolved_at: current_timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::random::ScriptedRandom;
    use crate::types::{PlayerEvent, Region};
    use proptest::prelude::*;

    fn record(id: &str, rating: Rating) -> PlayerRecord {
        PlayerRecord::from_event(&PlayerEvent::new(id, rating, Region::Europe))
    }

    fn scripted(draws: &[f64]) -> MatchResolver {
        MatchResolver::new(
            Arc::new(FlatDeltaStrategy::default()),
            Box::new(ScriptedRandom::new(draws.to_vec())),
        )
    }

    #[test]
    fn test_advantage_is_clamped() {
        assert_eq!(advantage(2000, 2000), 0.0);
        assert!((advantage(2100, 2000) - 0.05).abs() < 1e-9);
        assert_eq!(advantage(5000, 0), MAX_ADVANTAGE);
        assert_eq!(advantage(0, 5000), -MAX_ADVANTAGE);
    }

    #[test]
    fn test_first_draw_below_probability_means_a_wins() {
        let resolver = scripted(&[0.49, 0.9]);
        let outcome = resolver.resolve(&record("a", 2000), &record("b", 2000)).unwrap();

        assert_eq!(outcome.winner_id, "a");
        assert_eq!(outcome.loser_id, "b");
        assert_eq!(outcome.winner_new_rating, 2025);
        assert_eq!(outcome.loser_new_rating, 1975);
        assert_eq!(outcome.finish_type, FinishType::Decision);
    }

    #[test]
    fn test_advantage_shifts_the_cut() {
        // A is 300 ahead, so p_a = 0.65 and a draw of 0.6 still goes to A
        let resolver = scripted(&[0.6, 0.1]);
        let outcome = resolver.resolve(&record("a", 2300), &record("b", 2000)).unwrap();
        assert_eq!(outcome.winner_id, "a");
        assert_eq!(outcome.finish_type, FinishType::Knockout);

        // Same draw with the gap reversed goes to B
        let resolver = scripted(&[0.6, 0.1]);
        let outcome = resolver.resolve(&record("a", 2000), &record("b", 2300)).unwrap();
        assert_eq!(outcome.winner_id, "b");
        assert_eq!(outcome.winner_old_rating, 2300);
    }

    #[test]
    fn test_knockout_cut_is_exclusive() {
        let resolver = scripted(&[0.0, KNOCKOUT_PROBABILITY]);
        let outcome = resolver.resolve(&record("a", 1500), &record("b", 1500)).unwrap();
        assert_eq!(outcome.finish_type, FinishType::Decision);
    }

    #[test]
    fn test_ratings_clamped_at_bounds() {
        let resolver = scripted(&[0.0, 0.5]);
        let outcome = resolver.resolve(&record("top", 5000), &record("floor", 0)).unwrap();
        assert_eq!(outcome.winner_new_rating, 5000);
        assert_eq!(outcome.loser_new_rating, 0);
    }

    #[test]
    fn test_seeded_resolvers_agree() {
        let config = MatchConfig::default().with_seed(7);
        let first = MatchResolver::from_config(&config);
        let second = MatchResolver::from_config(&config);

        for _ in 0..20 {
            let x = first.resolve(&record("a", 2100), &record("b", 1900)).unwrap();
            let y = second.resolve(&record("a", 2100), &record("b", 1900)).unwrap();
            assert_eq!(x.winner_id, y.winner_id);
            assert_eq!(x.finish_type, y.finish_type);
        }
    }

    #[test]
    fn test_outcome_identifies_both_players() {
        let resolver = scripted(&[0.9, 0.9]);
        let outcome = resolver.resolve(&record("a", 1800), &record("b", 1810)).unwrap();
        assert!(outcome.involves("a"));
        assert!(outcome.involves("b"));
        assert_eq!(outcome.rating_change_for("b"), Some((1810, 1835)));
        assert_eq!(outcome.rating_change_for("a"), Some((1800, 1775)));
    }

    proptest! {
        #[test]
        fn prop_outcome_ratings_in_range(
            a in 0u32..=5000,
            b in 0u32..=5000,
            seed in any::<u64>(),
        ) {
            let resolver = MatchResolver::from_config(&MatchConfig::default().with_seed(seed));
            let outcome = resolver.resolve(&record("a", a), &record("b", b)).unwrap();

            prop_assert!(outcome.winner_new_rating <= 5000);
            prop_assert!(outcome.loser_new_rating <= outcome.loser_old_rating);
            prop_assert_ne!(outcome.winner_id, outcome.loser_id);
        }
    }
}
