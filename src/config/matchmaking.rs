//! Matchmaking configuration
//!
//! The rating threshold can be configured either as one value for every region
//! or as a per-region table. Both shapes are resolved once, at load time, into a
//! [`ThresholdTable`] so the hot path never branches on the configured shape.

use crate::error::{MatchmakingError, Result};
use crate::types::{Rating, Region};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

/// Threshold as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdConfig {
    /// Same maximum rating difference everywhere
    Uniform(Rating),
    /// Maximum rating difference keyed by the incoming player's region
    PerRegion(BTreeMap<Region, Rating>),
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        ThresholdConfig::Uniform(200)
    }
}

impl FromStr for ThresholdConfig {
    type Err = anyhow::Error;

    /// Accepts `200` or `Europe=150,Asia=250`
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(value) = s.parse::<Rating>() {
            return Ok(ThresholdConfig::Uniform(value));
        }

        let mut table = BTreeMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (region, value) = pair.split_once('=').ok_or_else(|| {
                MatchmakingError::ConfigurationError {
                    message: format!("Invalid threshold entry '{}', expected Region=value", pair),
                }
            })?;
            let region: Region = region.parse().map_err(|_| MatchmakingError::ConfigurationError {
                message: format!("Unknown region in threshold entry '{}'", pair),
            })?;
            let value: Rating = value
                .trim()
                .parse()
                .map_err(|_| MatchmakingError::ConfigurationError {
                    message: format!("Invalid threshold value in entry '{}'", pair),
                })?;
            table.insert(region, value);
        }

        Ok(ThresholdConfig::PerRegion(table))
    }
}

/// Uniform per-region threshold lookup
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdTable {
    thresholds: BTreeMap<Region, Rating>,
    fallback: Rating,
}

impl ThresholdTable {
    /// Resolve a configured threshold. Regions missing from a per-region
    /// table fall back to the largest configured value.
    pub fn resolve(config: &ThresholdConfig) -> Result<Self> {
        match config {
            ThresholdConfig::Uniform(value) => Ok(Self::uniform(*value)),
            ThresholdConfig::PerRegion(table) => {
                let fallback = table.values().copied().max().ok_or_else(|| {
                    MatchmakingError::ConfigurationError {
                        message: "Per-region MMR threshold table is empty; no match would ever be possible"
                            .to_string(),
                    }
                })?;
                Ok(Self {
                    thresholds: table.clone(),
                    fallback,
                })
            }
        }
    }

    pub fn uniform(value: Rating) -> Self {
        Self {
            thresholds: BTreeMap::new(),
            fallback: value,
        }
    }

    /// Threshold applied to a player arriving from `region`
    pub fn for_region(&self, region: Region) -> Rating {
        self.thresholds
            .get(&region)
            .copied()
            .unwrap_or(self.fallback)
    }

    pub fn max_threshold(&self) -> Rating {
        self.fallback
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self::uniform(200)
    }
}

/// What to do when the durable commit of a match fails
#[derive(Debug, Clone, PartialEq)]
pub struct CommitPolicy {
    /// Total attempts per commit; 1 means log and drop
    pub max_attempts: u32,
    /// Delay before the first retry, doubled after each failure
    pub retry_delay: Duration,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Read-only matchmaking parameters shared by the coordinator and resolver
#[derive(Debug, Clone)]
pub struct MatchConfig {
    pub thresholds: ThresholdTable,
    pub win_delta: Rating,
    pub loss_delta: Rating,
    /// Fixed seed for reproducible outcomes; entropy when absent
    pub seed: Option<u64>,
    pub same_region_only: bool,
    /// How long a contest takes to play out before it is resolved
    pub simulated_match_duration: Duration,
    pub commit_policy: CommitPolicy,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdTable::default(),
            win_delta: 25,
            loss_delta: 25,
            seed: None,
            same_region_only: true,
            simulated_match_duration: Duration::ZERO,
            commit_policy: CommitPolicy::default(),
        }
    }
}

impl MatchConfig {
    pub fn with_threshold(mut self, thresholds: ThresholdTable) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
