//! Configuration management for the sparring-ring service
//!
//! This module handles configuration loading from environment variables and
//! TOML files, validation, and default values for the matchmaking service.

pub mod app;
pub mod matchmaking;

// Re-export commonly used types
pub use app::{validate_config, AmqpSettings, AppConfig, MatchmakingSettings, ServiceSettings};
pub use matchmaking::{CommitPolicy, MatchConfig, ThresholdConfig, ThresholdTable};
