//! Main entry point for the Sparring Ring matchmaking service
//!
//! This is the production entry point that initializes and runs the
//! complete matchmaking microservice with proper error handling,
//! logging, and graceful shutdown.

use anyhow::{Context, Result};
use clap::Parser;
use sparring_ring::config::{validate_config, AppConfig, ThresholdConfig};
use sparring_ring::metrics::{HealthServer, HealthServerConfig, MetricsService};
use sparring_ring::service::{AppState, HealthCheck};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// Sparring Ring Matchmaking Service - MMR and region based one-on-one matching
#[derive(Parser)]
#[command(
    name = "sparring-ring",
    version,
    about = "A matchmaking microservice pairing players by MMR within their region",
    long_about = "Sparring Ring consumes player-state events from AMQP, pairs each idle player \
                 with the closest-rated waiting opponent from the same region, simulates the \
                 contest and commits both players' new ratings together."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// MMR threshold override
    #[arg(
        long,
        value_name = "THRESHOLD",
        help = "Override MMR threshold, e.g. 200 or Europe=150,Asia=250"
    )]
    mmr_threshold: Option<String>,

    /// Allow matching across regions
    #[arg(long, help = "Match players from any region in one global pool")]
    cross_region: bool,

    /// Seed for reproducible outcomes
    #[arg(long, value_name = "SEED", help = "Seed the outcome RNG for reproducible runs")]
    seed: Option<u64>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics server port")]
    health_port: Option<u16>,

    /// Simulated contest length override
    #[arg(
        long,
        value_name = "MS",
        help = "Override simulated contest length in milliseconds"
    )]
    match_delay_ms: Option<u64>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Log a health summary periodically
async fn health_check_task(app_state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));

    while app_state.is_running().await {
        interval.tick().await;

        match HealthCheck::check(app_state.clone()).await {
            Ok(health) => {
                info!(
                    "Health check: {} - {} waiting, {} matches resolved, {} persistence failures",
                    health.status,
                    health.stats.players_waiting,
                    health.stats.matches_resolved,
                    health.stats.persistence_failures
                );
            }
            Err(e) => {
                warn!("Health check failed: {}", e);
            }
        }
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("Sparring Ring Matchmaking Service v{}", sparring_ring::VERSION);
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   AMQP: {}", config.amqp.url);
    info!("   MMR threshold: {:?}", config.matchmaking.mmr_threshold);
    info!(
        "   Same region only: {}",
        config.matchmaking.same_region_only
    );
    info!(
        "   Simulated contest: {}ms",
        config.matchmaking.simulated_match_ms
    );
    match config.matchmaking.seed {
        Some(seed) => info!("   Outcome seed: {}", seed),
        None => info!("   Outcome seed: entropy"),
    }
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(threshold) = &args.mmr_threshold {
        config.matchmaking.mmr_threshold = threshold
            .parse::<ThresholdConfig>()
            .with_context(|| format!("Invalid --mmr-threshold value: {}", threshold))?;
    }

    if args.cross_region {
        config.matchmaking.same_region_only = false;
    }

    if let Some(seed) = args.seed {
        config.matchmaking.seed = Some(seed);
    }

    if let Some(port) = args.health_port {
        config.service.health_port = port;
    }

    if let Some(delay) = args.match_delay_ms {
        config.matchmaking.simulated_match_ms = delay;
    }

    // Overrides must satisfy the same rules as the file
    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    info!("Initializing service components...");
    let app_state = match AppState::new(config.clone()).await {
        Ok(state) => Arc::new(state),
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    let health_server = HealthServer::new(
        HealthServerConfig {
            port: config.service.health_port,
            ..HealthServerConfig::default()
        },
        app_state.metrics_collector(),
    )
    .with_app_state(app_state.clone());
    let metrics_service = MetricsService::new(app_state.metrics_collector(), Arc::new(health_server));

    let health_server_task = {
        let metrics_service = metrics_service.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Health server failed: {}", e);
            }
        })
    };

    info!("Starting service...");
    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    let health_task = tokio::spawn(health_check_task(app_state.clone()));

    info!("Sparring Ring Matchmaking Service is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, beginning graceful shutdown...");
    health_task.abort();

    let shutdown = async {
        if let Err(e) = app_state.shutdown().await {
            error!("Service shutdown failed: {}", e);
        }
        if let Err(e) = metrics_service.stop().await {
            warn!("Failed to stop health server: {}", e);
        }
        let _ = health_server_task.await;
    };

    match tokio::time::timeout(config.shutdown_timeout(), shutdown).await {
        Ok(()) => info!("Graceful shutdown completed successfully"),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    info!("Sparring Ring Matchmaking Service stopped");
    Ok(())
}
