//! Assignment Engine (corvee-ae) - Main entry point
//!
//! Serves next-item assignment requests over HTTP, consumes priority
//! signals from background jobs, and sweeps abandoned reservations.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use corvee_common::config::{resolve_config_path, EngineConfig};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use corvee_ae::api;
use corvee_ae::dataset;
use corvee_ae::db;
use corvee_ae::engine::Engine;

/// Command-line arguments for corvee-ae
#[derive(Parser, Debug)]
#[command(name = "corvee-ae")]
#[command(about = "Instance assignment & prioritization engine")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5780", env = "CORVEE_PORT")]
    port: u16,

    /// Items dataset (JSONL, one item per line)
    #[arg(short, long, env = "CORVEE_DATASET")]
    dataset: PathBuf,

    /// Engine configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SQLite database for expertise persistence (created if missing)
    #[arg(long, env = "CORVEE_DB")]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "corvee_ae=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command-line arguments
    let args = Args::parse();

    info!("Starting corvée assignment engine on port {}", args.port);

    // Resolve and load configuration
    let config_path = resolve_config_path(args.config.as_deref());
    if let Some(path) = &config_path {
        info!("Configuration file: {}", path.display());
    }
    let mut config = EngineConfig::load_or_default(config_path.as_deref())
        .context("Failed to load configuration")?;
    config
        .apply_env_overrides()
        .context("Failed to apply environment overrides")?;

    // Load the dataset
    let items = dataset::load_jsonl(&args.dataset).context("Failed to load dataset")?;
    info!("Loaded {} items from {}", items.len(), args.dataset.display());

    // Build the engine
    let mut engine = Engine::new(config, items).context("Failed to initialize engine")?;
    if let Some(db_path) = &args.db {
        let pool = db::connect(db_path)
            .await
            .context("Failed to open expertise database")?;
        engine = engine
            .with_persistence(pool)
            .await
            .context("Failed to load persisted expertise profiles")?;
        info!("Expertise persistence enabled at {}", db_path.display());
    }
    let engine = Arc::new(engine);
    engine.start();
    info!(
        "Assignment engine initialized (strategy: {})",
        engine.active_strategy_name()
    );

    // Build the application router
    let app_state = api::AppState {
        engine,
        port: args.port,
    };
    let app = api::create_router(app_state);

    // Create socket address
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));

    info!("Starting HTTP server on {}", addr);

    // Create and run the server
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
