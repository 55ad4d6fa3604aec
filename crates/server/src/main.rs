//! trove server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trove_core::config::AppConfig;
use trove_metadata::MetadataStore;
use trove_server::bootstrap::ensure_admin;
use trove_server::lifecycle::WorkerPool;
use trove_server::lifecycle::sweeper::{spawn_retention_sweeper, spawn_session_sweeper};
use trove_server::{AppState, create_router};

/// trove - A multi-user file store
#[derive(Parser, Debug)]
#[command(name = "troved")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TROVE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Message recorded on uploads a previous process left unsettled.
const INTERRUPTED_MESSAGE: &str = "Upload interrupted by server restart";

/// Fail rows a previous process left `pending` or `uploading`, and clear the
/// streaming staging area they pointed into. Sessions caught mid-completion go
/// back to `active` so the client can retry. No worker is running yet.
async fn recover_interrupted_uploads(
    metadata: &Arc<dyn MetadataStore>,
    state: &AppState,
) -> Result<()> {
    let failed = metadata
        .fail_unsettled_files(INTERRUPTED_MESSAGE, OffsetDateTime::now_utc())
        .await
        .context("failed to recover interrupted uploads")?;
    if failed > 0 {
        tracing::warn!(count = failed, "Marked interrupted uploads as failed");
    }

    let released = metadata
        .release_claimed_sessions(OffsetDateTime::now_utc())
        .await
        .context("failed to release interrupted upload sessions")?;
    if released > 0 {
        tracing::warn!(count = released, "Returned interrupted upload sessions to active");
    }

    let streaming = state.temp.streaming_dir();
    match tokio::fs::remove_dir_all(&streaming).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %streaming.display(), error = %e, "Failed to clear streaming staging area");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Startup banner
    tracing::info!("trove v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration (file is optional, env vars can provide/override everything)
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    let has_config_file = config_path.exists();

    if has_config_file {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }

    // Check for TROVE_ environment variables (excluding TROVE_CONFIG which is just the path)
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("TROVE_") && key != "TROVE_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: troved --config /path/to/config.toml\n  \
             2. Environment variables: TROVE_SERVER__BIND=0.0.0.0:8080 \
             TROVE_ADMIN__TOKEN_HASH=sha256:YOUR_TOKEN_HASH_HERE troved\n\n\
             See config/server.example.toml for example configuration.\n\
             Set TROVE_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("TROVE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    // Register Prometheus metrics
    trove_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // Initialize storage backend
    let storage = trove_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Verify storage connectivity before accepting requests.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    // Initialize metadata store
    let metadata = trove_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!("Metadata store initialized");

    // Initialize admin user and token
    ensure_admin(metadata.as_ref(), &config.admin, &config.quota).await?;

    // Start the upload worker pool
    let (pool, uploads) = WorkerPool::start(
        config.uploads.worker_count,
        config.uploads.queue_capacity,
        metadata.clone(),
        storage.clone(),
    );

    // Create application state
    let state = AppState::new(config.clone(), storage, metadata.clone(), uploads);
    tokio::fs::create_dir_all(state.temp.root())
        .await
        .with_context(|| format!("failed to create temp root {}", state.temp.root().display()))?;
    tracing::info!(temp_root = %state.temp.root().display(), "Upload staging area ready");

    recover_interrupted_uploads(&metadata, &state).await?;

    // Spawn background sweepers
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention = spawn_retention_sweeper(state.clone(), shutdown_rx.clone());
    let sessions = spawn_session_sweeper(state.clone(), shutdown_rx);

    // Create router
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    tracing::info!(bind = %config.server.bind, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Stop the sweepers, then drain the queue.
    let _ = shutdown_tx.send(true);
    for (name, handle) in [("retention", retention), ("sessions", sessions)] {
        if let Err(e) = handle.await {
            tracing::error!(sweeper = name, error = %e, "Sweeper task failed");
        }
    }
    pool.shutdown().await;
    tracing::info!("Server stopped");

    Ok(())
}
