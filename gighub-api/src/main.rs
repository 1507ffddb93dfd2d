//! gighub-api - GigHub HTTP server
//!
//! Serves the REST API and SSE broadcast channels. Unless
//! `server.run_workers` is off, the `ai` and `platforms` queue workers run in
//! this process and share its event bus, so their status events reach SSE
//! subscribers directly.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use gighub_api::{build_router, cors_layer, AppState};
use gighub_common::config::{config_file_path, load_toml_config, prepare_data_dir, resolve_data_dir};
use gighub_common::db::init_database;
use gighub_common::events::EventBus;
use gighub_services::platforms::PlatformRegistry;
use gighub_services::{build_generator, calendar, log_filter, spawn_workers, JobRunner, QUEUES};

#[derive(Parser, Debug)]
#[command(name = "gighub-api", version, about = "GigHub API server")]
struct Args {
    /// Path to gighub.toml
    #[arg(long, env = "GIGHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Data folder holding gighub.db
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Overrides server.host
    #[arg(long)]
    host: Option<String>,

    /// Overrides server.port
    #[arg(long, short)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = config_file_path(args.config.as_deref());
    let config = load_toml_config(&config_path)?;

    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref(), &config.logging.level))
        .init();

    info!(
        "Starting GigHub API v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Config file: {}", config_path.display());

    let data_dir = resolve_data_dir(args.data_dir.as_deref(), &config);
    let db_path = prepare_data_dir(&data_dir)?;
    info!("Database path: {}", db_path.display());
    let db = init_database(&db_path).await?;

    let event_bus = EventBus::new(100);
    let platforms = PlatformRegistry::from_config(&config.platforms, &config.server.public_url)?;
    let calendar = calendar::from_config(&config.calendar)?;

    let state = AppState::new(db.clone(), event_bus.clone())
        .with_platforms(platforms.clone())
        .with_calendar(calendar)
        .with_max_attempts(config.queue.max_attempts);

    let cancel = CancellationToken::new();
    let workers = if config.server.run_workers {
        let generator = build_generator(&db, &config.ai).await;
        let runner = Arc::new(JobRunner::new(db.clone(), event_bus, generator, platforms)?);
        info!("Running queue workers in-process: {}", QUEUES.join(", "));
        spawn_workers(&db, runner, &QUEUES, &config.queue, &cancel)
    } else {
        info!("In-process workers disabled; run gighub-worker separately");
        Vec::new()
    };

    let app = build_router(state).layer(cors_layer(&config.server.cors_origins));

    let host = args.host.unwrap_or_else(|| config.server.host.clone());
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    cancel.cancel();
    for handle in workers {
        if let Err(e) = handle.await {
            error!("Worker task ended abnormally: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
