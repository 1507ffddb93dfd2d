//! gighub-worker - standalone queue worker
//!
//! Runs the `ai` and `platforms` queues outside the API process. Use it with
//! `server.run_workers = false` on the API side to scale workers separately.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gighub_common::config::{config_file_path, load_toml_config, prepare_data_dir, resolve_data_dir};
use gighub_common::db::init_database;
use gighub_common::events::EventBus;
use gighub_services::platforms::PlatformRegistry;
use gighub_services::{build_generator, log_filter, spawn_workers, JobRunner, QUEUES};

#[derive(Parser, Debug)]
#[command(name = "gighub-worker", version, about = "GigHub queue worker")]
struct Args {
    /// Path to gighub.toml
    #[arg(long, env = "GIGHUB_CONFIG")]
    config: Option<PathBuf>,

    /// Data folder holding gighub.db
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Queues to serve (default: all)
    #[arg(long = "queue", value_parser = clap::builder::PossibleValuesParser::new(QUEUES))]
    queues: Vec<String>,
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
        "Starting GigHub worker v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let data_dir = resolve_data_dir(args.data_dir.as_deref(), &config);
    let db_path = prepare_data_dir(&data_dir)?;
    info!("Database path: {}", db_path.display());
    let db = init_database(&db_path).await?;

    // Events emitted here only reach subscribers in this process
    let event_bus = EventBus::new(100);

    let generator = build_generator(&db, &config.ai).await;
    let platforms = PlatformRegistry::from_config(&config.platforms, &config.server.public_url)?;
    let runner = Arc::new(JobRunner::new(db.clone(), event_bus, generator, platforms)?);

    let queues: Vec<&str> = if args.queues.is_empty() {
        QUEUES.to_vec()
    } else {
        args.queues.iter().map(String::as_str).collect()
    };

    let cancel = CancellationToken::new();
    let handles = spawn_workers(&db, runner, &queues, &config.queue, &cancel);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, waiting for in-flight jobs");
    cancel.cancel();

    for handle in handles {
        handle.await?;
    }

    info!("Worker stopped");
    Ok(())
}
