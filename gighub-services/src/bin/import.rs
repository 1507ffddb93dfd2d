//! gighub-import - bulk import tools
//!
//! ```text
//! gighub-import workflows catalog.csv
//! gighub-import workflows catalog.csv --no-dispatch
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use gighub_common::config::{config_file_path, load_toml_config, prepare_data_dir, resolve_data_dir};
use gighub_common::db::init_database;
use gighub_services::import::{import_workflows_csv, ImportOptions};
use gighub_services::log_filter;

#[derive(Parser, Debug)]
#[command(name = "gighub-import", version, about = "Bulk import data into GigHub")]
struct Cli {
    /// Path to gighub.toml
    #[arg(long, env = "GIGHUB_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Data folder holding gighub.db
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import n8n workflows from a CSV file
    Workflows {
        /// CSV with columns title,category,description,source_url,template_path
        file: PathBuf,

        /// Create workflows without queueing AI processing
        #[arg(long)]
        no_dispatch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_toml_config(&config_file_path(cli.config.as_deref()))?;

    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref(), &config.logging.level))
        .init();

    info!(
        "Starting GigHub import v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let db_path = prepare_data_dir(&resolve_data_dir(cli.data_dir.as_deref(), &config))?;
    let db = init_database(&db_path).await?;

    match cli.command {
        Command::Workflows { file, no_dispatch } => {
            let options = ImportOptions {
                dispatch: !no_dispatch,
                max_attempts: config.queue.max_attempts,
            };
            let report = import_workflows_csv(&db, &file, &options).await?;

            println!(
                "Imported {} workflows ({} queued for processing), skipped {}",
                report.imported.len(),
                report.dispatched,
                report.skipped.len()
            );
            for row in &report.skipped {
                println!("  line {}: {}", row.line, row.reason);
            }
        }
    }

    Ok(())
}
