//! # GigHub Services
//!
//! Background side of GigHub:
//! - LLM content generation with API key rotation ([`ai`])
//! - n8n template parsing ([`n8n`])
//! - Freelance platform OAuth clients ([`platforms`])
//! - Calendar sync for meetings ([`calendar`])
//! - Queue job handlers ([`jobs`]) and the workers that run them
//! - CSV workflow import ([`import`])
//!
//! Both `gighub-worker` and `gighub-api` (when `server.run_workers` is set)
//! start workers through [`spawn_workers`].

pub mod ai;
pub mod calendar;
pub mod config;
pub mod db;
pub mod import;
pub mod jobs;
pub mod n8n;
pub mod platforms;

pub use jobs::JobRunner;

use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tracing_subscriber::EnvFilter;

use gighub_common::config::{AiConfig, QueueConfig};
use gighub_common::queue::{JobHandler, Worker, WorkerOptions, AI_QUEUE, PLATFORMS_QUEUE};

use crate::ai::WorkflowAiGenerator;

/// Every queue a worker process serves by default
pub const QUEUES: [&str; 2] = [AI_QUEUE, PLATFORMS_QUEUE];

/// Log filter for a binary: `RUST_LOG` when set and valid, else `logging.level`
pub fn log_filter(rust_log: Option<&str>, configured: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(configured))
}

/// Build the AI generator from the resolved key list
///
/// Returns `None` (and logs why) when no keys are configured. The service
/// still starts; AI jobs fail until keys are added through settings.
pub async fn build_generator(db: &SqlitePool, config: &AiConfig) -> Option<Arc<WorkflowAiGenerator>> {
    let keys = match config::resolve_ai_api_keys(db, config).await {
        Ok(keys) => keys,
        Err(e) => {
            warn!("AI content generation disabled: {}", e);
            return None;
        }
    };

    match WorkflowAiGenerator::from_config(config, keys) {
        Ok(generator) => Some(Arc::new(generator)),
        Err(e) => {
            warn!("AI content generation disabled: {}", e);
            None
        }
    }
}

/// Spawn one worker task per queue name
pub fn spawn_workers(
    db: &SqlitePool,
    handler: Arc<dyn JobHandler>,
    queues: &[&str],
    config: &QueueConfig,
    cancel: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    queues
        .iter()
        .map(|queue| {
            let options = WorkerOptions::from_config(queue, config);
            let worker = Worker::new(db.clone(), Arc::clone(&handler), options);
            info!(queue = %queue, "Starting queue worker");
            tokio::spawn(worker.run(cancel.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_prefers_valid_rust_log() {
        assert_eq!(log_filter(None, "debug").to_string(), "debug");
        assert_eq!(
            log_filter(Some("gighub_services=trace"), "info").to_string(),
            "gighub_services=trace"
        );
        assert_eq!(log_filter(Some("gighub=notalevel"), "warn").to_string(), "warn");
    }
}
