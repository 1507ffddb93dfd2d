//! Queue worker loop

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{backoff_for, bury, complete, release, reserve, Job, QueuedJob};
use crate::config::QueueConfig;
use crate::Result;

/// Executes jobs pulled from a queue
///
/// Returning `Err` makes the worker retry the job with backoff until its
/// attempts are exhausted.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;

    /// Called once when a job is buried after its final attempt
    async fn failed(&self, _job: &Job, _error: &str) {}
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub queue: String,
    pub poll_interval: Duration,
    pub retry_after: Duration,
    pub backoff: Vec<Duration>,
}

impl WorkerOptions {
    pub fn from_config(queue: &str, config: &QueueConfig) -> Self {
        Self {
            queue: queue.to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            retry_after: Duration::from_secs(config.retry_after_secs),
            backoff: config
                .backoff_secs
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }
}

pub struct Worker {
    db: SqlitePool,
    handler: Arc<dyn JobHandler>,
    options: WorkerOptions,
}

impl Worker {
    pub fn new(db: SqlitePool, handler: Arc<dyn JobHandler>, options: WorkerOptions) -> Self {
        Self {
            db,
            handler,
            options,
        }
    }

    /// Process at most one job. Returns `true` when a job was handled.
    pub async fn work_once(&self) -> Result<bool> {
        let Some(queued) = reserve(&self.db, &self.options.queue, self.options.retry_after).await?
        else {
            return Ok(false);
        };

        let job = match queued.job() {
            Ok(job) => job,
            Err(e) => {
                // Undecodable payload never succeeds
                bury(&self.db, &queued, &format!("Invalid payload: {}", e)).await?;
                return Ok(true);
            }
        };

        info!(
            job_id = queued.id,
            kind = %queued.kind,
            attempt = queued.attempts,
            max_attempts = queued.max_attempts,
            "Processing job"
        );

        match self.handler.handle(job.clone()).await {
            Ok(()) => {
                complete(&self.db, queued.id).await?;
                info!(job_id = queued.id, kind = %queued.kind, "Job completed");
            }
            Err(e) => self.handle_failure(&queued, &job, e).await?,
        }

        Ok(true)
    }

    async fn handle_failure(&self, queued: &QueuedJob, job: &Job, err: anyhow::Error) -> Result<()> {
        let message = format!("{:#}", err);
        error!(
            job_id = queued.id,
            kind = %queued.kind,
            attempt = queued.attempts,
            error = %message,
            "Job failed"
        );

        if queued.attempts_exhausted() {
            bury(&self.db, queued, &message).await?;
            self.handler.failed(job, &message).await;
        } else {
            let delay = backoff_for(&self.options.backoff, queued.attempts);
            warn!(
                job_id = queued.id,
                retry_in_secs = delay.as_secs(),
                "Job released for retry"
            );
            release(&self.db, queued.id, delay).await?;
        }
        Ok(())
    }

    /// Poll the queue until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        info!(queue = %self.options.queue, "Queue worker started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let idle = match self.work_once().await {
                Ok(processed) => !processed,
                Err(e) => {
                    error!(queue = %self.options.queue, error = %e, "Queue poll failed");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.options.poll_interval) => {}
                }
            }
        }

        info!(queue = %self.options.queue, "Queue worker stopped");
    }
}
