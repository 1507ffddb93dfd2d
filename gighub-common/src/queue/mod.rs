//! Durable job queue backed by the `jobs` table
//!
//! Delivery is at-least-once: a job is claimed by incrementing `attempts` and
//! stamping `reserved_at`; a worker that dies mid-job leaves the reservation
//! behind, and the job becomes claimable again after `retry_after`.
//!
//! Lifecycle:
//! 1. [`dispatch`] inserts a row, available immediately (or after a delay)
//! 2. [`reserve`] claims the oldest available row on a queue
//! 3. [`complete`] deletes it, [`release`] makes it available again later,
//!    [`bury`] moves it to `failed_jobs`

mod worker;

pub use worker::{JobHandler, Worker, WorkerOptions};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::Result;

/// Queue for AI content generation jobs
pub const AI_QUEUE: &str = "ai";
/// Queue for freelance platform sync jobs
pub const PLATFORMS_QUEUE: &str = "platforms";

/// Workflow content sections that can be regenerated independently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentSection {
    Seo,
    BlogPost,
    Faqs,
}

impl ContentSection {
    pub const ALL: [ContentSection; 3] = [
        ContentSection::Seo,
        ContentSection::BlogPost,
        ContentSection::Faqs,
    ];
}

/// Units of background work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Job {
    /// Parse a workflow's n8n template and generate all AI content
    ProcessN8nWorkflow { workflow_id: i64 },

    /// Regenerate selected AI sections (empty = all) for an existing workflow
    RegenerateWorkflowAiContent {
        workflow_id: i64,
        #[serde(default)]
        sections: Vec<ContentSection>,
    },

    /// Refresh a connected platform account's profile and project feed
    SyncPlatformAccount { account_id: i64 },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::ProcessN8nWorkflow { .. } => "ProcessN8nWorkflow",
            Job::RegenerateWorkflowAiContent { .. } => "RegenerateWorkflowAiContent",
            Job::SyncPlatformAccount { .. } => "SyncPlatformAccount",
        }
    }

    pub fn queue(&self) -> &'static str {
        match self {
            Job::ProcessN8nWorkflow { .. } | Job::RegenerateWorkflowAiContent { .. } => AI_QUEUE,
            Job::SyncPlatformAccount { .. } => PLATFORMS_QUEUE,
        }
    }
}

/// A claimed job row
#[derive(Debug, Clone, FromRow)]
pub struct QueuedJob {
    pub id: i64,
    pub queue: String,
    pub kind: String,
    pub payload: String,
    pub attempts: i64,
    pub max_attempts: i64,
}

impl QueuedJob {
    pub fn job(&self) -> Result<Job> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Push a job onto its queue, available immediately
pub async fn dispatch(db: &SqlitePool, job: &Job, max_attempts: u32) -> Result<i64> {
    dispatch_delayed(db, job, max_attempts, Duration::ZERO).await
}

/// Push a job onto its queue, available after `delay`
pub async fn dispatch_delayed(
    db: &SqlitePool,
    job: &Job,
    max_attempts: u32,
    delay: Duration,
) -> Result<i64> {
    let payload = serde_json::to_string(job)?;
    let available_at = now_ms() + delay.as_millis() as i64;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO jobs (queue, kind, payload, attempts, max_attempts, available_at, created_at)
        VALUES (?, ?, ?, 0, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(job.queue())
    .bind(job.kind())
    .bind(&payload)
    .bind(max_attempts.max(1) as i64)
    .bind(available_at)
    .bind(Utc::now())
    .fetch_one(db)
    .await?;

    info!(job_id = id, queue = job.queue(), kind = job.kind(), "Job dispatched");
    Ok(id)
}

/// Claim the oldest available job on `queue`
///
/// A job is available when `available_at` has passed and it is either
/// unreserved or its reservation is older than `retry_after`. The claim is a
/// single UPDATE so two workers never receive the same reservation.
pub async fn reserve(
    db: &SqlitePool,
    queue: &str,
    retry_after: Duration,
) -> Result<Option<QueuedJob>> {
    let now = now_ms();
    let stale_before = now - retry_after.as_millis() as i64;

    let job = sqlx::query_as::<_, QueuedJob>(
        r#"
        UPDATE jobs
        SET reserved_at = ?1, attempts = attempts + 1
        WHERE id = (
            SELECT id FROM jobs
            WHERE queue = ?2
              AND available_at <= ?1
              AND (reserved_at IS NULL OR reserved_at <= ?3)
            ORDER BY available_at, id
            LIMIT 1
        )
        RETURNING id, queue, kind, payload, attempts, max_attempts
        "#,
    )
    .bind(now)
    .bind(queue)
    .bind(stale_before)
    .fetch_optional(db)
    .await?;

    if let Some(job) = &job {
        debug!(job_id = job.id, kind = %job.kind, attempt = job.attempts, "Job reserved");
    }
    Ok(job)
}

/// Job finished successfully
pub async fn complete(db: &SqlitePool, job_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(job_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Make a reserved job available again after `delay`
pub async fn release(db: &SqlitePool, job_id: i64, delay: Duration) -> Result<()> {
    sqlx::query("UPDATE jobs SET reserved_at = NULL, available_at = ? WHERE id = ?")
        .bind(now_ms() + delay.as_millis() as i64)
        .bind(job_id)
        .execute(db)
        .await?;
    Ok(())
}

/// Move a job to `failed_jobs`
pub async fn bury(db: &SqlitePool, job: &QueuedJob, error: &str) -> Result<()> {
    let mut tx = db.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO failed_jobs (queue, kind, payload, attempts, error, failed_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&job.queue)
    .bind(&job.kind)
    .bind(&job.payload)
    .bind(job.attempts)
    .bind(error)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM jobs WHERE id = ?")
        .bind(job.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    warn!(
        job_id = job.id,
        kind = %job.kind,
        attempts = job.attempts,
        error = %error,
        "Job moved to failed_jobs"
    );
    Ok(())
}

/// Delay before the next attempt after `attempts` failed ones
///
/// `backoff[attempts - 1]`, repeating the last entry; zero when empty.
pub fn backoff_for(backoff: &[Duration], attempts: i64) -> Duration {
    if backoff.is_empty() {
        return Duration::ZERO;
    }
    let idx = (attempts.max(1) as usize - 1).min(backoff.len() - 1);
    backoff[idx]
}

/// Number of pending (not yet completed or buried) jobs on a queue
pub async fn pending_count(db: &SqlitePool, queue: &str) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE queue = ?")
        .bind(queue)
        .fetch_one(db)
        .await?)
}

/// Number of buried jobs
pub async fn failed_count(db: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM failed_jobs")
        .fetch_one(db)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RETRY_AFTER: Duration = Duration::from_secs(600);

    #[test]
    fn test_job_payload_shape() {
        let job = Job::RegenerateWorkflowAiContent {
            workflow_id: 9,
            sections: vec![ContentSection::BlogPost],
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["kind"], "RegenerateWorkflowAiContent");
        assert_eq!(json["sections"][0], "blog_post");
        assert_eq!(job.queue(), AI_QUEUE);

        // sections default to empty
        let parsed: Job =
            serde_json::from_str(r#"{"kind":"RegenerateWorkflowAiContent","workflow_id":1}"#).unwrap();
        assert_eq!(
            parsed,
            Job::RegenerateWorkflowAiContent { workflow_id: 1, sections: vec![] }
        );
    }

    #[test]
    fn test_backoff_for_repeats_last_entry() {
        let backoff = [
            Duration::from_secs(10),
            Duration::from_secs(30),
            Duration::from_secs(60),
        ];
        assert_eq!(backoff_for(&backoff, 1), Duration::from_secs(10));
        assert_eq!(backoff_for(&backoff, 2), Duration::from_secs(30));
        assert_eq!(backoff_for(&backoff, 7), Duration::from_secs(60));
        assert_eq!(backoff_for(&[], 2), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_reserve_claims_oldest_and_increments_attempts() {
        let db = crate::db::init_memory_pool().await.unwrap();
        let first = dispatch(&db, &Job::ProcessN8nWorkflow { workflow_id: 1 }, 3).await.unwrap();
        dispatch(&db, &Job::ProcessN8nWorkflow { workflow_id: 2 }, 3).await.unwrap();

        let job = reserve(&db, AI_QUEUE, RETRY_AFTER).await.unwrap().unwrap();
        assert_eq!(job.id, first);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.job().unwrap(), Job::ProcessN8nWorkflow { workflow_id: 1 });

        // Reserved job is not handed out again
        let second = reserve(&db, AI_QUEUE, RETRY_AFTER).await.unwrap().unwrap();
        assert_ne!(second.id, first);
        assert!(reserve(&db, AI_QUEUE, RETRY_AFTER).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let db = crate::db::init_memory_pool().await.unwrap();
        dispatch(&db, &Job::SyncPlatformAccount { account_id: 4 }, 3).await.unwrap();

        assert!(reserve(&db, AI_QUEUE, RETRY_AFTER).await.unwrap().is_none());
        assert!(reserve(&db, PLATFORMS_QUEUE, RETRY_AFTER).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_delays_next_delivery() {
        let db = crate::db::init_memory_pool().await.unwrap();
        dispatch(&db, &Job::ProcessN8nWorkflow { workflow_id: 1 }, 3).await.unwrap();

        let job = reserve(&db, AI_QUEUE, RETRY_AFTER).await.unwrap().unwrap();
        release(&db, job.id, Duration::from_secs(30)).await.unwrap();
        assert!(reserve(&db, AI_QUEUE, RETRY_AFTER).await.unwrap().is_none());

        release(&db, job.id, Duration::ZERO).await.unwrap();
        let again = reserve(&db, AI_QUEUE, RETRY_AFTER).await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn test_stale_reservation_is_redelivered() {
        let db = crate::db::init_memory_pool().await.unwrap();
        dispatch(&db, &Job::ProcessN8nWorkflow { workflow_id: 1 }, 3).await.unwrap();

        let job = reserve(&db, AI_QUEUE, RETRY_AFTER).await.unwrap().unwrap();
        // Worker vanished; a zero retry_after treats the reservation as abandoned
        let redelivered = reserve(&db, AI_QUEUE, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(redelivered.id, job.id);
        assert_eq!(redelivered.attempts, 2);
    }

    #[tokio::test]
    async fn test_complete_and_bury() {
        let db = crate::db::init_memory_pool().await.unwrap();
        dispatch(&db, &Job::ProcessN8nWorkflow { workflow_id: 1 }, 1).await.unwrap();
        dispatch(&db, &Job::ProcessN8nWorkflow { workflow_id: 2 }, 1).await.unwrap();

        let a = reserve(&db, AI_QUEUE, RETRY_AFTER).await.unwrap().unwrap();
        complete(&db, a.id).await.unwrap();

        let b = reserve(&db, AI_QUEUE, RETRY_AFTER).await.unwrap().unwrap();
        assert!(b.attempts_exhausted());
        bury(&db, &b, "boom").await.unwrap();

        assert_eq!(pending_count(&db, AI_QUEUE).await.unwrap(), 0);
        assert_eq!(failed_count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delayed_dispatch_not_available_yet() {
        let db = crate::db::init_memory_pool().await.unwrap();
        dispatch_delayed(
            &db,
            &Job::SyncPlatformAccount { account_id: 1 },
            3,
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert!(reserve(&db, PLATFORMS_QUEUE, RETRY_AFTER).await.unwrap().is_none());
        assert_eq!(pending_count(&db, PLATFORMS_QUEUE).await.unwrap(), 1);
    }
}
