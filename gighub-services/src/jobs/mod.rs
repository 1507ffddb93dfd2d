//! Queue job handlers
//!
//! [`JobRunner`] implements [`JobHandler`] for every [`Job`] variant. Handlers
//! log and return their error so the queue retries the job with backoff.

mod process_workflow;
mod regenerate;
mod sync_platform;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use gighub_common::config::get_user_agent;
use gighub_common::db::AiStatus;
use gighub_common::events::{EventBus, HubEvent};
use gighub_common::queue::{Job, JobHandler};

use crate::ai::WorkflowAiGenerator;
use crate::db::{platform_accounts, workflows};
use crate::platforms::PlatformRegistry;

/// Shared dependencies of the job handlers
pub struct JobRunner {
    db: SqlitePool,
    event_bus: EventBus,
    generator: Option<Arc<WorkflowAiGenerator>>,
    platforms: PlatformRegistry,
    http: reqwest::Client,
}

impl JobRunner {
    /// `generator` is `None` when no AI API keys are configured; AI jobs then
    /// fail and are retried until keys appear or attempts run out.
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        generator: Option<Arc<WorkflowAiGenerator>>,
        platforms: PlatformRegistry,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(get_user_agent())
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            db,
            event_bus,
            generator,
            platforms,
            http,
        })
    }

    fn generator(&self) -> anyhow::Result<&WorkflowAiGenerator> {
        self.generator
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No AI API keys configured"))
    }

    /// Persist a workflow status change and broadcast it on `workflows`
    async fn set_workflow_status(
        &self,
        workflow_id: i64,
        status: AiStatus,
        error: Option<&str>,
    ) -> anyhow::Result<()> {
        workflows::set_ai_status(&self.db, workflow_id, status, error).await?;
        self.event_bus.emit_lossy(HubEvent::WorkflowAiStatusChanged {
            workflow_id,
            status,
            error: error.map(String::from),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn notify_user(&self, user_id: i64, kind: &str, title: String, body: String) {
        self.event_bus.emit_lossy(HubEvent::UserNotification {
            user_id,
            kind: kind.to_string(),
            title,
            body,
            timestamp: Utc::now(),
        });
    }
}

#[async_trait]
impl JobHandler for JobRunner {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        match job {
            Job::ProcessN8nWorkflow { workflow_id } => {
                process_workflow::run(self, workflow_id).await
            }
            Job::RegenerateWorkflowAiContent {
                workflow_id,
                sections,
            } => regenerate::run(self, workflow_id, &sections).await,
            Job::SyncPlatformAccount { account_id } => sync_platform::run(self, account_id).await,
        }
    }

    async fn failed(&self, job: &Job, error: &str) {
        if let Job::SyncPlatformAccount { account_id } = job {
            match platform_accounts::get_account(&self.db, *account_id).await {
                Ok(Some(account)) => {
                    if let Err(e) = platform_accounts::set_status(&self.db, account.id, "error").await {
                        tracing::error!(account_id, error = %e, "Failed to mark account as errored");
                    }
                    self.notify_user(
                        account.user_id,
                        "platform_sync_failed",
                        format!("{} sync failed", account.platform),
                        error.to_string(),
                    );
                }
                Ok(None) => {}
                Err(e) => tracing::error!(account_id, error = %e, "Failed to load account"),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::ai::client::{ChatRequest, CompletionTransport, TransportError, TransportResponse};

    /// Answers each prompt kind with canned content
    #[derive(Default)]
    pub struct CannedTransport {
        pub calls: AtomicUsize,
        /// Status returned for every call when set
        pub fail_with: Option<u16>,
    }

    fn completion(content: &str) -> TransportResponse {
        TransportResponse {
            status: 200,
            body: serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": content}}]
            })
            .to_string(),
        }
    }

    #[async_trait]
    impl CompletionTransport for CannedTransport {
        async fn send(
            &self,
            _api_key: &str,
            request: &ChatRequest,
        ) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.fail_with {
                return Ok(TransportResponse {
                    status,
                    body: "{}".into(),
                });
            }

            let prompt = &request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let content = if prompt.contains("TITLE:") {
                "TITLE: Canned title\nDESCRIPTION: Canned description".to_string()
            } else if prompt.contains("JSON array") {
                r#"[{"question":"Canned?","answer":"Yes."}]"#.to_string()
            } else {
                "# Canned post\n\nBody.".to_string()
            };
            Ok(completion(&content))
        }
    }
}
