//! SyncPlatformAccount: refresh tokens, pull profile and project feed

use anyhow::{anyhow, Context};
use chrono::Utc;
use tracing::{info, warn};

use gighub_common::db::PlatformAccount;

use super::JobRunner;
use crate::db::platform_accounts;
use crate::platforms::{PlatformClient, PlatformError};

/// Refresh tokens expiring within this many seconds
const TOKEN_LEEWAY_SECS: i64 = 60;

pub(super) async fn run(runner: &JobRunner, account_id: i64) -> anyhow::Result<()> {
    let Some(account) = platform_accounts::get_account(&runner.db, account_id).await? else {
        warn!(account_id, "Platform account no longer exists, skipping sync");
        return Ok(());
    };

    if !account.platform.supports_oauth() {
        info!(account_id, platform = %account.platform, "Manually linked account, nothing to sync");
        return Ok(());
    }

    let client = runner.platforms.get(account.platform)?;
    let access_token = valid_access_token(runner, client.as_ref(), &account).await?;

    let profile = match client.fetch_profile(&access_token).await {
        Err(PlatformError::Unauthorized) => {
            platform_accounts::set_status(&runner.db, account.id, "expired").await?;
            return Err(anyhow!("{} rejected the access token", account.platform));
        }
        other => other.context("Fetch profile")?,
    };

    let projects = client
        .fetch_projects(&access_token)
        .await
        .context("Fetch projects")?;
    let written = platform_accounts::upsert_projects(&runner.db, account.id, &projects).await?;

    platform_accounts::mark_synced(
        &runner.db,
        account.id,
        &profile.external_id,
        profile.username.as_deref(),
    )
    .await?;

    info!(
        account_id,
        platform = %account.platform,
        projects = projects.len(),
        written,
        "Platform account synced"
    );

    runner.notify_user(
        account.user_id,
        "platform_synced",
        format!("{} synced", account.platform),
        format!("{} projects fetched", projects.len()),
    );
    Ok(())
}

/// Stored access token, refreshed first when it is (nearly) expired
async fn valid_access_token(
    runner: &JobRunner,
    client: &dyn PlatformClient,
    account: &PlatformAccount,
) -> anyhow::Result<String> {
    let current = account
        .access_token
        .clone()
        .ok_or_else(|| anyhow!("Account {} has no access token", account.id))?;

    if !account.token_expired(Utc::now(), TOKEN_LEEWAY_SECS) {
        return Ok(current);
    }

    let Some(refresh_token) = account.refresh_token.as_deref() else {
        platform_accounts::set_status(&runner.db, account.id, "expired").await?;
        return Err(anyhow!(
            "Access token for account {} expired and no refresh token is stored",
            account.id
        ));
    };

    info!(account_id = account.id, platform = %account.platform, "Refreshing access token");
    let token = client.refresh(refresh_token).await.context("Refresh token")?;
    platform_accounts::update_tokens(
        &runner.db,
        account.id,
        &token.access_token,
        token.refresh_token.as_deref(),
        token.expires_at,
    )
    .await?;
    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::platform_accounts::{
        get_account, list_projects_for_user, save_account, AccountUpsert,
    };
    use crate::platforms::{OAuthToken, PlatformRegistry, RemoteProfile, RemoteProject};
    use async_trait::async_trait;
    use chrono::Duration;
    use gighub_common::db::{init_memory_pool, Platform};
    use gighub_common::events::{EventBus, HubEvent};
    use gighub_common::queue::{Job, JobHandler};
    use std::sync::{Arc, Mutex};

    /// Upwork stand-in accepting exactly one access token
    struct FakeUpwork {
        valid_token: Mutex<String>,
        refreshed: Mutex<bool>,
    }

    impl FakeUpwork {
        fn new(valid: &str) -> Arc<Self> {
            Arc::new(Self {
                valid_token: Mutex::new(valid.to_string()),
                refreshed: Mutex::new(false),
            })
        }

        fn check(&self, token: &str) -> Result<(), PlatformError> {
            if *self.valid_token.lock().unwrap() == token {
                Ok(())
            } else {
                Err(PlatformError::Unauthorized)
            }
        }
    }

    #[async_trait]
    impl PlatformClient for FakeUpwork {
        fn platform(&self) -> Platform {
            Platform::Upwork
        }

        fn authorize_url(&self, state: &str) -> Result<String, PlatformError> {
            Ok(format!("https://upwork.test/authorize?state={}", state))
        }

        async fn exchange_code(&self, _code: &str) -> Result<OAuthToken, PlatformError> {
            unreachable!()
        }

        async fn refresh(&self, _refresh_token: &str) -> Result<OAuthToken, PlatformError> {
            *self.refreshed.lock().unwrap() = true;
            *self.valid_token.lock().unwrap() = "fresh".into();
            Ok(OAuthToken {
                access_token: "fresh".into(),
                refresh_token: None,
                expires_at: Some(Utc::now() + Duration::hours(1)),
            })
        }

        async fn fetch_profile(&self, access_token: &str) -> Result<RemoteProfile, PlatformError> {
            self.check(access_token)?;
            Ok(RemoteProfile {
                external_id: "up-77".into(),
                username: Some("ana".into()),
                display_name: None,
            })
        }

        async fn fetch_projects(&self, access_token: &str) -> Result<Vec<RemoteProject>, PlatformError> {
            self.check(access_token)?;
            Ok(vec![RemoteProject {
                external_id: "job-1".into(),
                title: "Automate invoices".into(),
                description: None,
                budget: Some(300.0),
                currency: Some("USD".into()),
                url: None,
                posted_at: None,
            }])
        }
    }

    async fn setup(
        token: &str,
        expires_in: Option<Duration>,
        refresh: Option<&str>,
    ) -> (sqlx::SqlitePool, i64, i64) {
        let db = init_memory_pool().await.unwrap();
        let user_id: i64 = sqlx::query_scalar(
            "INSERT INTO users (name, email, password_hash, created_at) VALUES ('Ana', 'ana@example.com', 'x', ?) RETURNING id",
        )
        .bind(Utc::now())
        .fetch_one(&db)
        .await
        .unwrap();
        let account = save_account(
            &db,
            &AccountUpsert {
                user_id,
                platform: Platform::Upwork,
                external_id: None,
                username: None,
                access_token: Some(token.into()),
                refresh_token: refresh.map(String::from),
                token_expires_at: expires_in.map(|d| Utc::now() + d),
            },
        )
        .await
        .unwrap();
        (db, user_id, account.id)
    }

    #[tokio::test]
    async fn test_sync_upserts_projects_and_notifies_owner() {
        let (db, user_id, account_id) = setup("good", Some(Duration::hours(2)), None).await;
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let registry = PlatformRegistry::new().with(FakeUpwork::new("good"));
        let runner = JobRunner::new(db.clone(), bus, None, registry).unwrap();

        runner.handle(Job::SyncPlatformAccount { account_id }).await.unwrap();

        let account = get_account(&db, account_id).await.unwrap().unwrap();
        assert!(account.last_synced_at.is_some());
        assert_eq!(account.external_id.as_deref(), Some("up-77"));
        let (projects, total) = list_projects_for_user(&db, user_id, None, 15, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(projects[0].title, "Automate invoices");

        match rx.try_recv().unwrap() {
            HubEvent::UserNotification { user_id: to, kind, .. } => {
                assert_eq!(to, user_id);
                assert_eq!(kind, "platform_synced");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_first() {
        let (db, _, account_id) = setup("stale", Some(-Duration::minutes(5)), Some("refresh-me")).await;
        let fake = FakeUpwork::new("not-yet");
        let registry = PlatformRegistry::new().with(fake.clone());
        let runner = JobRunner::new(db.clone(), EventBus::new(8), None, registry).unwrap();

        runner.handle(Job::SyncPlatformAccount { account_id }).await.unwrap();

        assert!(*fake.refreshed.lock().unwrap());
        let account = get_account(&db, account_id).await.unwrap().unwrap();
        assert_eq!(account.access_token.as_deref(), Some("fresh"));
        // Provider did not rotate the refresh token; the stored one is kept
        assert_eq!(account.refresh_token.as_deref(), Some("refresh-me"));
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_fails() {
        let (db, _, account_id) = setup("stale", Some(-Duration::minutes(5)), None).await;
        let registry = PlatformRegistry::new().with(FakeUpwork::new("stale"));
        let runner = JobRunner::new(db.clone(), EventBus::new(8), None, registry).unwrap();

        assert!(runner.handle(Job::SyncPlatformAccount { account_id }).await.is_err());
        let account = get_account(&db, account_id).await.unwrap().unwrap();
        assert_eq!(account.status, "expired");
    }

    #[tokio::test]
    async fn test_rejected_token_marks_account_expired() {
        let (db, _, account_id) = setup("revoked", None, None).await;
        let registry = PlatformRegistry::new().with(FakeUpwork::new("other"));
        let runner = JobRunner::new(db.clone(), EventBus::new(8), None, registry).unwrap();

        assert!(runner.handle(Job::SyncPlatformAccount { account_id }).await.is_err());
        let account = get_account(&db, account_id).await.unwrap().unwrap();
        assert_eq!(account.status, "expired");
    }

    #[tokio::test]
    async fn test_final_failure_notifies_owner() {
        let (db, user_id, account_id) = setup("revoked", None, None).await;
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let runner = JobRunner::new(db.clone(), bus, None, PlatformRegistry::new()).unwrap();

        let job = Job::SyncPlatformAccount { account_id };
        let err = runner.handle(job.clone()).await.unwrap_err();
        runner.failed(&job, &err.to_string()).await;

        let account = get_account(&db, account_id).await.unwrap().unwrap();
        assert_eq!(account.status, "error");
        match rx.try_recv().unwrap() {
            HubEvent::UserNotification { user_id: to, kind, .. } => {
                assert_eq!(to, user_id);
                assert_eq!(kind, "platform_sync_failed");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
