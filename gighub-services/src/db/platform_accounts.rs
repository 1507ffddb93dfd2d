//! Platform accounts, synced projects and OAuth state values

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use gighub_common::auth::random_string;
use gighub_common::db::{Platform, PlatformAccount, PlatformProject};
use gighub_common::Result;

use crate::platforms::RemoteProject;

const ACCOUNT_COLUMNS: &str = "id, user_id, platform, external_id, username, access_token, \
     refresh_token, token_expires_at, status, last_synced_at, created_at";

const PROJECT_COLUMNS: &str = "p.id, p.platform_account_id, p.external_id, p.title, p.description, \
     p.budget, p.currency, p.url, p.posted_at, p.fetched_at";

/// Lifetime of an OAuth `state` value
pub const OAUTH_STATE_TTL_MINUTES: i64 = 10;

const OAUTH_STATE_LEN: usize = 40;

/// Insert or replace the account a user holds on a platform
#[derive(Debug, Clone)]
pub struct AccountUpsert {
    pub user_id: i64,
    pub platform: Platform,
    pub external_id: Option<String>,
    pub username: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

pub async fn save_account(db: &SqlitePool, account: &AccountUpsert) -> Result<PlatformAccount> {
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO platform_accounts (user_id, platform, external_id, username, access_token,
                                       refresh_token, token_expires_at, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, 'connected', ?)
        ON CONFLICT (user_id, platform) DO UPDATE SET
            external_id = excluded.external_id,
            username = excluded.username,
            access_token = excluded.access_token,
            refresh_token = excluded.refresh_token,
            token_expires_at = excluded.token_expires_at,
            status = 'connected'
        RETURNING id
        "#,
    )
    .bind(account.user_id)
    .bind(account.platform)
    .bind(&account.external_id)
    .bind(&account.username)
    .bind(&account.access_token)
    .bind(&account.refresh_token)
    .bind(account.token_expires_at)
    .bind(Utc::now())
    .fetch_one(db)
    .await?;

    tracing::info!(
        account_id = id,
        user_id = account.user_id,
        platform = %account.platform,
        "Platform account saved"
    );

    get_account(db, id)
        .await?
        .ok_or_else(|| gighub_common::Error::NotFound(format!("Platform account {}", id)))
}

pub async fn get_account(db: &SqlitePool, id: i64) -> Result<Option<PlatformAccount>> {
    Ok(sqlx::query_as::<_, PlatformAccount>(&format!(
        "SELECT {} FROM platform_accounts WHERE id = ?",
        ACCOUNT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(db)
    .await?)
}

/// Account on `platform` with `external_id`, whoever owns it
pub async fn find_by_external_id(
    db: &SqlitePool,
    platform: Platform,
    external_id: &str,
) -> Result<Option<PlatformAccount>> {
    Ok(sqlx::query_as::<_, PlatformAccount>(&format!(
        "SELECT {} FROM platform_accounts WHERE platform = ? AND external_id = ?",
        ACCOUNT_COLUMNS
    ))
    .bind(platform)
    .bind(external_id)
    .fetch_optional(db)
    .await?)
}

pub async fn list_accounts_for_user(db: &SqlitePool, user_id: i64) -> Result<Vec<PlatformAccount>> {
    Ok(sqlx::query_as::<_, PlatformAccount>(&format!(
        "SELECT {} FROM platform_accounts WHERE user_id = ? ORDER BY platform",
        ACCOUNT_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(db)
    .await?)
}

pub async fn delete_account(db: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM platform_accounts WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn update_tokens(
    db: &SqlitePool,
    id: i64,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE platform_accounts
        SET access_token = ?, refresh_token = COALESCE(?, refresh_token), token_expires_at = ?
        WHERE id = ?
        "#,
    )
    .bind(access_token)
    .bind(refresh_token)
    .bind(expires_at)
    .bind(id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn set_status(db: &SqlitePool, id: i64, status: &str) -> Result<()> {
    sqlx::query("UPDATE platform_accounts SET status = ? WHERE id = ?")
        .bind(status)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Record a successful sync and the profile fields it returned
pub async fn mark_synced(
    db: &SqlitePool,
    id: i64,
    external_id: &str,
    username: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE platform_accounts
        SET external_id = ?, username = COALESCE(?, username), status = 'connected', last_synced_at = ?
        WHERE id = ?
        "#,
    )
    .bind(external_id)
    .bind(username)
    .bind(Utc::now())
    .bind(id)
    .execute(db)
    .await?;
    Ok(())
}

/// Insert new projects and refresh existing ones, keyed by external id
///
/// Runs in one transaction. Returns the number of rows written.
pub async fn upsert_projects(
    db: &SqlitePool,
    account_id: i64,
    projects: &[RemoteProject],
) -> Result<u64> {
    let now = Utc::now();
    let mut tx = db.begin().await?;
    let mut written = 0;

    for project in projects {
        let result = sqlx::query(
            r#"
            INSERT INTO platform_projects (platform_account_id, external_id, title, description,
                                           budget, currency, url, posted_at, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (platform_account_id, external_id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                budget = excluded.budget,
                currency = excluded.currency,
                url = excluded.url,
                posted_at = excluded.posted_at,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(account_id)
        .bind(&project.external_id)
        .bind(&project.title)
        .bind(&project.description)
        .bind(project.budget)
        .bind(&project.currency)
        .bind(&project.url)
        .bind(project.posted_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        written += result.rows_affected();
    }

    tx.commit().await?;
    Ok(written)
}

/// Projects across all of a user's accounts, newest posting first
pub async fn list_projects_for_user(
    db: &SqlitePool,
    user_id: i64,
    platform: Option<Platform>,
    limit: i64,
    offset: i64,
) -> Result<(Vec<PlatformProject>, i64)> {
    const FROM: &str = r#"
        FROM platform_projects p
        JOIN platform_accounts a ON a.id = p.platform_account_id
        WHERE a.user_id = ?1 AND (?2 IS NULL OR a.platform = ?2)
    "#;

    let platform = platform.map(|p| p.as_str());

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) {}", FROM))
        .bind(user_id)
        .bind(platform)
        .fetch_one(db)
        .await?;

    let rows = sqlx::query_as::<_, PlatformProject>(&format!(
        "SELECT {} {} ORDER BY COALESCE(p.posted_at, p.fetched_at) DESC, p.id DESC LIMIT ?3 OFFSET ?4",
        PROJECT_COLUMNS, FROM
    ))
    .bind(user_id)
    .bind(platform)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;

    Ok((rows, total))
}

/// Issue a single-use OAuth `state` bound to a user and platform
pub async fn create_oauth_state(db: &SqlitePool, user_id: i64, platform: Platform) -> Result<String> {
    let state = random_string(OAUTH_STATE_LEN);
    let now = Utc::now();

    sqlx::query("DELETE FROM oauth_states WHERE expires_at <= ?")
        .bind(now)
        .execute(db)
        .await?;

    sqlx::query("INSERT INTO oauth_states (state, user_id, platform, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&state)
        .bind(user_id)
        .bind(platform)
        .bind(now + Duration::minutes(OAUTH_STATE_TTL_MINUTES))
        .execute(db)
        .await?;

    Ok(state)
}

/// Consume a `state` value, returning its user when valid for `platform`
///
/// The row is deleted whether or not it is still valid.
pub async fn consume_oauth_state(
    db: &SqlitePool,
    state: &str,
    platform: Platform,
) -> Result<Option<i64>> {
    let row: Option<(i64, Platform, DateTime<Utc>)> = sqlx::query_as(
        "DELETE FROM oauth_states WHERE state = ? RETURNING user_id, platform, expires_at",
    )
    .bind(state)
    .fetch_optional(db)
    .await?;

    Ok(match row {
        Some((user_id, stored, expires_at)) if stored == platform && expires_at > Utc::now() => {
            Some(user_id)
        }
        _ => None,
    })
}
