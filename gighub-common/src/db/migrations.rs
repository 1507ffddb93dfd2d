//! Database schema migrations
//!
//! The initial layout is created by [`crate::db::init::create_schema`]; each
//! later change gets a numbered migration here. Migrations are idempotent and
//! recorded in `schema_version`.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations**
//! 2. **Always add new migrations** and bump `CURRENT_SCHEMA_VERSION`
//! 3. **Use ALTER TABLE** and check `pragma_table_info` first

use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Current schema version
const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Get current schema version (0 when nothing recorded yet)
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

async fn record_version(pool: &SqlitePool, version: i64) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(version)
        .bind(chrono::Utc::now())
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current = get_schema_version(pool).await?;

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    if current < 1 {
        // v1: initial layout from create_schema
        record_version(pool, 1).await?;
    }

    if current < 2 {
        migrate_v2(pool).await?;
        record_version(pool, 2).await?;
    }

    info!(
        from = current,
        to = CURRENT_SCHEMA_VERSION,
        "Database schema migrated"
    );
    Ok(())
}

/// v2: lookup indexes for chat history and aggregated projects
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_team_messages_channel ON team_messages (channel_id, id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_platform_projects_fetched ON platform_projects (fetched_at)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
