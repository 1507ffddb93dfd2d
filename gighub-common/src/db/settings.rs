//! Settings table accessors (key-value)

use sqlx::SqlitePool;

use crate::{Error, Result};

/// Settings key holding newline-separated AI API keys
pub const AI_API_KEYS: &str = "ai_api_keys";

/// Generic setting getter
pub async fn get_setting<T>(db: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (insert or replace)
pub async fn set_setting<T: ToString>(db: &SqlitePool, key: &str, value: T) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;
    Ok(())
}

/// AI API keys stored in the database (empty when unset)
pub async fn get_ai_api_keys(db: &SqlitePool) -> Result<Vec<String>> {
    let raw: Option<String> = get_setting(db, AI_API_KEYS).await?;
    Ok(raw
        .map(|v| {
            v.lines()
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default())
}

pub async fn set_ai_api_keys(db: &SqlitePool, keys: &[String]) -> Result<()> {
    set_setting(db, AI_API_KEYS, keys.join("\n")).await
}
