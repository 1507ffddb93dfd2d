//! Configuration resolution for the services
//!
//! AI API keys come from the first source that has any: settings table, then
//! the `GIGHUB_AI_API_KEYS` environment variable (comma-separated), then
//! `ai.api_keys` in the TOML config.

use sqlx::SqlitePool;
use tracing::{info, warn};

use gighub_common::config::AiConfig;
use gighub_common::db::settings::{get_ai_api_keys, AI_API_KEYS};
use gighub_common::{Error, Result};

/// Environment variable holding comma-separated AI API keys
pub const AI_API_KEYS_ENV: &str = "GIGHUB_AI_API_KEYS";

fn clean(keys: impl IntoIterator<Item = String>) -> Vec<String> {
    keys.into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect()
}

/// Resolve AI API keys (Database → ENV → TOML)
pub async fn resolve_ai_api_keys(db: &SqlitePool, ai: &AiConfig) -> Result<Vec<String>> {
    let db_keys = clean(get_ai_api_keys(db).await?);
    let env_keys = clean(
        std::env::var(AI_API_KEYS_ENV)
            .ok()
            .map(|v| v.split(',').map(String::from).collect::<Vec<_>>())
            .unwrap_or_default(),
    );
    let toml_keys = clean(ai.api_keys.clone());

    let sources: Vec<&str> = [
        ("database", &db_keys),
        ("environment", &env_keys),
        ("TOML", &toml_keys),
    ]
    .iter()
    .filter(|(_, keys)| !keys.is_empty())
    .map(|(name, _)| *name)
    .collect();

    if sources.len() > 1 {
        warn!(
            "AI API keys found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    let (source, keys) = if !db_keys.is_empty() {
        ("database", db_keys)
    } else if !env_keys.is_empty() {
        ("environment variable", env_keys)
    } else if !toml_keys.is_empty() {
        ("TOML config", toml_keys)
    } else {
        return Err(Error::Config(format!(
            "AI API keys not configured. Set one of:\n\
             1. settings table key '{}' (newline-separated)\n\
             2. Environment: {}=key1,key2\n\
             3. TOML config: [ai] api_keys = [\"key1\", \"key2\"]",
            AI_API_KEYS,
            AI_API_KEYS_ENV
        )));
    };

    info!(count = keys.len(), "AI API keys loaded from {}", source);
    Ok(keys)
}
