//! Configuration loading and data folder resolution
//!
//! Every field of [`TomlConfig`] has a default, so a missing or partial
//! `gighub.toml` never prevents startup. Resolution order for the data folder:
//! 1. Command-line argument (highest priority)
//! 2. `GIGHUB_DATA_DIR` environment variable
//! 3. `data_dir` in the TOML config file
//! 4. OS-dependent default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the data folder
pub const DATA_DIR_ENV: &str = "GIGHUB_DATA_DIR";

/// Environment variable overriding the config file location
pub const CONFIG_FILE_ENV: &str = "GIGHUB_CONFIG";

/// Database file name inside the data folder
pub const DATABASE_FILE: &str = "gighub.db";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub data_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub ai: AiConfig,
    pub queue: QueueConfig,
    pub platforms: PlatformsConfig,
    pub calendar: CalendarConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// tracing filter directive, e.g. "info" or "gighub_services=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; empty means any origin
    pub cors_origins: Vec<String>,
    /// Run the queue workers inside the API process
    pub run_workers: bool,
    /// Public base URL used to build OAuth redirect URIs
    pub public_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
            run_workers: true,
            public_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

/// LLM endpoint settings (OpenAI-compatible chat completions)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub base_url: String,
    pub model: String,
    pub api_keys: Vec<String>,
    /// Extra attempts on the same key after a 5xx or transport error
    pub max_server_retries: u32,
    /// First backoff delay; doubles on each retry of the same key
    pub retry_base_delay_ms: u64,
    pub timeout_secs: u64,
    /// Optional client-side throttle across all keys
    pub requests_per_minute: Option<u32>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_keys: Vec::new(),
            max_server_retries: 2,
            retry_base_delay_ms: 1000,
            timeout_secs: 60,
            requests_per_minute: None,
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    /// Delay before attempt n+1 is `backoff_secs[n-1]` (last value repeats)
    pub backoff_secs: Vec<u64>,
    pub poll_interval_ms: u64,
    /// Reservations older than this are considered abandoned and re-delivered
    pub retry_after_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: vec![10, 30, 60],
            poll_interval_ms: 1000,
            retry_after_secs: 600,
        }
    }
}

/// OAuth client registration for one provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Overrides the provider's default authorize endpoint
    pub authorize_url: Option<String>,
    /// Overrides the provider's default token endpoint
    pub token_url: Option<String>,
    /// Overrides the provider's default API base
    pub api_base: Option<String>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsConfig {
    pub upwork: Option<OAuthClientConfig>,
    pub freelancer: Option<OAuthClientConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Calendar API base; sync is disabled when unset
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub calendar_id: String,
    pub timeout_secs: u64,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            calendar_id: "primary".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Load TOML config, falling back to defaults when the file is missing
///
/// A file that exists but fails to parse is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file not found at {} - using defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Write TOML config atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Config file location: `GIGHUB_CONFIG`, else `<config dir>/gighub/gighub.toml`
pub fn config_file_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .map(|d| d.join("gighub").join("gighub.toml"))
        .unwrap_or_else(|| PathBuf::from("gighub.toml"))
}

/// Resolve the data folder following the priority order in the module docs
pub fn resolve_data_dir(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &config.data_dir {
        return path.clone();
    }

    // Priority 4: OS-dependent default
    default_data_dir()
}

/// OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("gighub"))
        .unwrap_or_else(|| PathBuf::from("./gighub_data"))
}

/// Create the data folder if missing and return the database path inside it
pub fn prepare_data_dir(data_dir: &Path) -> Result<PathBuf> {
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir)?;
        info!("Created data folder: {}", data_dir.display());
    }
    Ok(data_dir.join(DATABASE_FILE))
}

/// User-Agent sent by every outbound HTTP client
pub fn get_user_agent() -> String {
    format!("GigHub/{}", env!("CARGO_PKG_VERSION"))
}
