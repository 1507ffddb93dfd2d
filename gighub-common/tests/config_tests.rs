//! Configuration loading and data folder resolution
//!
//! Tests that touch GIGHUB_DATA_DIR / GIGHUB_CONFIG are marked #[serial] so
//! they never race on process environment.

use gighub_common::config::{
    config_file_path, load_toml_config, prepare_data_dir, resolve_data_dir, write_toml_config,
    TomlConfig, CONFIG_FILE_ENV, DATA_DIR_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_toml_config(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.queue.max_attempts, 3);
    assert_eq!(config.queue.backoff_secs, vec![10, 30, 60]);
    assert_eq!(config.ai.max_server_retries, 2);
    assert!(config.ai.api_keys.is_empty());
    assert!(config.calendar.base_url.is_none());
}

#[test]
fn test_partial_file_keeps_other_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gighub.toml");
    std::fs::write(
        &path,
        r#"
[ai]
api_keys = ["k1", "k2"]
model = "gpt-4o"

[platforms.upwork]
client_id = "abc"
client_secret = "shh"
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.ai.api_keys, vec!["k1", "k2"]);
    assert_eq!(config.ai.model, "gpt-4o");
    assert_eq!(config.ai.retry_base_delay_ms, 1000);
    assert_eq!(config.platforms.upwork.unwrap().client_id, "abc");
    assert!(config.platforms.freelancer.is_none());
    assert_eq!(config.server.host, "127.0.0.1");
}

#[test]
fn test_malformed_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gighub.toml");
    std::fs::write(&path, "[server\nport = ").unwrap();

    assert!(load_toml_config(&path).is_err());
}

#[test]
fn test_write_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conf").join("gighub.toml");

    let mut config = TomlConfig::default();
    config.server.port = 9999;
    config.data_dir = Some(PathBuf::from("/srv/gighub"));
    write_toml_config(&config, &path).unwrap();

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded.server.port, 9999);
    assert_eq!(loaded.data_dir, Some(PathBuf::from("/srv/gighub")));
}

#[test]
#[serial]
fn test_cli_arg_beats_env_and_toml() {
    env::set_var(DATA_DIR_ENV, "/from/env");
    let config = TomlConfig {
        data_dir: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let resolved = resolve_data_dir(Some(Path::new("/from/cli")), &config);
    assert_eq!(resolved, PathBuf::from("/from/cli"));

    env::remove_var(DATA_DIR_ENV);
}

#[test]
#[serial]
fn test_env_beats_toml() {
    env::set_var(DATA_DIR_ENV, "/from/env");
    let config = TomlConfig {
        data_dir: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    assert_eq!(resolve_data_dir(None, &config), PathBuf::from("/from/env"));

    env::remove_var(DATA_DIR_ENV);
    assert_eq!(resolve_data_dir(None, &config), PathBuf::from("/from/toml"));
}

#[test]
#[serial]
fn test_default_data_dir_when_nothing_set() {
    env::remove_var(DATA_DIR_ENV);
    let resolved = resolve_data_dir(None, &TomlConfig::default());
    assert!(resolved.ends_with("gighub") || resolved.ends_with("gighub_data"));
}

#[test]
#[serial]
fn test_config_file_path_env_override() {
    env::set_var(CONFIG_FILE_ENV, "/etc/custom.toml");
    assert_eq!(config_file_path(None), PathBuf::from("/etc/custom.toml"));
    env::remove_var(CONFIG_FILE_ENV);

    assert_eq!(
        config_file_path(Some(Path::new("./local.toml"))),
        PathBuf::from("./local.toml")
    );
}

#[test]
fn test_prepare_data_dir_creates_folder() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");

    let db_path = prepare_data_dir(&data_dir).unwrap();
    assert!(data_dir.is_dir());
    assert_eq!(db_path, data_dir.join("gighub.db"));
}
