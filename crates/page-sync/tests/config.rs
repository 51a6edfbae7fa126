//! Integration tests for configuration loading from disk.

use std::fs;

use page_sync::config::{CONFIG_FILE, Config, ConfigError};
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(CONFIG_FILE);
    fs::write(&path, contents).expect("Failed to write config");
    path
}

#[test]
fn test_full_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"{
            "base_url": "https://wiki.example.com",
            "username": "bot",
            "space_key": "ENG",
            "api_token": "t0k3n",
            "parent_page_id": "12345",
            "diagrams": { "enabled": true, "command": "/opt/mmdc" },
            "request_timeout_secs": 5
        }"#,
    );

    let config = Config::from_file(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.parent_page_id.as_deref(), Some("12345"));
    assert!(config.diagrams.enabled);
    assert_eq!(config.diagrams.command, "/opt/mmdc");
    assert_eq!(config.request_timeout_secs, 5);
}

#[test]
fn test_missing_file() {
    let dir = TempDir::new().unwrap();
    let err = Config::from_file(&dir.path().join(CONFIG_FILE)).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn test_malformed_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "{ \"base_url\": ");
    let err = Config::from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn test_missing_required_field_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, r#"{ "base_url": "https://x", "username": "u" }"#);
    let err = Config::from_file(&path).unwrap_err();
    assert!(err.to_string().contains("space_key"));
}
