//! `page-sync.json` configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default configuration file name, looked up in the sync root
pub const CONFIG_FILE: &str = "page-sync.json";
/// Overrides `api_token` from the file
pub const TOKEN_ENV: &str = "PAGE_SYNC_API_TOKEN";

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DIAGRAM_COMMAND: &str = "mmdc";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("base_url must start with http:// or https://, got {0}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DiagramConfig {
    pub enabled: bool,
    /// Mermaid CLI executable
    pub command: String,
}

impl Default for DiagramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: DEFAULT_DIAGRAM_COMMAND.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    pub base_url: String,
    pub username: String,
    pub space_key: String,
    #[serde(default)]
    pub api_token: Option<String>,
    /// Top-level pages are created beneath this page
    #[serde(default)]
    pub parent_page_id: Option<String>,
    #[serde(default)]
    pub diagrams: DiagramConfig,
    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

impl Config {
    /// Read and parse a configuration file. Does not validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// Apply an API token from the environment, if one is set.
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.api_token = Some(token);
        }
        self
    }

    /// Load `path`, apply `PAGE_SYNC_API_TOKEN` and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?.with_token_override(std::env::var(TOKEN_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("base_url"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(self.base_url.clone()));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing("username"));
        }
        if self.space_key.trim().is_empty() {
            return Err(ConfigError::Missing("space_key"));
        }
        if self.api_token.as_deref().is_none_or(|t| t.trim().is_empty()) {
            return Err(ConfigError::Missing("api_token"));
        }
        Ok(())
    }

    pub fn api_token(&self) -> &str {
        self.api_token.as_deref().unwrap_or_default()
    }

    /// Base URL without trailing slashes.
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "base_url": "https://example.atlassian.net/wiki/",
        "username": "me@example.com",
        "space_key": "DOC",
        "api_token": "secret"
    }"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_json(MINIMAL).unwrap();
        assert_eq!(config.request_timeout_secs, 30);
        assert!(!config.diagrams.enabled);
        assert_eq!(config.diagrams.command, "mmdc");
        assert_eq!(config.parent_page_id, None);
        assert_eq!(config.base_url(), "https://example.atlassian.net/wiki");
        config.validate().unwrap();
    }

    #[test]
    fn test_token_override() {
        let config = Config::from_json(MINIMAL)
            .unwrap()
            .with_token_override(Some("from-env".to_string()));
        assert_eq!(config.api_token(), "from-env");

        let config = Config::from_json(MINIMAL)
            .unwrap()
            .with_token_override(Some("  ".to_string()));
        assert_eq!(config.api_token(), "secret");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::from_json(MINIMAL).unwrap();
        config.api_token = None;
        assert!(matches!(config.validate(), Err(ConfigError::Missing("api_token"))));

        let mut config = Config::from_json(MINIMAL).unwrap();
        config.base_url = "example.com".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));

        let mut config = Config::from_json(MINIMAL).unwrap();
        config.space_key = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::Missing("space_key"))));
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/docs")), home.join("docs"));
        }
    }
}
