//! Configuration loader and validator for the order notification service.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub dispatch: Dispatch,
    pub push: Push,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub workers: usize,
    pub queue_capacity: usize,
}

/// Which record fields drive dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dispatch {
    pub status_field: String,
    pub owner_field: String,
}

impl Default for Dispatch {
    fn default() -> Self {
        Self {
            status_field: crate::dispatch::DEFAULT_STATUS_FIELD.into(),
            owner_field: crate::dispatch::DEFAULT_OWNER_FIELD.into(),
        }
    }
}

/// Push provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Push {
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Push {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl App {
    /// `data_dir` with a leading `~/` expanded.
    pub fn resolved_data_dir(&self) -> String {
        expand_home(&self.data_dir)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/orders.db", self.app.resolved_data_dir()))
    }
}

pub fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => match std::env::var("HOME") {
            Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
            Err(_) => path.to_string(),
        },
        None => path.to_string(),
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.workers == 0 {
        return Err(ConfigError::Invalid("app.workers must be > 0"));
    }
    if cfg.app.queue_capacity == 0 {
        return Err(ConfigError::Invalid("app.queue_capacity must be > 0"));
    }

    if cfg.dispatch.status_field.trim().is_empty() {
        return Err(ConfigError::Invalid("dispatch.status_field must be non-empty"));
    }
    if cfg.dispatch.owner_field.trim().is_empty() {
        return Err(ConfigError::Invalid("dispatch.owner_field must be non-empty"));
    }

    if cfg.push.timeout_ms == 0 {
        return Err(ConfigError::Invalid("push.timeout_ms must be > 0"));
    }
    if cfg.push.enabled {
        match Url::parse(&cfg.push.endpoint) {
            Ok(url) if url.scheme() == "https" || url.scheme() == "http" => {}
            _ => return Err(ConfigError::Invalid("push.endpoint must be an http(s) URL")),
        }
        if cfg.push.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("push.api_key must be non-empty"));
        }
    }

    Ok(())
}

/// Example configuration, also used by tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  workers: 4
  queue_capacity: 1024

dispatch:
  status_field: "status"
  owner_field: "customer"

push:
  enabled: true
  endpoint: "https://fcm.googleapis.com/v1/projects/YOUR_PROJECT/messages:send"
  api_key: "YOUR_PUSH_API_KEY"
  timeout_ms: 5000
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.push.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn dispatch_section_defaults() {
        let yaml = r#"app: { data_dir: "./d", workers: 1, queue_capacity: 8 }
push: { enabled: false, timeout_ms: 100 }
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.dispatch.status_field, "status");
        assert_eq!(cfg.dispatch.owner_field, "customer");
        assert!(cfg.push.endpoint.is_empty());
    }

    #[test]
    fn invalid_app_values() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.workers = 0;
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("app.workers")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.queue_capacity = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = " ".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_field_names() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.dispatch.owner_field = "".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("owner_field")), _ => panic!("wrong error") }
    }

    #[test]
    fn enabled_push_requires_endpoint_and_key() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.push.endpoint = "ftp://example.com".into();
        let err = validate(&cfg).unwrap_err();
        match err { ConfigError::Invalid(msg) => assert!(msg.contains("push.endpoint")), _ => panic!("wrong error") }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.push.api_key = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        // Disabled push skips provider checks.
        cfg.push.enabled = false;
        cfg.push.endpoint = "".into();
        validate(&cfg).unwrap();
    }

    #[test]
    fn expand_home_only_touches_prefix() {
        assert_eq!(expand_home("./data"), "./data");
        assert_eq!(expand_home("/abs/~/x"), "/abs/~/x");
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.workers, 4);
    }
}
