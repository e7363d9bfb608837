//! Configuration loader and validator for the ISBNdb queue consumer.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
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
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub isbndb: Isbndb,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    /// Archive files and the default SQLite database live here.
    pub data_dir: String,
    /// Daily quota counter, persisted across restarts.
    pub state_file: String,
    pub batch_size: u32,
    pub max_concurrent_requests: usize,
    pub max_calls_per_sec: usize,
    pub max_calls_per_day: u64,
    /// Global cooldown after an upstream 429.
    pub throttle_secs: u64,
    pub request_timeout_secs: u64,
}

/// ISBNdb API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Isbndb {
    pub base_url: String,
    pub api_key: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and the
    /// state file's parent if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if !self.app.data_dir.trim().is_empty() {
            fs::create_dir_all(&self.app.data_dir)?;
        }
        if let Some(parent) = Path::new(&self.app.state_file).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
/// - `ISBNDB_API_KEY` in the environment overrides `isbndb.api_key`.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    if let Ok(key) = std::env::var("ISBNDB_API_KEY") {
        if !key.trim().is_empty() {
            cfg.isbndb.api_key = key;
        }
    }
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.state_file.trim().is_empty() {
        return Err(ConfigError::Invalid("app.state_file must be non-empty"));
    }
    if cfg.app.batch_size == 0 {
        return Err(ConfigError::Invalid("app.batch_size must be > 0"));
    }
    if cfg.app.max_concurrent_requests == 0 {
        return Err(ConfigError::Invalid(
            "app.max_concurrent_requests must be > 0",
        ));
    }
    if cfg.app.max_calls_per_sec == 0 {
        return Err(ConfigError::Invalid("app.max_calls_per_sec must be > 0"));
    }
    if cfg.app.max_calls_per_day == 0 {
        return Err(ConfigError::Invalid("app.max_calls_per_day must be > 0"));
    }
    if cfg.app.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "app.request_timeout_secs must be > 0",
        ));
    }

    if cfg.isbndb.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("isbndb.base_url must be non-empty"));
    }
    if cfg.isbndb.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("isbndb.api_key must be non-empty"));
    }

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  state_file: "./data/quota_state.json"
  batch_size: 1000
  max_concurrent_requests: 8
  max_calls_per_sec: 5
  max_calls_per_day: 200000
  throttle_secs: 60
  request_timeout_secs: 60

isbndb:
  base_url: "https://api2.isbndb.com"
  api_key: "YOUR_ISBNDB_API_KEY"
"#
}
