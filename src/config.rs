//! Configuration loader and validator for the sync service.
use crate::model::NewDataSource;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
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

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub sources: Vec<NewDataSource>,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_log_retention_days")]
    pub log_retention_days: u32,
}

/// Timeouts, retry budget and defaults for sync and health runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    pub default_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub default_max_results: u32,
    pub default_since_days: u32,
    pub health_parallelism: usize,
    pub slow_probe_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            max_retries: 2,
            retry_base_delay_ms: 3000,
            default_max_results: 20,
            default_since_days: 7,
            health_parallelism: 4,
            slow_probe_ms: 10_000,
        }
    }
}

impl SyncSettings {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default SQLite URL under the data directory.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/embodied.db",
            self.app.data_dir.trim_end_matches('/')
        )
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    parse(&content)
}

/// Parse and validate configuration from YAML text.
pub fn parse(content: &str) -> Result<Config, ConfigError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty"));
    }

    let s = &cfg.sync;
    if s.default_timeout_secs == 0 {
        return Err(ConfigError::Invalid("sync.default_timeout_secs must be > 0"));
    }
    if s.default_max_results == 0 {
        return Err(ConfigError::Invalid("sync.default_max_results must be > 0"));
    }
    if s.health_parallelism == 0 {
        return Err(ConfigError::Invalid("sync.health_parallelism must be > 0"));
    }

    let mut names = HashSet::new();
    for src in &cfg.sources {
        if src.name.trim().is_empty() {
            return Err(ConfigError::Invalid("sources[].name must be non-empty"));
        }
        if src.api_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("sources[].api_base_url must be non-empty"));
        }
        if !names.insert(src.name.as_str()) {
            return Err(ConfigError::Invalid("sources[].name must be unique"));
        }
    }

    Ok(())
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_retention_days() -> u32 {
    90
}

/// Example configuration with every built-in provider.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind_addr: "0.0.0.0:8080"
  log_retention_days: 90

sync:
  default_timeout_secs: 60
  max_retries: 2
  retry_base_delay_ms: 3000
  default_max_results: 20
  default_since_days: 7
  health_parallelism: 4
  slow_probe_ms: 10000

sources:
  - name: arxiv
    display_name: "arXiv"
    api_base_url: "http://export.arxiv.org"
    tags: [papers]
    config:
      query: "embodied AI"
  - name: semantic_scholar
    display_name: "Semantic Scholar"
    api_base_url: "https://api.semanticscholar.org"
    tags: [papers]
    config:
      fieldsOfStudy: "Computer Science"
  - name: github
    display_name: "GitHub"
    api_base_url: "https://api.github.com"
    tags: [repos]
    config:
      query: "robot learning"
  - name: huggingface
    display_name: "HuggingFace"
    api_base_url: "https://huggingface.co"
    tags: [models]
    config:
      timeout_secs: 120
  - name: bilibili
    display_name: "Bilibili"
    api_base_url: "https://api.bilibili.com"
    tags: [videos]
  - name: youtube
    display_name: "YouTube"
    enabled: false
    api_base_url: "https://www.googleapis.com"
    api_key: "YOUR_YOUTUBE_API_KEY"
    tags: [videos]
  - name: hot_news
    display_name: "Hot News"
    api_base_url: "https://hot.example.com"
    tags: [news]
    config:
      board: "api/hot"
"#
}
