//! Client configuration
//!
//! Resolution order: built-in defaults, then `~/.config/scribe/config.toml`
//! (platform config dir), then `SCRIBE_*` environment variables. The CLI
//! applies its flags last.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;
const DEFAULT_TOKEN_ENV: &str = "SCRIBE_TOKEN";
const DEFAULT_JOB_STATUS_PATH: &str = "novel/task";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix for relative endpoint paths
    pub base_url: String,
    /// Timeout for plain REST calls. Streams are not bounded by it.
    pub timeout_secs: u64,
    /// Delay between job status fetches
    pub poll_interval_ms: u64,
    /// Environment variable holding the bearer token
    pub token_env: String,
    /// Path below `base_url` where job status is served, `/{id}` appended
    pub job_status_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            job_status_path: DEFAULT_JOB_STATUS_PATH.to_string(),
        }
    }
}

impl ClientConfig {
    /// Platform config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("scribe").join("config.toml"))
    }

    /// Load from the default file (if present) and the environment
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Loading client config from {:?}", path);
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply `SCRIBE_API_URL`, `SCRIBE_TIMEOUT_SECS`, `SCRIBE_POLL_INTERVAL_MS`
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("SCRIBE_API_URL") {
            self.base_url = url;
        }
        if let Some(secs) = lookup("SCRIBE_TIMEOUT_SECS") {
            self.timeout_secs = secs
                .trim()
                .parse()
                .with_context(|| format!("SCRIBE_TIMEOUT_SECS is not a number: {secs}"))?;
        }
        if let Some(ms) = lookup("SCRIBE_POLL_INTERVAL_MS") {
            self.poll_interval_ms = ms
                .trim()
                .parse()
                .with_context(|| format!("SCRIBE_POLL_INTERVAL_MS is not a number: {ms}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            bail!("base_url must not be empty");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.timeout_secs == 0 {
            bail!("timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
