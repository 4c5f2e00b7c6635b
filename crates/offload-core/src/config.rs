//! Client configuration.
//!
//! Loaded from an optional YAML file, then overridden by `OFFLOAD_*`
//! environment variables. Callers (the CLI) may override again afterwards.

use crate::error::ConfigError;
use crate::poll::{DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Paths of the queue endpoints, relative to `server_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub submit: String,
    pub submit_blocking: String,
    /// Prefix; `/{capability}/{id}` is appended per task.
    pub poll: String,
    pub capabilities: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            submit: "/api/task/submit".to_string(),
            submit_blocking: "/api/task/submit_blocking".to_string(),
            poll: "/api/task/poll".to_string(),
            capabilities: "/api/capabilities/list/online".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: Option<String>,
    pub api_key: String,
    pub endpoints: Endpoints,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
    /// Directory holding command history and the issued task log.
    pub state_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: String::new(),
            endpoints: Endpoints::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            state_dir: Self::default_state_dir(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file, returning defaults if it doesn't exist.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `OFFLOAD_SERVER_URL`, `OFFLOAD_API_KEY` and `OFFLOAD_STATE_DIR`.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(url) = get("OFFLOAD_SERVER_URL") {
            self.server_url = Some(url);
        }
        if let Some(key) = get("OFFLOAD_API_KEY") {
            self.api_key = key;
        }
        if let Some(dir) = get("OFFLOAD_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
    }

    /// The server URL without a trailing slash.
    pub fn base_url(&self) -> Result<String, ConfigError> {
        let raw = self
            .server_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingServerUrl)?;
        if !(raw.starts_with("http://") || raw.starts_with("https://")) {
            return Err(ConfigError::InvalidServerUrl(raw.to_string()));
        }
        Ok(raw.trim_end_matches('/').to_string())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms).max(MIN_POLL_INTERVAL)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn default_state_dir() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".offloadctl")
    }
}
