//! Client configuration loaded from `~/.config/linecount/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CountError, Result};
use crate::live::ReconnectPolicy;
use crate::session::{TrackerParams, DEFAULT_MODEL, DEFAULT_TRACKER};

pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_LIVE_PATH: &str = "/ws/video-count";

/// Everything the client needs to reach one counting server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP base of the processing service.
    pub server_url: String,
    /// Path of the live channel, resolved against `server_url`.
    pub live_path: String,
    pub reconnect_backoff_secs: u64,
    /// Timeout for catalog and history requests. Processing is unbounded.
    pub request_timeout_secs: u64,
    pub default_model: String,
    pub default_tracker: String,
    pub tracker: TrackerParams,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            live_path: DEFAULT_LIVE_PATH.to_string(),
            reconnect_backoff_secs: 8,
            request_timeout_secs: 30,
            default_model: DEFAULT_MODEL.to_string(),
            default_tracker: DEFAULT_TRACKER.to_string(),
            tracker: TrackerParams::default(),
        }
    }
}

impl ClientConfig {
    /// Load from the default location.
    ///
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load from `path`, falling back to defaults if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`CountError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| CountError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::parse(&content)
            .map_err(|e| CountError::Config(format!("invalid TOML in {}: {e}", path.display())))
    }

    fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn server_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.server_url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CountError::Config(format!(
                "server_url must be http or https: {}",
                self.server_url
            )));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// Live channel URL: `server_url` with `http`→`ws` / `https`→`wss`.
    pub fn live_url(&self) -> Result<Url> {
        let mut url = self.server_url()?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| CountError::Config(format!("cannot derive {scheme} URL")))?;
        Ok(url.join(&self.live_path)?)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            backoff: Duration::from_secs(self.reconnect_backoff_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Return the path to the client config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("linecount")
        .join("config.toml")
}
