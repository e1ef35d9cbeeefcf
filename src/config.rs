//! Configuration loading and persistence.
//!
//! Handles reading and writing the geekmarks configuration file. The
//! authentication token is never part of the config; it lives in a
//! [`CredentialStore`](crate::credentials::CredentialStore).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::fs;

use crate::env::Environment;

/// Reconnection policy for the RPC connection.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect automatically after the transport closes.
    pub auto_reconnect: bool,
    /// First backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for the exponential backoff in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

impl ReconnectConfig {
    /// Initial backoff as a `Duration`.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Maximum backoff as a `Duration`.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Dimensions of the popup windows opened for UI surfaces.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct WindowDims {
    /// Window width in pixels.
    pub width: u32,
    /// Window height in pixels.
    pub height: u32,
}

impl Default for WindowDims {
    fn default() -> Self {
        Self {
            width: 700,
            height: 400,
        }
    }
}

/// Configuration for the geekmarks hub and CLI.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Server address as `host[:port]`, without scheme.
    pub server: String,
    /// Use `wss://` / `https://` instead of `ws://` / `http://`.
    pub server_ssl: bool,
    /// Fixed delay before each request is written to the socket.
    ///
    /// Only meant for local development servers; `None` in production.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pacing_delay_ms: Option<u64>,
    /// Reconnection policy.
    pub reconnect: ReconnectConfig,
    /// Popup window dimensions.
    pub window: WindowDims,
}

impl Default for Config {
    fn default() -> Self {
        // Development builds talk to a local server.
        let dev = Environment::current().is_development();
        Self {
            server: if dev {
                "localhost:4000".to_string()
            } else {
                "geekmarks.dmitryfrank.com".to_string()
            },
            server_ssl: !dev,
            pacing_delay_ms: None,
            reconnect: ReconnectConfig::default(),
            window: WindowDims::default(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `GEEKMARKS_CONFIG_DIR` overrides the platform config directory.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("GEEKMARKS_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("geekmarks")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from the config dir, with environment overrides.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from an explicit file (no env overrides).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(server) = std::env::var("GEEKMARKS_SERVER") {
            self.server = server;
        }

        if let Ok(ssl) = std::env::var("GEEKMARKS_SERVER_SSL") {
            self.server_ssl = matches!(ssl.as_str(), "1" | "true" | "yes");
        }

        if let Ok(delay) = std::env::var("GEEKMARKS_PACING_DELAY_MS") {
            if let Ok(ms) = delay.parse::<u64>() {
                self.pacing_delay_ms = (ms > 0).then_some(ms);
            }
        }
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            anyhow::bail!("server must not be empty");
        }
        if self.server.contains("://") {
            anyhow::bail!("server must be host[:port] without scheme, got {}", self.server);
        }
        if self.reconnect.max_backoff_ms < self.reconnect.initial_backoff_ms {
            anyhow::bail!(
                "reconnect.max_backoff_ms ({}) is smaller than initial_backoff_ms ({})",
                self.reconnect.max_backoff_ms,
                self.reconnect.initial_backoff_ms
            );
        }
        Ok(())
    }

    /// Persists the configuration to the config dir.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?.join("config.json"))
    }

    /// Persists the configuration to an explicit file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        fs::write(path, serde_json::to_string_pretty(self)?)?;

        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// Whether switching from `self` to `other` needs a fresh connection.
    pub fn requires_reconnect(&self, other: &Config) -> bool {
        self.server != other.server || self.server_ssl != other.server_ssl
    }

    /// Per-request pacing delay, if configured.
    pub fn pacing_delay(&self) -> Option<Duration> {
        self.pacing_delay_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Base URL of the HTTP API (`http[s]://{server}/api`).
    pub fn http_base(&self) -> String {
        let scheme = if self.server_ssl { "https" } else { "http" };
        format!("{}://{}/api", scheme, self.server)
    }

    /// WebSocket endpoint for the authenticated user, token included.
    pub fn ws_url(&self, token: &str) -> String {
        let scheme = if self.server_ssl { "wss" } else { "ws" };
        let token: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
        format!("{}://{}/api/my/wsconnect?token={}", scheme, self.server, token)
    }
}
