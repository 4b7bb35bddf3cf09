//! Agent configuration

use crate::permission::PermissionMode;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub use farhand_proto::keys::{IDENTITY_HEADER, SECRET_HEADER};

/// Everything the agent needs to connect and to decide what it may do
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// WebSocket URL of the relay, e.g. `wss://relay.example.com/ws`
    pub relay_url: String,
    /// Identity this agent authenticates as
    pub identity: String,
    /// Shared secret for that identity
    pub secret: String,
    /// Trust level
    #[serde(default)]
    pub mode: PermissionMode,
    /// Directories operations may touch
    #[serde(default)]
    pub allowed_directories: Vec<PathBuf>,
    /// Seconds between heartbeats
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
    /// First reconnect delay in seconds
    #[serde(default = "default_backoff_floor_secs")]
    pub reconnect_floor_secs: u64,
    /// Longest reconnect delay in seconds
    #[serde(default = "default_backoff_ceiling_secs")]
    pub reconnect_ceiling_secs: u64,
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_backoff_floor_secs() -> u64 {
    1
}

fn default_backoff_ceiling_secs() -> u64 {
    60
}

impl AgentConfig {
    /// Config with defaults for everything but the connection details
    pub fn new(
        relay_url: impl Into<String>,
        identity: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            relay_url: relay_url.into(),
            identity: identity.into(),
            secret: secret.into(),
            mode: PermissionMode::default(),
            allowed_directories: Vec::new(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            reconnect_floor_secs: default_backoff_floor_secs(),
            reconnect_ceiling_secs: default_backoff_ceiling_secs(),
        }
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Parse TOML text
    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Reject configs the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.identity.trim().is_empty() {
            bail!("identity must not be empty");
        }
        if self.secret.is_empty() {
            bail!("secret must not be empty");
        }
        if self.heartbeat_interval_secs == 0 {
            bail!("heartbeat_interval_secs must be positive");
        }
        if self.reconnect_floor_secs == 0 {
            bail!("reconnect_floor_secs must be positive");
        }
        self.url()?;
        Ok(())
    }

    /// Parsed relay URL; only `ws` and `wss` are accepted
    pub fn url(&self) -> Result<Url> {
        let url = Url::parse(&self.relay_url)
            .with_context(|| format!("Invalid relay URL '{}'", self.relay_url))?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => bail!("relay URL scheme must be ws or wss, got '{}'", other),
        }
    }

    /// Heartbeat period
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// First reconnect delay
    pub fn reconnect_floor(&self) -> Duration {
        Duration::from_secs(self.reconnect_floor_secs)
    }

    /// Longest reconnect delay
    pub fn reconnect_ceiling(&self) -> Duration {
        Duration::from_secs(self.reconnect_ceiling_secs)
    }
}
