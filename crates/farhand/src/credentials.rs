//! Agent credential validation and connection status

use crate::error::RelayError;
use async_trait::async_trait;
use farhand_proto::message::now_millis;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;
use tracing::debug;

/// Connection status recorded per identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// A relay holds a live socket for the identity
    Connected,
    /// No socket
    Disconnected,
}

/// Status plus the time it last changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRecord {
    /// Current status
    pub status: AgentStatus,
    /// Epoch milliseconds of the last change
    pub last_seen: u64,
}

/// Credential and status store consulted during the handshake
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether `secret` is valid for `identity`
    async fn validate(&self, identity: &str, secret: &str) -> Result<bool, RelayError>;

    /// Record the connection status and last-seen time
    async fn set_status(&self, identity: &str, status: AgentStatus) -> Result<(), RelayError>;
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    agents: Vec<AgentEntry>,
}

#[derive(Debug, Deserialize)]
struct AgentEntry {
    identity: String,
    secret: String,
}

/// Fixed set of identity/secret pairs, usually loaded from TOML:
///
/// ```toml
/// [[agents]]
/// identity = "laptop-1"
/// secret = "s3cret"
/// ```
#[derive(Debug, Default)]
pub struct StaticCredentials {
    secrets: HashMap<String, String>,
    statuses: RwLock<HashMap<String, StatusRecord>>,
}

impl StaticCredentials {
    /// Empty store that rejects everyone
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity
    pub fn with_agent(mut self, identity: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(identity.into(), secret.into());
        self
    }

    /// Parse a TOML credentials document
    pub fn from_toml(source: &str) -> Result<Self, RelayError> {
        let file: CredentialsFile =
            toml::from_str(source).map_err(|e| RelayError::Credentials(e.to_string()))?;

        let mut store = Self::new();
        for agent in file.agents {
            if agent.identity.is_empty() || agent.secret.is_empty() {
                return Err(RelayError::Credentials(
                    "identity and secret must not be empty".to_string(),
                ));
            }
            store = store.with_agent(agent.identity, agent.secret);
        }
        debug!("Loaded {} agent credentials", store.secrets.len());
        Ok(store)
    }

    /// Load a TOML credentials file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let source = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::from_toml(&source)
    }

    /// Number of known identities
    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    /// Whether no identity is known
    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Last recorded status for `identity`
    pub async fn status(&self, identity: &str) -> Option<StatusRecord> {
        self.statuses.read().await.get(identity).copied()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn validate(&self, identity: &str, secret: &str) -> Result<bool, RelayError> {
        let Some(expected) = self.secrets.get(identity) else {
            return Ok(false);
        };
        Ok(bool::from(expected.as_bytes().ct_eq(secret.as_bytes())))
    }

    async fn set_status(&self, identity: &str, status: AgentStatus) -> Result<(), RelayError> {
        self.statuses.write().await.insert(
            identity.to_string(),
            StatusRecord {
                status,
                last_seen: now_millis(),
            },
        );
        Ok(())
    }
}
