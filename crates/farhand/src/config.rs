//! Relay and router configuration

use farhand_proto::codec::MAX_MESSAGE_SIZE;
use farhand_proto::keys::DEFAULT_REGISTRY_TTL_SECS;
use std::time::Duration;
use uuid::Uuid;

/// Settings for one relay instance
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Id recorded as owner in the registry. Unique per process.
    pub instance_id: String,
    /// How often the liveness of each connection is checked
    pub heartbeat_interval: Duration,
    /// Silence after which a connection is closed
    pub heartbeat_timeout: Duration,
    /// Expiry of registry entries, re-armed on every heartbeat
    pub registry_ttl: Duration,
    /// Default drain window on shutdown
    pub drain_grace: Duration,
    /// Largest accepted socket frame
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            instance_id: format!("relay-{}", Uuid::new_v4()),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            registry_ttl: Duration::from_secs(DEFAULT_REGISTRY_TTL_SECS),
            drain_grace: Duration::from_secs(10),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl RelayConfig {
    /// Set the instance id
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// Set the liveness check interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the liveness timeout
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the registry entry expiry
    pub fn with_registry_ttl(mut self, ttl: Duration) -> Self {
        self.registry_ttl = ttl;
        self
    }

    /// Set the drain window
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// Set the frame size limit
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

/// Settings for a [`crate::CommandRouter`]
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Wait applied when a call carries no timeout of its own
    pub default_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(60),
        }
    }
}
