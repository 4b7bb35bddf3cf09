//! Error types for the relay

use farhand_proto::ProtocolError;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Coordination-store failures
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Store could not be reached or rejected the command
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    /// Subscription ended before a message arrived
    #[error("Subscription to {0} closed")]
    SubscriptionClosed(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for RegistryError {
    fn from(err: redis::RedisError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Relay-side connection handling failures
#[derive(Debug, Error)]
pub enum RelayError {
    /// Identity/secret pair was rejected
    #[error("Authentication failed for {identity}")]
    AuthenticationFailure {
        /// Identity that failed to authenticate
        identity: String,
    },

    /// Relay is draining and accepts no new connections
    #[error("Relay is shutting down")]
    ShuttingDown,

    /// Coordination store failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Frame could not be encoded or decoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Credential store failure
    #[error("Credential store error: {0}")]
    Credentials(String),

    /// Audit log failure
    #[error("Audit log error: {0}")]
    Audit(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures seen by a [`crate::CommandRouter`] caller
#[derive(Debug, Error)]
pub enum RouterError {
    /// No relay holds a connection for the identity
    #[error("Agent {identity} is not connected")]
    NotConnected {
        /// Target identity
        identity: String,
    },

    /// No response arrived in time. The remote call is not cancelled.
    #[error("Tool call {request_id} timed out after {timeout:?}")]
    Timeout {
        /// Request that timed out
        request_id: Uuid,
        /// How long the router waited
        timeout: Duration,
    },

    /// Request is missing something the router needs
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Coordination store failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Request could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.into())
    }
}
