//! # Farhand
//!
//! Relay side of a remote tool execution control plane. Agents on remote
//! machines hold authenticated WebSocket connections to a relay instance;
//! callers anywhere invoke tools on them through a [`CommandRouter`]. Relay
//! instances coordinate through a shared [`ConnectionRegistry`] that records
//! which instance owns which agent and carries calls and responses over
//! pub/sub channels.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use farhand_proto as proto;

/// Error types for the relay
pub mod error;

/// Shared coordination store
pub mod registry;

/// Relay and router configuration
pub mod config;

/// Agent credential validation and status
pub mod credentials;

/// Audit trail of completed tool calls
pub mod audit;

/// Agent connection lifecycle
pub mod connection;

/// Caller-side tool invocation
pub mod router;

/// HTTP and WebSocket surface
pub mod server;

pub use audit::{AuditLog, AuditRecord, JsonlAuditLog, TracingAuditLog};
pub use config::{RelayConfig, RouterConfig};
pub use connection::{Connection, ConnectionManager, HandshakeParams, Outbound, RelaySnapshot};
pub use credentials::{AgentStatus, CredentialStore, StaticCredentials};
pub use error::{RegistryError, RelayError, RouterError};
pub use registry::{ConnectionRegistry, MemoryRegistry, Subscription};
#[cfg(feature = "redis")]
pub use registry::RedisRegistry;
pub use router::CommandRouter;
