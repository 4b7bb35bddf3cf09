//! # Farhand Agent
//!
//! Runs on the machine being controlled. Holds one authenticated socket to a
//! relay, checks every tool call against the local permission model and runs
//! the ones that pass.

#![warn(missing_docs)]

/// Agent client: connect, authenticate, heartbeat, serve tool calls, reconnect
pub mod agent;

/// Reconnect delay policy
pub mod backoff;

/// Agent configuration
pub mod config;

/// Tool registration table and timed execution
pub mod executor;

/// Built-in tools
pub mod handlers;

/// Permission engine: mode, path containment and risk classification
pub mod permission;

/// Permission-gated dispatch of tool calls
pub mod router;

pub use agent::{AgentClient, ConnectionState, Connector, WebSocketConnector};
pub use backoff::{Backoff, Sleeper, TokioSleeper};
pub use config::AgentConfig;
pub use executor::{Target, Tool, ToolContext, ToolError, ToolExecutor, ToolInfo};
pub use permission::{OperationKind, PermissionEngine, PermissionMode};
pub use router::ToolDispatcher;
