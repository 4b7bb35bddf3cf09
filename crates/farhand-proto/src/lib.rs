//! # Farhand Protocol
//!
//! Wire messages, coordination-store key names and the message codec shared by
//! the Farhand relay and agent.

#![warn(missing_docs)]

/// Message types exchanged between relay, agent and router
pub mod message;

/// Coordination-store key and channel names
pub mod keys;

/// JSON / MessagePack codec for socket frames
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use codec::{Encoded, Encoding, MessageCodec};
pub use error::ProtocolError;
pub use message::{
    AgentMessage, Classification, CommandEnvelope, ErrorCode, ErrorDetails, PermissionDecision,
    RelayMessage, ToolCall, ToolResponse,
};
