//! Error types for protocol operations

use crate::message::{ErrorCode, ErrorDetails};
use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Payload parsed but is not a message this side understands
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Message too large
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Actual message size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Binary frame received while the MessagePack backend is compiled out
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(&'static str),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<ProtocolError> for ErrorDetails {
    fn from(error: ProtocolError) -> Self {
        match error {
            ProtocolError::MessageTooLarge { size, max } => ErrorDetails::new(
                ErrorCode::InvalidParams,
                format!("Message too large: {} bytes (max: {})", size, max),
            ),
            other => ErrorDetails::new(ErrorCode::InvalidParams, other.to_string()),
        }
    }
}
