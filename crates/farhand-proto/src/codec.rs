//! JSON / MessagePack codec for socket frames
//!
//! Text frames carry JSON, binary frames carry MessagePack (named fields, so the
//! `type` tag survives). Both directions enforce a maximum message size.

use crate::ProtocolError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Maximum message size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Encoding used for outgoing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// JSON text frames
    #[default]
    Json,
    /// MessagePack binary frames
    MessagePack,
}

/// An encoded message, ready to become a socket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// Text frame
    Text(String),
    /// Binary frame
    Binary(Bytes),
}

impl Encoded {
    /// Size of the encoded payload in bytes
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Message codec for encoding/decoding socket frames
#[derive(Debug, Clone)]
pub struct MessageCodec {
    /// Encoding for outgoing messages
    encoding: Encoding,
    /// Maximum message size allowed
    max_message_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageCodec {
    /// Create a JSON codec with default settings
    pub fn new() -> Self {
        Self {
            encoding: Encoding::Json,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Use a different encoding for outgoing messages
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Create a codec with a custom max message size
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    /// Encode a message using the configured encoding
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Encoded, ProtocolError> {
        let encoded = match self.encoding {
            Encoding::Json => Encoded::Text(serde_json::to_string(message)?),
            Encoding::MessagePack => Encoded::Binary(Bytes::from(Self::to_msgpack(message)?)),
        };

        self.check_size(encoded.len())?;
        Ok(encoded)
    }

    /// Decode a JSON text frame
    pub fn decode_text<T: DeserializeOwned>(&self, text: &str) -> Result<T, ProtocolError> {
        self.check_size(text.len())?;
        Ok(serde_json::from_str(text)?)
    }

    /// Decode a MessagePack binary frame
    pub fn decode_binary<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        self.check_size(data.len())?;
        Self::from_msgpack(data)
    }

    /// Decode either kind of frame
    pub fn decode<T: DeserializeOwned>(&self, frame: &Encoded) -> Result<T, ProtocolError> {
        match frame {
            Encoded::Text(text) => self.decode_text(text),
            Encoded::Binary(data) => self.decode_binary(data),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_message_size {
            return Err(ProtocolError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    #[cfg(feature = "rmp-serde")]
    fn to_msgpack<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
        rmp_serde::to_vec_named(message)
            .map_err(|e| ProtocolError::Serialization(format!("MessagePack encode error: {}", e)))
    }

    #[cfg(not(feature = "rmp-serde"))]
    fn to_msgpack<T: Serialize>(_message: &T) -> Result<Vec<u8>, ProtocolError> {
        Err(ProtocolError::UnsupportedEncoding("messagepack"))
    }

    #[cfg(feature = "rmp-serde")]
    fn from_msgpack<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
        rmp_serde::from_slice(data)
            .map_err(|e| ProtocolError::Serialization(format!("MessagePack decode error: {}", e)))
    }

    #[cfg(not(feature = "rmp-serde"))]
    fn from_msgpack<T: DeserializeOwned>(_data: &[u8]) -> Result<T, ProtocolError> {
        Err(ProtocolError::UnsupportedEncoding("messagepack"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AgentMessage, RelayMessage};

    #[test]
    fn test_json_text_frame() {
        let codec = MessageCodec::new();
        let encoded = codec
            .encode(&RelayMessage::HeartbeatAck { timestamp: 42 })
            .unwrap();

        match &encoded {
            Encoded::Text(text) => assert!(text.contains("\"heartbeat_ack\"")),
            Encoded::Binary(_) => panic!("Expected text frame"),
        }

        let decoded: RelayMessage = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, RelayMessage::HeartbeatAck { timestamp: 42 });
    }

    #[test]
    fn test_messagepack_binary_frame() {
        let codec = MessageCodec::new().with_encoding(Encoding::MessagePack);
        let encoded = codec.encode(&AgentMessage::Heartbeat { timestamp: 7 }).unwrap();
        assert!(matches!(encoded, Encoded::Binary(_)));

        let decoded: AgentMessage = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, AgentMessage::Heartbeat { timestamp: 7 });
    }

    #[test]
    fn test_encode_rejects_oversized_message() {
        let codec = MessageCodec::new().with_max_message_size(16);
        let result = codec.encode(&RelayMessage::Connected {
            identity: "a-rather-long-identity".to_string(),
            relay_instance_id: "relay".to_string(),
            timestamp: 0,
        });

        match result {
            Err(ProtocolError::MessageTooLarge { max, .. }) => assert_eq!(max, 16),
            other => panic!("Expected MessageTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_oversized_text() {
        let codec = MessageCodec::new().with_max_message_size(8);
        let result: Result<AgentMessage, _> =
            codec.decode_text(r#"{"type":"heartbeat","timestamp":1}"#);
        assert!(matches!(result, Err(ProtocolError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_decode_invalid_json() {
        let codec = MessageCodec::new();
        let result: Result<AgentMessage, _> = codec.decode_text("{not json");
        assert!(matches!(result, Err(ProtocolError::Serialization(_))));
    }
}
