//! Message types exchanged between relay, agent and router
//!
//! Every socket frame and every pub/sub payload is one JSON object tagged by a
//! `type` field. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Messages the relay sends down an agent socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    /// Handshake accepted
    Connected {
        /// Identity the relay authenticated
        identity: String,
        /// Relay instance now owning the connection
        #[serde(rename = "relayInstanceId")]
        relay_instance_id: String,
        /// Relay clock, epoch milliseconds
        timestamp: u64,
    },

    /// Reply to a liveness signal
    HeartbeatAck {
        /// Relay clock, epoch milliseconds
        timestamp: u64,
    },

    /// Tool invocation for the agent
    ToolCall(ToolCall),
}

/// Messages an agent sends up its socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Liveness signal
    Heartbeat {
        /// Agent clock, epoch milliseconds
        timestamp: u64,
    },

    /// Result of a tool call
    ToolResponse(ToolResponse),
}

impl AgentMessage {
    /// Heartbeat stamped with the current time
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: now_millis(),
        }
    }
}

/// Payloads published on an identity's command channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandEnvelope {
    /// Tool call to forward to the agent, verbatim
    ToolCall(ToolCall),

    /// Another relay instance accepted a newer connection for this identity
    Takeover {
        /// Instance id of the new owner
        owner: String,
    },
}

/// A tool invocation. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Correlation id, unique per call
    pub request_id: Uuid,
    /// Target agent identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Registered tool name
    #[serde(alias = "toolName")]
    pub tool: String,
    /// Tool parameters
    #[serde(default)]
    pub params: Value,
    /// Execution timeout in milliseconds
    #[serde(rename = "timeout", default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Caller approved an operation that previously required confirmation
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub approved: bool,
}

impl ToolCall {
    /// Create a tool call with a fresh request id
    pub fn new(identity: impl Into<String>, tool: impl Into<String>, params: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            identity: Some(identity.into()),
            tool: tool.into(),
            params,
            timeout_ms: None,
            approved: false,
        }
    }

    /// Set the execution timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Mark the call as approved by a human
    pub fn approved(mut self) -> Self {
        self.approved = true;
        self
    }

    /// Execution timeout, if one was requested
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Result of a tool call. Emitted at most once per request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    /// Request this responds to
    pub request_id: Uuid,
    /// Whether the tool produced a result
    pub success: bool,
    /// Tool output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
    /// Wall-clock execution time in milliseconds
    pub execution_time: u64,
}

impl ToolResponse {
    /// Successful response
    pub fn success(request_id: Uuid, result: Value, elapsed: Duration) -> Self {
        Self {
            request_id,
            success: true,
            result: Some(result),
            error: None,
            execution_time: elapsed.as_millis() as u64,
        }
    }

    /// Failed response
    pub fn failure(request_id: Uuid, error: ErrorDetails, elapsed: Duration) -> Self {
        Self {
            request_id,
            success: false,
            result: None,
            error: Some(error),
            execution_time: elapsed.as_millis() as u64,
        }
    }

    /// Error code, if this is a failure
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Error details for failed tool responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Permission verdict that produced this error, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<PermissionDecision>,
    /// Additional context data
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl ErrorDetails {
    /// Create a new error details
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            decision: None,
            context: HashMap::new(),
        }
    }

    /// Attach the permission verdict
    pub fn with_decision(mut self, decision: PermissionDecision) -> Self {
        self.decision = Some(decision);
        self
    }

    /// Add context to the error
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error codes carried in tool responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Blocked by the permission model
    PermissionDenied,
    /// Allowed only after explicit approval; reissue with `approved`
    ConfirmationRequired,
    /// Command matched a denylist pattern
    DangerousCommandBlocked,
    /// Tool ran but failed
    ExecutionFailure,
    /// No tool registered under that name
    UnknownTool,
    /// Parameters did not match the tool
    InvalidParams,
    /// Tool exceeded its execution timeout
    Timeout,
    /// Agent-side fault outside the tool
    InternalError,
}

impl ErrorCode {
    /// Whether this code is a final refusal that must not be retried as-is
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::DangerousCommandBlocked | Self::UnknownTool
        )
    }
}

/// Risk classification of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Read-only or conventionally safe location
    Safe,
    /// Sensitive target or unrecognized location
    Critical,
    /// Deletes data
    Destructive,
}

/// Verdict of the permission engine for one operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionDecision {
    /// Whether the operation may run at all
    pub allowed: bool,
    /// Whether a human must approve it first
    pub requires_confirmation: bool,
    /// Risk classification
    pub classification: Classification,
    /// Why the engine decided this way
    pub reason: String,
}

impl PermissionDecision {
    /// Allowed without confirmation
    pub fn allow(classification: Classification, reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            requires_confirmation: false,
            classification,
            reason: reason.into(),
        }
    }

    /// Allowed once a human confirms
    pub fn confirm(classification: Classification, reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            requires_confirmation: true,
            classification,
            reason: reason.into(),
        }
    }

    /// Blocked outright
    pub fn block(classification: Classification, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            requires_confirmation: false,
            classification,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_wire_shape() {
        let call = ToolCall::new("laptop-1", "read_file", json!({"path": "/tmp/a"}))
            .with_timeout(Duration::from_secs(5));
        let wire = serde_json::to_value(RelayMessage::ToolCall(call.clone())).unwrap();

        assert_eq!(wire["type"], "tool_call");
        assert_eq!(wire["requestId"], call.request_id.to_string());
        assert_eq!(wire["tool"], "read_file");
        assert_eq!(wire["timeout"], 5000);
        assert!(wire.get("approved").is_none());
    }

    #[test]
    fn test_tool_call_accepts_tool_name_alias() {
        let raw = json!({
            "type": "tool_call",
            "requestId": Uuid::new_v4().to_string(),
            "toolName": "list_directory",
            "params": {"path": "."}
        });

        match serde_json::from_value::<RelayMessage>(raw).unwrap() {
            RelayMessage::ToolCall(call) => {
                assert_eq!(call.tool, "list_directory");
                assert!(call.identity.is_none());
                assert!(!call.approved);
            }
            other => panic!("Expected ToolCall, got {:?}", other),
        }
    }

    #[test]
    fn test_connected_field_names() {
        let msg = RelayMessage::Connected {
            identity: "laptop-1".to_string(),
            relay_instance_id: "relay-a".to_string(),
            timestamp: 1,
        };
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], "connected");
        assert_eq!(wire["relayInstanceId"], "relay-a");
    }

    #[test]
    fn test_command_envelope_reads_tool_call_payload() {
        let call = ToolCall::new("laptop-1", "get_system_info", Value::Null);
        let text = serde_json::to_string(&RelayMessage::ToolCall(call.clone())).unwrap();

        match serde_json::from_str::<CommandEnvelope>(&text).unwrap() {
            CommandEnvelope::ToolCall(parsed) => assert_eq!(parsed, call),
            other => panic!("Expected ToolCall, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_response_carries_decision() {
        let decision = PermissionDecision::confirm(Classification::Critical, "sensitive file");
        let error = ErrorDetails::new(ErrorCode::ConfirmationRequired, "needs approval")
            .with_decision(decision.clone())
            .with_context("path", ".env");
        let resp = ToolResponse::failure(Uuid::new_v4(), error, Duration::from_millis(3));

        let wire = serde_json::to_value(AgentMessage::ToolResponse(resp.clone())).unwrap();
        assert_eq!(wire["success"], false);
        assert_eq!(wire["executionTime"], 3);
        assert_eq!(wire["error"]["code"], "confirmation_required");
        assert_eq!(wire["error"]["decision"]["requiresConfirmation"], true);
        assert_eq!(resp.error_code(), Some(ErrorCode::ConfirmationRequired));
    }

    #[test]
    fn test_classification_ordering() {
        assert!(Classification::Safe < Classification::Critical);
        assert!(Classification::Critical < Classification::Destructive);
    }

    #[test]
    fn test_terminal_codes() {
        assert!(ErrorCode::PermissionDenied.is_terminal());
        assert!(ErrorCode::DangerousCommandBlocked.is_terminal());
        assert!(!ErrorCode::ConfirmationRequired.is_terminal());
        assert!(!ErrorCode::Timeout.is_terminal());
    }

    proptest! {
        #[test]
        fn test_tool_call_ids_are_unique(tool in "[a-z_]{1,16}") {
            let a = ToolCall::new("id", tool.clone(), Value::Null);
            let b = ToolCall::new("id", tool, Value::Null);
            prop_assert_ne!(a.request_id, b.request_id);
        }
    }
}
