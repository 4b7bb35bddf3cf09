//! Coordination-store key and channel names

use uuid::Uuid;

/// Default time-to-live of a registry entry, in seconds
pub const DEFAULT_REGISTRY_TTL_SECS: u64 = 120;

/// Socket close code: identity/secret rejected
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// Socket close code: a newer connection for the same identity took over
pub const CLOSE_SUPERSEDED: u16 = 4002;

/// Socket close code: no liveness signal within the timeout
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4003;

/// Socket close code: relay is shutting down
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Handshake header carrying the agent identity
pub const IDENTITY_HEADER: &str = "x-farhand-identity";

/// Handshake header carrying the agent secret
pub const SECRET_HEADER: &str = "x-farhand-secret";

/// Key holding the id of the relay instance that owns `identity`'s connection
pub fn connection_key(identity: &str) -> String {
    format!("agent:{}:connection", identity)
}

/// Channel carrying tool calls (and takeover notices) for `identity`
pub fn commands_channel(identity: &str) -> String {
    format!("agent:{}:commands", identity)
}

/// Single-use channel carrying the response to `request_id`
pub fn response_channel(request_id: &Uuid) -> String {
    format!("response:{}", request_id)
}
