//! Agent connection lifecycle on one relay instance
//!
//! A connection moves through handshake, connected and closing. While
//! connected, two background tasks run beside the socket: a forwarder that
//! relays payloads from the identity's command channel down the socket, and a
//! liveness monitor that closes the connection once heartbeats stop. Both exit
//! when the connection's `closed` flag flips, so closing never aborts the task
//! that asked for it.

use crate::audit::{AuditLog, AuditRecord, TracingAuditLog};
use crate::config::RelayConfig;
use crate::credentials::{AgentStatus, CredentialStore};
use crate::error::{RegistryError, RelayError};
use crate::registry::{ConnectionRegistry, Subscription};
use farhand_proto::keys::{
    commands_channel, response_channel, CLOSE_AUTH_FAILED, CLOSE_GOING_AWAY, CLOSE_SUPERSEDED,
    CLOSE_HEARTBEAT_TIMEOUT,
};
use farhand_proto::message::now_millis;
use farhand_proto::{AgentMessage, CommandEnvelope, Encoded, MessageCodec, RelayMessage, ToolResponse};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;


/// Socket close code for relay-side infrastructure failures
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Frames queued for an agent socket
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Message encoded with the relay's codec
    Message(RelayMessage),
    /// Pre-encoded JSON text, sent as-is
    Forward(String),
    /// Close the socket
    Close {
        /// WebSocket close code
        code: u16,
        /// Human-readable reason
        reason: String,
    },
}

/// Identity and secret presented when the socket opens
#[derive(Debug, Clone)]
pub struct HandshakeParams {
    /// Claimed identity
    pub identity: String,
    /// Shared secret
    pub secret: String,
}

impl HandshakeParams {
    /// Bundle identity and secret
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }
}

#[derive(Debug)]
struct PendingCall {
    tool: String,
    params: Value,
}

/// One authenticated agent socket owned by this relay instance
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    identity: String,
    connected_at: Instant,
    outbound: mpsc::UnboundedSender<Outbound>,
    last_liveness: Mutex<Instant>,
    pending: Mutex<HashMap<Uuid, PendingCall>>,
    closed: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Connection {
    fn new(identity: String, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        let now = Instant::now();
        let (closed, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            identity,
            connected_at: now,
            outbound,
            last_liveness: Mutex::new(now),
            pending: Mutex::new(HashMap::new()),
            closed,
        }
    }

    /// Per-socket id, distinct across reconnects of the same identity
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Authenticated identity
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// How long the socket has been open
    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Time since the last heartbeat
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_liveness).elapsed()
    }

    /// Tool calls forwarded but not yet answered
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Whether closing has started
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once closing has started
    pub async fn closed(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn send(&self, frame: Outbound) -> bool {
        self.outbound.send(frame).is_ok()
    }

    fn touch(&self) {
        *lock(&self.last_liveness) = Instant::now();
    }

    fn track(&self, request_id: Uuid, tool: String, params: Value) {
        lock(&self.pending).insert(request_id, PendingCall { tool, params });
    }

    fn complete(&self, request_id: &Uuid) -> Option<PendingCall> {
        lock(&self.pending).remove(request_id)
    }

    /// Returns `true` for the caller that actually started closing
    fn begin_close(&self) -> bool {
        !self.closed.send_replace(true)
    }
}

/// Point-in-time view of a relay instance
#[derive(Debug, Clone, PartialEq)]
pub struct RelaySnapshot {
    /// Instance id
    pub instance_id: String,
    /// Open agent sockets
    pub connection_count: usize,
    /// Their identities, sorted
    pub connected_identities: Vec<String>,
    /// Tool calls awaiting a response
    pub in_flight: usize,
    /// Seconds since the manager was created
    pub uptime_secs: u64,
    /// Whether new handshakes are accepted
    pub accepting: bool,
}

/// Owns every agent connection on this relay instance
pub struct ConnectionManager {
    config: RelayConfig,
    registry: Arc<dyn ConnectionRegistry>,
    credentials: Arc<dyn CredentialStore>,
    audit: Arc<dyn AuditLog>,
    codec: MessageCodec,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    accepting: AtomicBool,
    started: Instant,
    drained: Notify,
}

impl ConnectionManager {
    /// Create a manager. Audit records go to tracing until
    /// [`ConnectionManager::with_audit_log`] replaces the sink.
    pub fn new(
        config: RelayConfig,
        registry: Arc<dyn ConnectionRegistry>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let codec = MessageCodec::new().with_max_message_size(config.max_message_size);
        Self {
            config,
            registry,
            credentials,
            audit: Arc::new(TracingAuditLog),
            codec,
            connections: RwLock::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            started: Instant::now(),
            drained: Notify::new(),
        }
    }

    /// Replace the audit sink
    pub fn with_audit_log(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    /// Relay settings
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Id this instance registers as owner
    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    /// Codec for socket frames
    pub fn codec(&self) -> &MessageCodec {
        &self.codec
    }

    /// Whether new handshakes are accepted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Live connection for `identity`, if this instance owns one
    pub async fn connection(&self, identity: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(identity).cloned()
    }

    /// Authenticate and register a new socket.
    ///
    /// Frames for the socket, including the close frame on rejection, are
    /// queued on `outbound`. On success the `connected` message is already
    /// queued when this returns.
    pub async fn open(
        self: &Arc<Self>,
        params: HandshakeParams,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Result<Arc<Connection>, RelayError> {
        let HandshakeParams { identity, secret } = params;
        let reject = |code: u16, reason: &str| {
            let _ = outbound.send(Outbound::Close {
                code,
                reason: reason.to_string(),
            });
        };

        if !self.is_accepting() {
            reject(CLOSE_GOING_AWAY, "relay shutting down");
            return Err(RelayError::ShuttingDown);
        }

        let valid = match self.credentials.validate(&identity, &secret).await {
            Ok(valid) => valid,
            Err(e) => {
                error!("Credential check for {} failed: {}", identity, e);
                reject(CLOSE_INTERNAL_ERROR, "credential store unavailable");
                return Err(e);
            }
        };
        if !valid {
            warn!("Rejected handshake for {}", identity);
            reject(CLOSE_AUTH_FAILED, "authentication failed");
            return Err(RelayError::AuthenticationFailure { identity });
        }

        if let Some(previous) = self.connection(&identity).await {
            info!("Replacing existing connection for {}", identity);
            self.close(&previous, CLOSE_SUPERSEDED, "replaced by a newer connection")
                .await;
        }

        let instance_id = self.instance_id();
        if let Err(e) = self
            .registry
            .register(&identity, instance_id, self.config.registry_ttl)
            .await
        {
            error!("Failed to register {}: {}", identity, e);
            reject(CLOSE_INTERNAL_ERROR, "registry unavailable");
            return Err(e.into());
        }

        let subscription = match self.registry.subscribe(&commands_channel(&identity)).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Failed to subscribe for {}: {}", identity, e);
                if let Err(e) = self.registry.unregister(&identity, instance_id).await {
                    warn!("Failed to roll back registration of {}: {}", identity, e);
                }
                reject(CLOSE_INTERNAL_ERROR, "registry unavailable");
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .credentials
            .set_status(&identity, AgentStatus::Connected)
            .await
        {
            warn!("Failed to record status for {}: {}", identity, e);
        }

        let conn = Arc::new(Connection::new(identity.clone(), outbound));
        if let Some(raced) = self
            .connections
            .write()
            .await
            .insert(identity.clone(), conn.clone())
        {
            // Another handshake for the same identity finished in between
            raced.begin_close();
            raced.send(Outbound::Close {
                code: CLOSE_SUPERSEDED,
                reason: "replaced by a newer connection".to_string(),
            });
        }

        self.announce_takeover(&identity).await;

        tokio::spawn(self.clone().forward_commands(conn.clone(), subscription));
        tokio::spawn(self.clone().monitor_liveness(conn.clone()));

        conn.send(Outbound::Message(RelayMessage::Connected {
            identity: identity.clone(),
            relay_instance_id: instance_id.to_string(),
            timestamp: now_millis(),
        }));
        info!("Agent {} connected to {}", identity, instance_id);
        Ok(conn)
    }

    async fn announce_takeover(&self, identity: &str) {
        let notice = CommandEnvelope::Takeover {
            owner: self.instance_id().to_string(),
        };
        let payload = match serde_json::to_string(&notice) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode takeover notice: {}", e);
                return;
            }
        };
        if let Err(e) = self
            .registry
            .publish(&commands_channel(identity), payload)
            .await
        {
            warn!("Failed to announce takeover of {}: {}", identity, e);
        }
    }

    /// Process one frame read from `conn`'s socket. Undecodable frames are
    /// logged and dropped.
    pub async fn handle_inbound(&self, conn: &Arc<Connection>, frame: &Encoded) {
        let message: AgentMessage = match self.codec.decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring frame from {}: {}", conn.identity, e);
                return;
            }
        };

        match message {
            AgentMessage::Heartbeat { .. } => self.on_heartbeat(conn).await,
            AgentMessage::ToolResponse(response) => self.on_tool_response(conn, response).await,
        }
    }

    async fn on_heartbeat(&self, conn: &Arc<Connection>) {
        conn.touch();

        match self
            .registry
            .refresh(&conn.identity, self.instance_id(), self.config.registry_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!("{} is now owned by another relay", conn.identity);
                self.close(conn, CLOSE_SUPERSEDED, "connection taken over by another relay")
                    .await;
                return;
            }
            Err(e) => warn!("Failed to refresh registration of {}: {}", conn.identity, e),
        }

        conn.send(Outbound::Message(RelayMessage::HeartbeatAck {
            timestamp: now_millis(),
        }));
    }

    async fn on_tool_response(&self, conn: &Arc<Connection>, response: ToolResponse) {
        let request_id = response.request_id;
        let pending = conn.complete(&request_id);
        if pending.is_none() {
            debug!("Response {} from {} was not forwarded here", request_id, conn.identity);
        }

        match serde_json::to_string(&response) {
            Ok(payload) => match self
                .registry
                .publish(&response_channel(&request_id), payload)
                .await
            {
                Ok(0) => debug!("Nobody is waiting for response {}", request_id),
                Ok(_) => {}
                Err(e) => error!("Failed to publish response {}: {}", request_id, e),
            },
            Err(e) => error!("Failed to encode response {}: {}", request_id, e),
        }
        self.drained.notify_waiters();

        let (tool, params) = match pending {
            Some(call) => (Some(call.tool), Some(call.params)),
            None => (None, None),
        };
        let record = AuditRecord::from_response(conn.identity.clone(), tool, params, &response);
        let audit = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.append(record).await {
                warn!("Failed to append audit record for {}: {}", request_id, e);
            }
        });
    }

    /// Close `conn`. Safe to call more than once and from any task.
    ///
    /// The registry entry is removed only if this socket is still the
    /// identity's local connection and the entry still names this instance.
    pub async fn close(&self, conn: &Connection, code: u16, reason: &str) {
        if !conn.begin_close() {
            return;
        }

        let owned = {
            let mut connections = self.connections.write().await;
            match connections.get(&conn.identity) {
                Some(current) if current.id == conn.id => {
                    connections.remove(&conn.identity);
                    true
                }
                _ => false,
            }
        };

        conn.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        info!("Closing connection for {} ({}): {}", conn.identity, code, reason);

        if owned && self.release_registration(&conn.identity).await {
            if let Err(e) = self
                .credentials
                .set_status(&conn.identity, AgentStatus::Disconnected)
                .await
            {
                warn!("Failed to record status for {}: {}", conn.identity, e);
            }
        }

        self.drained.notify_waiters();
    }

    /// Drop this instance's registry entry. Returns `false` when another
    /// instance owns the identity now.
    async fn release_registration(&self, identity: &str) -> bool {
        match self.registry.unregister(identity, self.instance_id()).await {
            Ok(true) => true,
            Ok(false) => match self.registry.lookup_owner(identity).await {
                Ok(Some(owner)) => {
                    debug!("{} is registered to {}", identity, owner);
                    false
                }
                Ok(None) => true,
                Err(e) => {
                    warn!("Failed to look up owner of {}: {}", identity, e);
                    false
                }
            },
            Err(e) => {
                warn!("Failed to unregister {}: {}", identity, e);
                false
            }
        }
    }

    /// Stop accepting handshakes, give in-flight calls up to `grace` to be
    /// answered, then close every connection.
    pub async fn shutdown(&self, grace: Duration) {
        self.accepting.store(false, Ordering::SeqCst);
        info!("Draining relay {}", self.instance_id());

        let deadline = Instant::now() + grace;
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let in_flight = self.in_flight().await;
            if in_flight == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!("Drain window elapsed with {} calls in flight", in_flight);
                break;
            }
        }

        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();
        for conn in connections {
            self.close(&conn, CLOSE_GOING_AWAY, "relay shutting down").await;
        }
        info!("Relay {} drained", self.instance_id());
    }

    async fn in_flight(&self) -> usize {
        self.connections
            .read()
            .await
            .values()
            .map(|conn| conn.pending_count())
            .sum()
    }

    /// Current connection state
    pub async fn snapshot(&self) -> RelaySnapshot {
        let connections = self.connections.read().await;
        let mut connected_identities: Vec<String> = connections.keys().cloned().collect();
        connected_identities.sort();

        RelaySnapshot {
            instance_id: self.config.instance_id.clone(),
            connection_count: connections.len(),
            connected_identities,
            in_flight: connections.values().map(|conn| conn.pending_count()).sum(),
            uptime_secs: self.started.elapsed().as_secs(),
            accepting: self.is_accepting(),
        }
    }

    /// Whether the coordination store answers
    pub async fn registry_health(&self) -> Result<(), RegistryError> {
        self.registry.health().await
    }

    async fn forward_commands(self: Arc<Self>, conn: Arc<Connection>, mut subscription: Subscription) {
        loop {
            tokio::select! {
                _ = conn.closed() => break,
                payload = subscription.next() => {
                    let Some(payload) = payload else {
                        warn!("Command channel for {} ended", conn.identity);
                        self.close(&conn, CLOSE_INTERNAL_ERROR, "command channel lost").await;
                        break;
                    };

                    match serde_json::from_str::<CommandEnvelope>(&payload) {
                        Ok(CommandEnvelope::ToolCall(call)) => {
                            debug!("Forwarding {} ({}) to {}", call.request_id, call.tool, conn.identity);
                            conn.track(call.request_id, call.tool, call.params);
                            if !conn.send(Outbound::Forward(payload)) {
                                break;
                            }
                        }
                        Ok(CommandEnvelope::Takeover { owner }) => {
                            if owner != self.config.instance_id {
                                info!("{} taken over by {}", conn.identity, owner);
                                self.close(&conn, CLOSE_SUPERSEDED, "connection taken over by another relay")
                                    .await;
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring malformed command for {}: {}", conn.identity, e),
                    }
                }
            }
        }
        subscription.unsubscribe();
        debug!("Forwarder for {} stopped", conn.identity);
    }

    async fn monitor_liveness(self: Arc<Self>, conn: Arc<Connection>) {
        let period = self.config.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = conn.closed() => break,
                _ = ticker.tick() => {
                    let idle = conn.idle_for();
                    if idle > self.config.heartbeat_timeout {
                        warn!("No heartbeat from {} for {:?}", conn.identity, idle);
                        self.close(&conn, CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout").await;
                        break;
                    }
                }
            }
        }
    }
}
