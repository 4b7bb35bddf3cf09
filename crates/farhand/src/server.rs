//! HTTP surface of a relay instance: agent WebSocket endpoint plus health
//! and metrics

use crate::connection::{ConnectionManager, HandshakeParams, Outbound};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use farhand_proto::keys::{IDENTITY_HEADER, SECRET_HEADER};
use farhand_proto::{Encoded, MessageCodec};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Close code for a socket the peer closed or dropped
const CLOSE_NORMAL: u16 = 1000;

#[derive(Clone)]
struct AppState {
    manager: Arc<ConnectionManager>,
}

#[derive(Debug, Default, Deserialize)]
struct HandshakeQuery {
    identity: Option<String>,
    secret: Option<String>,
}

/// Build the relay's axum router
pub fn router(manager: Arc<ConnectionManager>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(agent_socket))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { manager })
}

/// Serve until `signal` resolves, then drain the manager before the
/// listener stops
pub async fn serve(
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(manager.clone());
    let grace = manager.config().drain_grace;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            manager.shutdown(grace).await;
        })
        .await
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn handshake_params(headers: &HeaderMap, query: HandshakeQuery) -> HandshakeParams {
    HandshakeParams::new(
        header(headers, IDENTITY_HEADER)
            .or(query.identity)
            .unwrap_or_default(),
        header(headers, SECRET_HEADER)
            .or(query.secret)
            .unwrap_or_default(),
    )
}

async fn agent_socket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(query): Query<HandshakeQuery>,
    State(state): State<AppState>,
) -> Response {
    let params = handshake_params(&headers, query);
    let max_size = state.manager.config().max_message_size;
    ws.max_message_size(max_size)
        .on_upgrade(move |socket| serve_agent(socket, state.manager, params))
}

async fn serve_agent(socket: WebSocket, manager: Arc<ConnectionManager>, params: HandshakeParams) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_frames(sink, rx, manager.codec().clone()));

    let conn = match manager.open(params, tx).await {
        Ok(conn) => conn,
        Err(e) => {
            debug!("Handshake refused: {}", e);
            let _ = writer.await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = conn.closed() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    manager.handle_inbound(&conn, &Encoded::Text(text)).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    manager.handle_inbound(&conn, &Encoded::Binary(Bytes::from(data))).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Socket error for {}: {}", conn.identity(), e);
                    break;
                }
            }
        }
    }

    manager.close(&conn, CLOSE_NORMAL, "socket closed").await;
    let _ = writer.await;
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    codec: MessageCodec,
) {
    while let Some(frame) = rx.recv().await {
        let (message, last) = match frame {
            Outbound::Message(message) => match codec.encode(&message) {
                Ok(Encoded::Text(text)) => (Message::Text(text), false),
                Ok(Encoded::Binary(data)) => (Message::Binary(data.to_vec()), false),
                Err(e) => {
                    warn!("Dropping outbound message: {}", e);
                    continue;
                }
            },
            Outbound::Forward(text) => (Message::Text(text), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: Cow::Owned(reason),
                })),
                true,
            ),
        };

        if sink.send(message).await.is_err() || last {
            break;
        }
    }
    let _ = sink.close().await;
}

/// Process memory figures from `/proc/self/status`, in kilobytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Resident set size
    pub rss_kb: u64,
    /// Peak resident set size
    pub peak_rss_kb: u64,
    /// Virtual memory size
    pub virtual_kb: u64,
}

impl MemoryStats {
    /// Parse the `Vm*` lines of a `/proc/<pid>/status` document
    pub fn parse(status: &str) -> Option<Self> {
        let field = |name: &str| {
            status.lines().find_map(|line| {
                let rest = line.strip_prefix(name)?.strip_prefix(':')?;
                rest.split_whitespace().next()?.parse::<u64>().ok()
            })
        };
        Some(Self {
            rss_kb: field("VmRSS")?,
            peak_rss_kb: field("VmHWM").unwrap_or(0),
            virtual_kb: field("VmSize").unwrap_or(0),
        })
    }

    /// Figures for this process, where the platform exposes them
    pub async fn current() -> Option<Self> {
        let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
        Self::parse(&status)
    }
}

async fn health_fields(manager: &ConnectionManager) -> (StatusCode, serde_json::Map<String, Value>) {
    let snapshot = manager.snapshot().await;
    let (code, status) = match manager.registry_health().await {
        Err(e) => {
            warn!("Registry health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
        Ok(()) if !snapshot.accepting => (StatusCode::SERVICE_UNAVAILABLE, "draining"),
        Ok(()) => (StatusCode::OK, "ok"),
    };

    let mut fields = serde_json::Map::new();
    fields.insert("status".to_string(), json!(status));
    fields.insert("instanceId".to_string(), json!(snapshot.instance_id));
    fields.insert("connectionCount".to_string(), json!(snapshot.connection_count));
    fields.insert("uptime".to_string(), json!(snapshot.uptime_secs));
    (code, fields)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (code, fields) = health_fields(&state.manager).await;
    (code, Json(Value::Object(fields)))
}

async fn metrics(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let (code, mut fields) = health_fields(&state.manager).await;
    let snapshot = state.manager.snapshot().await;
    fields.insert(
        "connectedIdentities".to_string(),
        json!(snapshot.connected_identities),
    );
    fields.insert("inFlight".to_string(), json!(snapshot.in_flight));
    fields.insert("memory".to_string(), json!(MemoryStats::current().await));
    (code, Json(Value::Object(fields)))
}
