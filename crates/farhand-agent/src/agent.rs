//! Agent client: connect, authenticate, heartbeat, serve tool calls, reconnect

use crate::backoff::{Backoff, Sleeper, TokioSleeper};
use crate::config::{AgentConfig, IDENTITY_HEADER, SECRET_HEADER};
use crate::executor::{ToolContext, ToolExecutor};
use crate::permission::PermissionEngine;
use crate::router::ToolDispatcher;
use anyhow::{Context, Result};
use async_trait::async_trait;
use farhand_proto::keys::CLOSE_AUTH_FAILED;
use farhand_proto::{
    AgentMessage, Encoded, ErrorCode, ErrorDetails, MessageCodec, RelayMessage, ToolResponse,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};

/// Transport error type
pub type WsError = tungstenite::Error;
/// Outgoing half of a relay connection
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;
/// Incoming half of a relay connection
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, WsError>> + Send>>;

/// Opens authenticated connections to the relay
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one connection
    async fn connect(&self, config: &AgentConfig) -> Result<(FrameSink, FrameStream)>;
}

/// [`Connector`] over a real WebSocket, credentials in upgrade headers
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, config: &AgentConfig) -> Result<(FrameSink, FrameStream)> {
        let url = config.url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .context("Failed to build upgrade request")?;
        let headers = request.headers_mut();
        headers.insert(
            IDENTITY_HEADER,
            HeaderValue::from_str(&config.identity).context("identity is not a valid header")?,
        );
        headers.insert(
            SECRET_HEADER,
            HeaderValue::from_str(&config.secret).context("secret is not a valid header")?,
        );

        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?;
        let (sink, stream) = socket.split();
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Where the client is in its connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection, possibly waiting to retry
    Disconnected,
    /// Socket being opened or awaiting the relay's confirmation
    Connecting,
    /// Relay confirmed the connection
    Connected,
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    /// Local shutdown requested
    Shutdown,
    /// Relay refused the credentials
    Rejected(String),
    /// Socket closed for any other reason
    Closed(String),
}

/// Long-running client that keeps one connection to the relay open and
/// serves the tool calls arriving on it
pub struct AgentClient {
    config: AgentConfig,
    dispatcher: Arc<ToolDispatcher>,
    codec: MessageCodec,
    connector: Arc<dyn Connector>,
    sleeper: Arc<dyn Sleeper>,
    state: watch::Sender<ConnectionState>,
    shutdown: watch::Sender<bool>,
}

impl AgentClient {
    /// Create a client that dispatches through `dispatcher`
    pub fn new(config: AgentConfig, dispatcher: Arc<ToolDispatcher>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            dispatcher,
            codec: MessageCodec::new(),
            connector: Arc::new(WebSocketConnector),
            sleeper: Arc::new(TokioSleeper),
            state,
            shutdown,
        }
    }

    /// Create a client with the built-in tools and a permission engine built
    /// from `config`
    pub fn from_config(config: AgentConfig) -> Self {
        let engine = Arc::new(PermissionEngine::new(
            config.mode,
            config.allowed_directories.clone(),
        ));
        let executor = Arc::new(ToolExecutor::with_builtin_tools(ToolContext::new(
            engine.clone(),
        )));
        Self::new(config, Arc::new(ToolDispatcher::new(engine, executor)))
    }

    /// Use a different transport
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Use a different source of reconnect delays
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Use a different codec for outgoing frames
    pub fn with_codec(mut self, codec: MessageCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Stop [`AgentClient::run`]: the open connection is closed and no
    /// reconnect is attempted
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Connect and serve until [`AgentClient::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting agent {} against {}",
            self.config.identity, self.config.relay_url
        );

        let mut shutdown = self.shutdown.subscribe();
        let mut backoff = Backoff::new(
            self.config.reconnect_floor(),
            self.config.reconnect_ceiling(),
        );

        while !*shutdown.borrow() {
            self.state.send_replace(ConnectionState::Connecting);

            let connected = tokio::select! {
                result = self.connector.connect(&self.config) => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok((sink, stream)) => {
                    match self
                        .run_session(sink, stream, &mut backoff, &mut shutdown)
                        .await
                    {
                        Ok(SessionEnd::Shutdown) => break,
                        Ok(SessionEnd::Rejected(reason)) => {
                            error!("Relay rejected credentials: {}", reason)
                        }
                        Ok(SessionEnd::Closed(reason)) => warn!("Connection closed: {}", reason),
                        Err(e) => warn!("Connection lost: {:#}", e),
                    }
                }
                Err(e) => warn!("Connect failed: {:#}", e),
            }

            self.state.send_replace(ConnectionState::Disconnected);
            let delay = backoff.next_delay();
            info!("Reconnecting in {:?}", delay);

            tokio::select! {
                _ = self.sleeper.sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!("Agent stopped");
        Ok(())
    }

    async fn run_session(
        &self,
        mut sink: FrameSink,
        mut stream: FrameStream,
        backoff: &mut Backoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let (responses_tx, mut responses_rx) = mpsc::unbounded_channel::<ToolResponse>();
        let period = self.config.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut confirmed = false;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let close = Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "agent shutting down".into(),
                    }));
                    if let Err(e) = sink.send(close).await {
                        debug!("Close frame not delivered: {}", e);
                    }
                    return Ok(SessionEnd::Shutdown);
                }

                _ = heartbeat.tick(), if confirmed => {
                    self.send(&mut sink, &AgentMessage::heartbeat()).await?;
                }

                Some(response) = responses_rx.recv() => {
                    debug!("Sending response for {}", response.request_id);
                    self.send_response(&mut sink, response).await?;
                }

                frame = stream.next() => {
                    let Some(frame) = frame else {
                        return Ok(SessionEnd::Closed("stream ended".to_string()));
                    };
                    let decoded = match frame? {
                        Message::Text(text) => self.codec.decode_text::<RelayMessage>(&text),
                        Message::Binary(data) => self.codec.decode_binary::<RelayMessage>(&data),
                        Message::Ping(payload) => {
                            sink.send(Message::Pong(payload)).await?;
                            continue;
                        }
                        Message::Close(frame) => return Ok(close_reason(frame)),
                        Message::Pong(_) | Message::Frame(_) => continue,
                    };

                    match decoded {
                        Ok(RelayMessage::Connected { identity, relay_instance_id, .. }) => {
                            info!("Connected as {} via relay {}", identity, relay_instance_id);
                            confirmed = true;
                            backoff.reset();
                            self.state.send_replace(ConnectionState::Connected);
                            self.send(&mut sink, &AgentMessage::heartbeat()).await?;
                        }
                        Ok(RelayMessage::HeartbeatAck { timestamp }) => {
                            debug!("Heartbeat acknowledged at {}", timestamp);
                        }
                        Ok(RelayMessage::ToolCall(call)) => {
                            debug!("Tool call {} for {}", call.request_id, call.tool);
                            let dispatcher = self.dispatcher.clone();
                            let responses_tx = responses_tx.clone();
                            tokio::spawn(async move {
                                let response = dispatcher.dispatch(call).await;
                                if responses_tx.send(response).is_err() {
                                    debug!("Connection gone before response was ready");
                                }
                            });
                        }
                        Err(e) => warn!("Ignoring undecodable frame: {}", e),
                    }
                }
            }
        }
    }

    async fn send(&self, sink: &mut FrameSink, message: &AgentMessage) -> Result<()> {
        let encoded = self.codec.encode(message)?;
        sink.send(into_frame(encoded)).await?;
        Ok(())
    }

    /// Send a response; one that cannot be encoded is replaced by a failure
    /// so the caller still hears back
    async fn send_response(&self, sink: &mut FrameSink, response: ToolResponse) -> Result<()> {
        let request_id = response.request_id;
        let execution_time = response.execution_time;

        let encoded = match self.codec.encode(&AgentMessage::ToolResponse(response)) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Response for {} not encodable: {}", request_id, e);
                let mut failure = ToolResponse::failure(
                    request_id,
                    ErrorDetails::new(ErrorCode::InternalError, e.to_string()),
                    Default::default(),
                );
                failure.execution_time = execution_time;
                self.codec.encode(&AgentMessage::ToolResponse(failure))?
            }
        };

        sink.send(into_frame(encoded)).await?;
        Ok(())
    }
}

fn into_frame(encoded: Encoded) -> Message {
    match encoded {
        Encoded::Text(text) => Message::Text(text),
        Encoded::Binary(data) => Message::Binary(data.to_vec()),
    }
}

fn close_reason(frame: Option<CloseFrame<'static>>) -> SessionEnd {
    match frame {
        Some(frame) if u16::from(frame.code) == CLOSE_AUTH_FAILED => {
            SessionEnd::Rejected(frame.reason.to_string())
        }
        Some(frame) => SessionEnd::Closed(format!("{} {}", u16::from(frame.code), frame.reason)),
        None => SessionEnd::Closed("no close frame".to_string()),
    }
}
