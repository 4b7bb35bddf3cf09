//! End-to-end tool calls through relay instances sharing one registry, with
//! the real agent-side dispatcher answering

use farhand::proto::keys::{commands_channel, CLOSE_GOING_AWAY, CLOSE_SUPERSEDED};
use farhand::proto::{AgentMessage, CommandEnvelope, Encoded, ErrorCode, RelayMessage, ToolCall};
use farhand::{
    CommandRouter, Connection, ConnectionManager, ConnectionRegistry, HandshakeParams,
    MemoryRegistry, Outbound, RelayConfig, RouterError, StaticCredentials,
};
use farhand_agent::{PermissionEngine, PermissionMode, ToolContext, ToolDispatcher, ToolExecutor};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

fn manager(registry: &MemoryRegistry, instance_id: &str) -> Arc<ConnectionManager> {
    let credentials = StaticCredentials::new().with_agent("laptop-1", "s3cret");
    Arc::new(ConnectionManager::new(
        RelayConfig::default().with_instance_id(instance_id),
        Arc::new(registry.clone()),
        Arc::new(credentials),
    ))
}

fn dispatcher(mode: PermissionMode, root: PathBuf) -> Arc<ToolDispatcher> {
    let engine = Arc::new(PermissionEngine::new(mode, vec![root]));
    let executor = Arc::new(ToolExecutor::with_builtin_tools(ToolContext::new(
        engine.clone(),
    )));
    Arc::new(ToolDispatcher::new(engine, executor))
}

/// Stand-in for the agent's socket: forwarded calls go through `dispatcher`
/// and the responses come back in as socket frames. Resolves to every
/// non-call frame seen, ending with the close frame.
fn spawn_agent(
    manager: Arc<ConnectionManager>,
    conn: Arc<Connection>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    dispatcher: Arc<ToolDispatcher>,
) -> JoinHandle<Vec<Outbound>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Forward(text) => {
                    let Ok(RelayMessage::ToolCall(call)) = serde_json::from_str::<RelayMessage>(&text)
                    else {
                        continue;
                    };
                    let response = dispatcher.dispatch(call).await;
                    let frame = Encoded::Text(
                        serde_json::to_string(&AgentMessage::ToolResponse(response)).unwrap(),
                    );
                    manager.handle_inbound(&conn, &frame).await;
                }
                Outbound::Close { .. } => {
                    seen.push(frame);
                    break;
                }
                other => seen.push(other),
            }
        }
        seen
    })
}

async fn connect(
    manager: &Arc<ConnectionManager>,
) -> (Arc<Connection>, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = manager
        .open(HandshakeParams::new("laptop-1", "s3cret"), tx)
        .await
        .unwrap();
    (conn, rx)
}

#[tokio::test]
async fn test_read_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.txt"), "hello from the far side").unwrap();

    let registry = MemoryRegistry::new();
    let relay = manager(&registry, "relay-a");
    let (conn, rx) = connect(&relay).await;
    spawn_agent(
        relay.clone(),
        conn,
        rx,
        dispatcher(PermissionMode::Balanced, dir.path().to_path_buf()),
    );

    let router = CommandRouter::new(Arc::new(registry.clone()));
    let response = router
        .invoke(
            "laptop-1",
            "read_file",
            json!({"path": "notes.txt"}),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert!(response.success, "unexpected failure: {:?}", response.error);
    assert_eq!(
        response.result.unwrap()["content"],
        "hello from the far side"
    );
    assert_eq!(registry.subscriber_count(&commands_channel("laptop-1")), 1);
    assert_eq!(registry.total_subscribers(), 1);
}

#[tokio::test]
async fn test_permission_outcomes_are_data() {
    let dir = tempfile::tempdir().unwrap();
    let registry = MemoryRegistry::new();
    let relay = manager(&registry, "relay-a");
    let (conn, rx) = connect(&relay).await;
    spawn_agent(
        relay.clone(),
        conn,
        rx,
        dispatcher(PermissionMode::Balanced, dir.path().to_path_buf()),
    );
    let router = CommandRouter::new(Arc::new(registry));

    let outside = router
        .invoke("laptop-1", "read_file", json!({"path": "/etc/hostname"}), None)
        .await
        .unwrap();
    assert!(!outside.success);
    assert_eq!(outside.error_code(), Some(ErrorCode::PermissionDenied));

    let blocked = router
        .invoke("laptop-1", "execute_command", json!({"command": "ls && sudo reboot"}), None)
        .await
        .unwrap();
    assert_eq!(blocked.error_code(), Some(ErrorCode::DangerousCommandBlocked));

    let call = ToolCall::new("laptop-1", "execute_command", json!({"command": "echo far"}));
    let first = router.invoke_request(call.clone()).await.unwrap();
    assert_eq!(first.error_code(), Some(ErrorCode::ConfirmationRequired));

    let approved = router.invoke_approved(call).await.unwrap();
    assert!(approved.success, "unexpected failure: {:?}", approved.error);
    assert_eq!(approved.result.unwrap()["stdout"], "far\n");
}

#[tokio::test]
async fn test_not_connected_without_agent() {
    let registry = MemoryRegistry::new();
    let _relay = manager(&registry, "relay-a");
    let router = CommandRouter::new(Arc::new(registry));

    let result = router
        .invoke("laptop-1", "get_system_info", json!({}), None)
        .await;
    assert!(matches!(result, Err(RouterError::NotConnected { .. })));
}

#[tokio::test]
async fn test_cross_instance_takeover() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("where.txt"), "relay-b").unwrap();

    let registry = MemoryRegistry::new();
    let relay_a = manager(&registry, "relay-a");
    let relay_b = manager(&registry, "relay-b");

    let (old_conn, old_rx) = connect(&relay_a).await;
    let old_agent = spawn_agent(
        relay_a.clone(),
        old_conn.clone(),
        old_rx,
        dispatcher(PermissionMode::Balanced, dir.path().to_path_buf()),
    );

    let (new_conn, new_rx) = connect(&relay_b).await;
    spawn_agent(
        relay_b.clone(),
        new_conn,
        new_rx,
        dispatcher(PermissionMode::Balanced, dir.path().to_path_buf()),
    );

    let frames = tokio::time::timeout(Duration::from_secs(5), old_agent)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        frames.last(),
        Some(Outbound::Close { code: CLOSE_SUPERSEDED, .. })
    ));
    assert!(old_conn.is_closed());

    // The superseded relay must not erase its successor's entry
    assert_eq!(
        registry.lookup_owner("laptop-1").await.unwrap().as_deref(),
        Some("relay-b")
    );
    assert_eq!(relay_a.snapshot().await.connection_count, 0);
    assert_eq!(relay_b.snapshot().await.connection_count, 1);

    let router = CommandRouter::new(Arc::new(registry.clone()));
    let response = router
        .invoke("laptop-1", "read_file", json!({"path": "where.txt"}), None)
        .await
        .unwrap();
    assert_eq!(response.result.unwrap()["content"], "relay-b");
}

#[tokio::test]
async fn test_drain_waits_for_in_flight_response() {
    let registry = MemoryRegistry::new();
    let relay = manager(&registry, "relay-a");
    let (conn, mut rx) = connect(&relay).await;
    assert!(matches!(
        rx.recv().await,
        Some(Outbound::Message(RelayMessage::Connected { .. }))
    ));

    let router = CommandRouter::new(Arc::new(registry.clone()));
    let call = ToolCall::new("laptop-1", "get_system_info", json!({}))
        .with_timeout(Duration::from_secs(10));
    let request_id = call.request_id;
    let caller = tokio::spawn(async move { router.invoke_request(call).await });

    let Some(Outbound::Forward(_)) = rx.recv().await else {
        panic!("Expected the forwarded call");
    };
    assert_eq!(conn.pending_count(), 1);

    let draining = tokio::spawn({
        let relay = relay.clone();
        async move { relay.shutdown(Duration::from_secs(30)).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!draining.is_finished());
    assert!(!conn.is_closed());

    let response = farhand::proto::ToolResponse::success(
        request_id,
        json!({"hostname": "far"}),
        Duration::from_millis(1),
    );
    let frame = Encoded::Text(serde_json::to_string(&AgentMessage::ToolResponse(response)).unwrap());
    relay.handle_inbound(&conn, &frame).await;

    tokio::time::timeout(Duration::from_secs(5), draining)
        .await
        .unwrap()
        .unwrap();
    assert!(conn.is_closed());
    assert!(matches!(
        rx.recv().await,
        Some(Outbound::Close { code: CLOSE_GOING_AWAY, .. })
    ));

    let answered = caller.await.unwrap().unwrap();
    assert!(answered.success);
    assert!(registry.lookup_owner("laptop-1").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_drain_gives_up_after_grace() {
    let registry = MemoryRegistry::new();
    let relay = manager(&registry, "relay-a");
    let (conn, mut rx) = connect(&relay).await;
    rx.recv().await.unwrap();

    let call = ToolCall::new("laptop-1", "get_system_info", json!({}));
    let payload = serde_json::to_string(&CommandEnvelope::ToolCall(call)).unwrap();
    registry
        .publish(&commands_channel("laptop-1"), payload)
        .await
        .unwrap();
    assert!(matches!(rx.recv().await, Some(Outbound::Forward(_))));

    let started = tokio::time::Instant::now();
    relay.shutdown(Duration::from_secs(5)).await;

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(conn.is_closed());
    assert!(matches!(
        rx.recv().await,
        Some(Outbound::Close { code: CLOSE_GOING_AWAY, .. })
    ));
}
