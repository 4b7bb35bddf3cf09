//! Unit tests for the command router

use super::*;
use crate::registry::{MemoryRegistry, Subscription};
use farhand_proto::{ErrorCode, ErrorDetails};
use serde_json::json;

const TTL: Duration = Duration::from_secs(120);

async fn connected_registry(identity: &str) -> (MemoryRegistry, Subscription) {
    let registry = MemoryRegistry::new();
    registry.register(identity, "relay-a", TTL).await.unwrap();
    let commands = registry.subscribe(&commands_channel(identity)).await.unwrap();
    (registry, commands)
}

/// Answers every call on the command channel, after some noise on the
/// response channel
fn spawn_fake_agent(registry: MemoryRegistry, mut commands: Subscription) {
    tokio::spawn(async move {
        while let Some(payload) = commands.next().await {
            let Ok(CommandEnvelope::ToolCall(call)) = serde_json::from_str::<CommandEnvelope>(&payload) else {
                continue;
            };
            let channel = response_channel(&call.request_id);

            let stray = ToolResponse::success(Uuid::new_v4(), json!("stray"), Duration::ZERO);
            registry
                .publish(&channel, serde_json::to_string(&stray).unwrap())
                .await
                .unwrap();
            registry.publish(&channel, "not json".to_string()).await.unwrap();

            let response = if call.tool == "needs_approval" && !call.approved {
                ToolResponse::failure(
                    call.request_id,
                    ErrorDetails::new(ErrorCode::ConfirmationRequired, "approve first"),
                    Duration::from_millis(1),
                )
            } else {
                ToolResponse::success(
                    call.request_id,
                    json!({"tool": call.tool, "params": call.params, "approved": call.approved}),
                    Duration::from_millis(2),
                )
            };
            registry
                .publish(&channel, serde_json::to_string(&response).unwrap())
                .await
                .unwrap();
        }
    });
}

#[tokio::test]
async fn test_not_connected_fails_fast() {
    let registry = MemoryRegistry::new();
    let router = CommandRouter::new(Arc::new(registry.clone()));

    let result = router
        .invoke("laptop-1", "read_file", json!({"path": "a"}), None)
        .await;

    assert!(matches!(
        result,
        Err(RouterError::NotConnected { ref identity }) if identity == "laptop-1"
    ));
    assert_eq!(registry.total_subscribers(), 0);
}

#[tokio::test]
async fn test_stale_registration_without_relay() {
    let registry = MemoryRegistry::new();
    registry.register("laptop-1", "relay-gone", TTL).await.unwrap();
    let router = CommandRouter::new(Arc::new(registry.clone()));

    let result = router
        .invoke("laptop-1", "read_file", json!({}), None)
        .await;

    assert!(matches!(result, Err(RouterError::NotConnected { .. })));
    assert_eq!(registry.total_subscribers(), 0);
}

#[tokio::test]
async fn test_invalid_requests() {
    let router = CommandRouter::new(Arc::new(MemoryRegistry::new()));

    let mut call = ToolCall::new("laptop-1", "read_file", json!({}));
    call.identity = None;
    assert!(matches!(
        router.invoke_request(call).await,
        Err(RouterError::InvalidRequest(_))
    ));

    let call = ToolCall::new("laptop-1", "", json!({}));
    assert!(matches!(
        router.invoke_request(call).await,
        Err(RouterError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn test_round_trip_skips_noise() {
    let (registry, commands) = connected_registry("laptop-1").await;
    spawn_fake_agent(registry.clone(), commands);
    let router = CommandRouter::new(Arc::new(registry.clone()));

    let response = router
        .invoke(
            "laptop-1",
            "list_directory",
            json!({"path": "."}),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();

    assert!(response.success);
    let result = response.result.unwrap();
    assert_eq!(result["tool"], "list_directory");
    assert_eq!(result["params"]["path"], ".");
    // Only the fake agent's command subscription is left
    assert_eq!(registry.total_subscribers(), 1);
}

#[tokio::test]
async fn test_approved_reissue() {
    let (registry, commands) = connected_registry("laptop-1").await;
    spawn_fake_agent(registry.clone(), commands);
    let router = CommandRouter::new(Arc::new(registry));

    let call = ToolCall::new("laptop-1", "needs_approval", json!({}));
    let first = router.invoke_request(call.clone()).await.unwrap();
    assert_eq!(first.error_code(), Some(ErrorCode::ConfirmationRequired));
    assert_eq!(first.request_id, call.request_id);

    let second = router.invoke_approved(call.clone()).await.unwrap();
    assert!(second.success);
    assert_ne!(second.request_id, call.request_id);
    assert_eq!(second.result.unwrap()["approved"], true);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_releases_subscription() {
    let (registry, _silent_agent) = connected_registry("laptop-1").await;
    let router = CommandRouter::new(Arc::new(registry.clone())).with_config(RouterConfig {
        default_timeout: Duration::from_secs(3),
    });

    let result = router.invoke("laptop-1", "read_file", json!({}), None).await;

    match result {
        Err(RouterError::Timeout { timeout, .. }) => {
            assert_eq!(timeout, Duration::from_secs(3))
        }
        other => panic!("Expected timeout, got {:?}", other),
    }
    assert_eq!(registry.total_subscribers(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_call_timeout_overrides_default() {
    let (registry, _silent_agent) = connected_registry("laptop-1").await;
    let router = CommandRouter::new(Arc::new(registry));

    let result = router
        .invoke("laptop-1", "read_file", json!({}), Some(Duration::from_millis(500)))
        .await;

    assert!(matches!(
        result,
        Err(RouterError::Timeout { timeout, .. }) if timeout == Duration::from_millis(500)
    ));
}
