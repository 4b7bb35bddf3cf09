//! Caller-side tool invocation through the coordination store

use crate::config::RouterConfig;
use crate::error::{RegistryError, RouterError};
use crate::registry::ConnectionRegistry;
use farhand_proto::keys::{commands_channel, response_channel};
use farhand_proto::{CommandEnvelope, ToolCall, ToolResponse};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

#[cfg(test)]
mod tests;

/// Sends tool calls to agents connected to any relay instance and waits for
/// the matching response.
///
/// The router never retries. A timeout only ends the caller's wait; the agent
/// may still run the call.
#[derive(Clone)]
pub struct CommandRouter {
    registry: Arc<dyn ConnectionRegistry>,
    config: RouterConfig,
}

impl CommandRouter {
    /// Create a router with default settings
    pub fn new(registry: Arc<dyn ConnectionRegistry>) -> Self {
        Self {
            registry,
            config: RouterConfig::default(),
        }
    }

    /// Replace the settings
    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Invoke `tool` on `identity`
    pub async fn invoke(
        &self,
        identity: &str,
        tool: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolResponse, RouterError> {
        let mut call = ToolCall::new(identity, tool, params);
        if let Some(timeout) = timeout {
            call = call.with_timeout(timeout);
        }
        self.invoke_request(call).await
    }

    /// Re-issue a call that came back `confirmation_required`, marked as
    /// approved. The reissued call gets a fresh request id.
    pub async fn invoke_approved(&self, call: ToolCall) -> Result<ToolResponse, RouterError> {
        let call = ToolCall {
            request_id: Uuid::new_v4(),
            ..call
        }
        .approved();
        self.invoke_request(call).await
    }

    /// Invoke a fully specified call
    pub async fn invoke_request(&self, call: ToolCall) -> Result<ToolResponse, RouterError> {
        let identity = call
            .identity
            .clone()
            .filter(|identity| !identity.is_empty())
            .ok_or_else(|| RouterError::InvalidRequest("tool call has no identity".to_string()))?;
        if call.tool.is_empty() {
            return Err(RouterError::InvalidRequest("tool name is empty".to_string()));
        }

        if self.registry.lookup_owner(&identity).await?.is_none() {
            return Err(RouterError::NotConnected { identity });
        }

        let request_id = call.request_id;
        let wait = call.timeout().unwrap_or(self.config.default_timeout);
        let payload = serde_json::to_string(&CommandEnvelope::ToolCall(call))?;

        let mut subscription = self.registry.subscribe(&response_channel(&request_id)).await?;
        let receivers = self
            .registry
            .publish(&commands_channel(&identity), payload)
            .await?;
        if receivers == 0 {
            // Registry entry outlived the relay holding the socket
            return Err(RouterError::NotConnected { identity });
        }
        debug!("Published {} to {} ({} receivers)", request_id, identity, receivers);

        let outcome = timeout(wait, async {
            while let Some(payload) = subscription.next().await {
                match serde_json::from_str::<ToolResponse>(&payload) {
                    Ok(response) if response.request_id == request_id => return Some(response),
                    Ok(response) => warn!(
                        "Ignoring response {} on channel for {}",
                        response.request_id, request_id
                    ),
                    Err(e) => warn!("Ignoring malformed response for {}: {}", request_id, e),
                }
            }
            None
        })
        .await;
        subscription.unsubscribe();

        match outcome {
            Ok(Some(response)) => Ok(response),
            Ok(None) => {
                Err(RegistryError::SubscriptionClosed(response_channel(&request_id)).into())
            }
            Err(_) => Err(RouterError::Timeout {
                request_id,
                timeout: wait,
            }),
        }
    }
}
