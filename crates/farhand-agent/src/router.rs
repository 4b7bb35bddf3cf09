//! Permission-gated dispatch of tool calls

use crate::executor::{Target, ToolError, ToolExecutor};
use crate::permission::PermissionEngine;
use farhand_proto::{
    Classification, ErrorCode, ErrorDetails, PermissionDecision, ToolCall, ToolResponse,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of evaluating every target of a call
#[derive(Debug, Clone, PartialEq, Eq)]
enum Verdict {
    /// A command matched a denylist pattern
    Dangerous(PermissionDecision),
    /// Some target was refused
    Denied(PermissionDecision),
    /// Every target is allowed; the decision is the riskiest one seen
    Allowed(PermissionDecision),
}

/// Turns a [`ToolCall`] into exactly one [`ToolResponse`]
pub struct ToolDispatcher {
    engine: Arc<PermissionEngine>,
    executor: Arc<ToolExecutor>,
}

impl ToolDispatcher {
    /// Create a dispatcher
    pub fn new(engine: Arc<PermissionEngine>, executor: Arc<ToolExecutor>) -> Self {
        Self { engine, executor }
    }

    /// Tool executor in use
    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    /// Permission engine in use
    pub fn engine(&self) -> &PermissionEngine {
        &self.engine
    }

    /// Run the permission check, then the tool. Never panics and never
    /// returns without a response.
    pub async fn dispatch(&self, call: ToolCall) -> ToolResponse {
        let start = Instant::now();
        let request_id = call.request_id;

        match self.evaluate_and_run(call).await {
            Ok(result) => ToolResponse::success(request_id, result, start.elapsed()),
            Err(details) => ToolResponse::failure(request_id, details, start.elapsed()),
        }
    }

    async fn evaluate_and_run(&self, call: ToolCall) -> Result<serde_json::Value, ErrorDetails> {
        let tool = self
            .executor
            .get(&call.tool)
            .ok_or_else(|| ToolError::UnknownTool(call.tool.clone()))?;
        let targets = tool.targets(&call.params)?;

        match self.evaluate(&targets) {
            Verdict::Dangerous(decision) => {
                warn!(
                    "Blocked dangerous command for {}: {}",
                    call.request_id, decision.reason
                );
                return Err(ErrorDetails::new(
                    ErrorCode::DangerousCommandBlocked,
                    decision.reason.clone(),
                )
                .with_decision(decision));
            }
            Verdict::Denied(decision) => {
                info!(
                    "Denied {} ({}): {}",
                    call.tool, call.request_id, decision.reason
                );
                return Err(
                    ErrorDetails::new(ErrorCode::PermissionDenied, decision.reason.clone())
                        .with_decision(decision),
                );
            }
            Verdict::Allowed(decision) if decision.requires_confirmation && !call.approved => {
                info!(
                    "Confirmation required for {} ({}): {}",
                    call.tool, call.request_id, decision.reason
                );
                return Err(ErrorDetails::new(
                    ErrorCode::ConfirmationRequired,
                    format!("{} requires confirmation: {}", call.tool, decision.reason),
                )
                .with_decision(decision));
            }
            Verdict::Allowed(decision) => {
                debug!(
                    "Running {} ({}), classification {:?}",
                    call.tool, call.request_id, decision.classification
                );
            }
        }

        let timeout = call.timeout();
        Ok(self.executor.execute(&call.tool, call.params, timeout).await?)
    }

    fn evaluate(&self, targets: &[Target]) -> Verdict {
        let mut riskiest = PermissionDecision::allow(Classification::Safe, "no targets");
        let mut needs_confirmation = false;

        for target in targets {
            let decision = match target {
                Target::Path { kind, path } => self.engine.check_path(*kind, path),
                Target::Command { command, cwd } => {
                    if let Some(pattern) = self.engine.dangerous_pattern(command) {
                        return Verdict::Dangerous(PermissionDecision::block(
                            Classification::Destructive,
                            format!("command matches blocked pattern '{}'", pattern),
                        ));
                    }
                    self.engine.check_command(command, cwd.as_deref())
                }
                Target::System => {
                    PermissionDecision::allow(Classification::Safe, "system inspection")
                }
            };

            if !decision.allowed {
                return Verdict::Denied(decision);
            }
            needs_confirmation |= decision.requires_confirmation;
            if decision.classification >= riskiest.classification {
                riskiest = decision;
            }
        }

        riskiest.requires_confirmation = needs_confirmation;
        Verdict::Allowed(riskiest)
    }
}
