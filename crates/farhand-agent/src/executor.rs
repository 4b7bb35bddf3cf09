//! Tool registration table and timed execution

use crate::permission::{OperationKind, PermissionEngine};
use async_trait::async_trait;
use farhand_proto::{ErrorCode, ErrorDetails};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default timeout for tools that do not declare their own
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Slack added on top of a tool's own deadline so it can clean up (terminate
/// child processes, collect partial output) before the executor gives up.
const CLEANUP_SLACK: Duration = Duration::from_secs(7);

/// Failures a tool invocation can produce
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool registered under that name
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Parameters do not match what the tool expects
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Tool ran but failed
    #[error("{0}")]
    Execution(String),

    /// Process could not be started
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    /// Tool exceeded its deadline
    #[error("Timed out after {timeout:?}")]
    Timeout {
        /// Deadline that was exceeded
        timeout: Duration,
        /// Partial standard output, for commands
        stdout: Option<String>,
        /// Partial standard error, for commands
        stderr: Option<String>,
    },
}

impl ToolError {
    /// Plain timeout without captured output
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout,
            stdout: None,
            stderr: None,
        }
    }
}

impl From<ToolError> for ErrorDetails {
    fn from(error: ToolError) -> Self {
        let message = error.to_string();
        match error {
            ToolError::UnknownTool(name) => {
                ErrorDetails::new(ErrorCode::UnknownTool, message).with_context("tool", name)
            }
            ToolError::InvalidParams(_) => ErrorDetails::new(ErrorCode::InvalidParams, message),
            ToolError::Execution(_) | ToolError::Spawn(_) => {
                ErrorDetails::new(ErrorCode::ExecutionFailure, message)
            }
            ToolError::Timeout {
                timeout,
                stdout,
                stderr,
            } => {
                let mut details = ErrorDetails::new(ErrorCode::Timeout, message)
                    .with_context("timeoutMs", timeout.as_millis().to_string());
                if let Some(stdout) = stdout {
                    details = details.with_context("stdout", stdout);
                }
                if let Some(stderr) = stderr {
                    details = details.with_context("stderr", stderr);
                }
                details
            }
        }
    }
}

/// Something an invocation touches, as seen by the permission engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Filesystem operation on a path
    Path {
        /// Kind of operation
        kind: OperationKind,
        /// Target as given by the caller
        path: PathBuf,
    },
    /// Process execution
    Command {
        /// Command line, run through the platform shell
        command: String,
        /// Working directory
        cwd: Option<PathBuf>,
    },
    /// Read-only inspection of machine state with no path target
    System,
}

/// State shared with every tool invocation
#[derive(Debug, Clone)]
pub struct ToolContext {
    engine: Arc<PermissionEngine>,
    /// Deadline for this invocation
    pub timeout: Duration,
    /// Grace period between SIGTERM and SIGKILL
    pub kill_grace: Duration,
}

impl ToolContext {
    /// Create a context around a permission engine
    pub fn new(engine: Arc<PermissionEngine>) -> Self {
        Self {
            engine,
            timeout: DEFAULT_TOOL_TIMEOUT,
            kill_grace: Duration::from_secs(5),
        }
    }

    /// Resolve a caller-supplied path the same way the permission check did
    pub fn resolve(&self, path: &std::path::Path) -> PathBuf {
        self.engine.resolve(path)
    }

    /// Permission engine in force
    pub fn engine(&self) -> &PermissionEngine {
        &self.engine
    }
}

/// A named capability the agent can run on behalf of the relay
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registered name
    fn name(&self) -> &'static str;

    /// One-line description for tool listings
    fn description(&self) -> &'static str;

    /// Deadline used when the call carries none
    fn default_timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    /// What an invocation with these parameters touches
    fn targets(&self, params: &Value) -> Result<Vec<Target>, ToolError>;

    /// Run the tool. Only called after the permission check passed.
    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Entry in the tool listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolInfo {
    /// Registered name
    pub name: String,
    /// One-line description
    pub description: String,
}

/// Dispatches named tools with per-call timeouts
pub struct ToolExecutor {
    /// Registered tools by name
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Template context for invocations
    context: ToolContext,
}

impl ToolExecutor {
    /// Create an executor with no tools registered
    pub fn new(context: ToolContext) -> Self {
        Self {
            tools: HashMap::new(),
            context,
        }
    }

    /// Create an executor with every built-in tool registered
    pub fn with_builtin_tools(context: ToolContext) -> Self {
        let mut executor = Self::new(context);
        for tool in crate::handlers::builtin_tools() {
            executor.register(tool);
        }
        executor
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        debug!("Registered tool: {}", tool.name());
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Registered tools, sorted by name
    pub fn available_tools(&self) -> Vec<ToolInfo> {
        let mut tools: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|tool| ToolInfo {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Run `name` with `params` under `timeout` (or the tool's default).
    ///
    /// This does not consult the permission engine; callers go through
    /// [`crate::router::ToolDispatcher`].
    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;

        let mut ctx = self.context.clone();
        ctx.timeout = timeout.unwrap_or_else(|| tool.default_timeout());
        let limit = ctx.timeout + CLEANUP_SLACK;

        match tokio::time::timeout(limit, tool.run(params, &ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Tool {} exceeded {:?}", name, ctx.timeout);
                Err(ToolError::timeout(ctx.timeout))
            }
        }
    }
}
