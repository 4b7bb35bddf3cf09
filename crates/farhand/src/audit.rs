//! Audit trail of completed tool calls

use crate::error::RelayError;
use async_trait::async_trait;
use farhand_proto::{ErrorDetails, ToolResponse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// One completed tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Agent that ran the call
    pub identity: String,
    /// Correlation id
    pub request_id: Uuid,
    /// Tool name, when the relay saw the call go out
    pub tool: Option<String>,
    /// Parameters, when the relay saw the call go out
    pub params: Option<Value>,
    /// Tool output
    pub result: Option<Value>,
    /// Whether the tool succeeded
    pub success: bool,
    /// Failure details
    pub error: Option<ErrorDetails>,
    /// Execution time reported by the agent, in milliseconds
    pub duration_ms: u64,
    /// Epoch milliseconds at which the relay saw the response
    pub timestamp: u64,
}

impl AuditRecord {
    /// Build a record from a response and the call it answers
    pub fn from_response(
        identity: impl Into<String>,
        tool: Option<String>,
        params: Option<Value>,
        response: &ToolResponse,
    ) -> Self {
        Self {
            identity: identity.into(),
            request_id: response.request_id,
            tool,
            params,
            result: response.result.clone(),
            success: response.success,
            error: response.error.clone(),
            duration_ms: response.execution_time,
            timestamp: farhand_proto::message::now_millis(),
        }
    }
}

/// Sink for audit records. Appends are best-effort from the relay's view.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one record
    async fn append(&self, record: AuditRecord) -> Result<(), RelayError>;
}

/// Emits each record as a tracing event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), RelayError> {
        info!(
            target: "farhand::audit",
            identity = %record.identity,
            request_id = %record.request_id,
            tool = record.tool.as_deref().unwrap_or("-"),
            success = record.success,
            duration_ms = record.duration_ms,
            "Tool call completed"
        );
        Ok(())
    }
}

/// Append-only JSON Lines file
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditLog {
    /// Open `path` for appending, creating it if needed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// File being written
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditLog for JsonlAuditLog {
    async fn append(&self, record: AuditRecord) -> Result<(), RelayError> {
        let mut line =
            serde_json::to_vec(&record).map_err(|e| RelayError::Audit(e.to_string()))?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
