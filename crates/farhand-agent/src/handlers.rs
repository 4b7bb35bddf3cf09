//! Built-in tools: filesystem access, command execution and system inspection

use crate::executor::{Target, Tool, ToolContext, ToolError};
use crate::permission::OperationKind;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, UNIX_EPOCH};
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default deadline for `execute_command`
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Largest file `read_file` returns in one response
const MAX_READ_BYTES: u64 = 8 * 1024 * 1024;

/// Output captured per stream before truncation
const MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// How long output is still collected after the shell has exited or been
/// killed
const OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// Interval between checks that a terminated process group is gone
const GROUP_POLL: Duration = Duration::from_millis(50);

/// Entries returned by a recursive listing before it stops
const MAX_LIST_ENTRIES: usize = 10_000;

/// Every tool the agent ships with
pub fn builtin_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ReadFileTool),
        Arc::new(WriteFileTool),
        Arc::new(ListDirectoryTool),
        Arc::new(GetFileInfoTool),
        Arc::new(CreateDirectoryTool),
        Arc::new(MoveFileTool),
        Arc::new(DeleteFileTool),
        Arc::new(ExecuteCommandTool),
        Arc::new(GetSystemInfoTool),
    ]
}

fn parse<T: DeserializeOwned>(params: &Value) -> Result<T, ToolError> {
    serde_json::from_value(params.clone()).map_err(|e| ToolError::InvalidParams(e.to_string()))
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> ToolError {
    ToolError::Execution(format!("{} {}: {}", action, path.display(), err))
}

fn modified_secs(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .unwrap_or(UNIX_EPOCH)
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Metadata as returned to callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileInfo {
    path: PathBuf,
    size: u64,
    is_dir: bool,
    is_symlink: bool,
    modified: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<u32>,
}

impl FileInfo {
    fn from_metadata(path: PathBuf, metadata: &std::fs::Metadata, is_symlink: bool) -> Self {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode() & 0o7777)
        };
        #[cfg(not(unix))]
        let mode = None;

        Self {
            path,
            size: metadata.len(),
            is_dir: metadata.is_dir(),
            is_symlink,
            modified: modified_secs(metadata),
            mode,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PathParams {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadFileParams {
    path: PathBuf,
    #[serde(default)]
    offset: Option<u64>,
    #[serde(default)]
    length: Option<u64>,
}

/// Reads a UTF-8 file, optionally a byte range of it
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read the contents of a text file"
    }

    fn targets(&self, params: &Value) -> Result<Vec<Target>, ToolError> {
        let params: ReadFileParams = parse(params)?;
        Ok(vec![Target::Path {
            kind: OperationKind::Read,
            path: params.path,
        }])
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: ReadFileParams = parse(&params)?;
        let path = ctx.resolve(&params.path);
        debug!("Reading file: {:?}", path);

        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| io_error("Failed to stat", &path, e))?;
        if metadata.is_dir() {
            return Err(ToolError::Execution(format!(
                "{} is a directory, not a file",
                path.display()
            )));
        }

        let size = metadata.len();
        let start = params.offset.unwrap_or(0).min(size);
        let end = match params.length {
            Some(length) => start.saturating_add(length).min(size),
            None => size,
        };
        if end - start > MAX_READ_BYTES {
            return Err(ToolError::Execution(format!(
                "{} bytes requested, limit is {}",
                end - start,
                MAX_READ_BYTES
            )));
        }

        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| io_error("Failed to open", &path, e))?;
        file.seek(SeekFrom::Start(start))
            .await
            .map_err(|e| io_error("Failed to seek in", &path, e))?;
        let mut buffer = Vec::with_capacity((end - start) as usize);
        file.take(end - start)
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| io_error("Failed to read", &path, e))?;

        let content = String::from_utf8(buffer).map_err(|_| {
            ToolError::Execution(format!("{} is not valid UTF-8 text", path.display()))
        })?;

        Ok(json!({
            "path": path,
            "content": content,
            "size": size,
            "offset": start,
            "bytesRead": end - start,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteFileParams {
    path: PathBuf,
    content: String,
    #[serde(default = "default_true")]
    create_dirs: bool,
    #[serde(default)]
    append: bool,
    #[serde(default)]
    mode: Option<u32>,
}

fn default_true() -> bool {
    true
}

/// Creates or overwrites a file
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write text to a file, creating it if needed"
    }

    fn targets(&self, params: &Value) -> Result<Vec<Target>, ToolError> {
        let params: WriteFileParams = parse(params)?;
        Ok(vec![Target::Path {
            kind: OperationKind::Write,
            path: params.path,
        }])
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: WriteFileParams = parse(&params)?;
        let path = ctx.resolve(&params.path);
        debug!("Writing file: {:?}", path);

        if params.create_dirs {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error("Failed to create parent of", &path, e))?;
            }
        }

        if params.append {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| io_error("Failed to open", &path, e))?;
            file.write_all(params.content.as_bytes())
                .await
                .map_err(|e| io_error("Failed to append to", &path, e))?;
            file.flush()
                .await
                .map_err(|e| io_error("Failed to flush", &path, e))?;
        } else {
            fs::write(&path, params.content.as_bytes())
                .await
                .map_err(|e| io_error("Failed to write", &path, e))?;
        }

        #[cfg(unix)]
        if let Some(mode) = params.mode {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|e| io_error("Failed to set permissions on", &path, e))?;
        }

        Ok(json!({
            "path": path,
            "bytesWritten": params.content.len(),
            "appended": params.append,
        }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDirectoryParams {
    path: PathBuf,
    #[serde(default)]
    include_hidden: bool,
    #[serde(default)]
    recursive: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DirEntry {
    name: String,
    #[serde(flatten)]
    info: FileInfo,
}

/// Enumerates a directory
pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn description(&self) -> &'static str {
        "List the entries of a directory"
    }

    fn targets(&self, params: &Value) -> Result<Vec<Target>, ToolError> {
        let params: ListDirectoryParams = parse(params)?;
        Ok(vec![Target::Path {
            kind: OperationKind::List,
            path: params.path,
        }])
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: ListDirectoryParams = parse(&params)?;
        let path = ctx.resolve(&params.path);
        debug!("Listing directory: {:?}", path);

        let mut entries = Vec::new();
        collect_entries(&path, params.include_hidden, &mut entries).await?;

        if params.recursive {
            // Breadth-first; unreadable subdirectories are skipped
            let mut cursor = 0;
            while cursor < entries.len() && entries.len() < MAX_LIST_ENTRIES {
                let entry = &entries[cursor];
                cursor += 1;
                if !entry.info.is_dir || entry.info.is_symlink {
                    continue;
                }
                let subdir = entry.info.path.clone();
                if let Err(e) = collect_entries(&subdir, params.include_hidden, &mut entries).await
                {
                    warn!("Failed to read subdirectory {:?}: {}", subdir, e);
                }
            }
        }

        let truncated = entries.len() > MAX_LIST_ENTRIES;
        entries.truncate(MAX_LIST_ENTRIES);

        Ok(json!({
            "path": path,
            "entries": entries,
            "truncated": truncated,
        }))
    }
}

async fn collect_entries(
    path: &Path,
    include_hidden: bool,
    entries: &mut Vec<DirEntry>,
) -> Result<(), ToolError> {
    let mut dir = fs::read_dir(path)
        .await
        .map_err(|e| io_error("Failed to read directory", path, e))?;

    let mut batch = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| io_error("Failed to read entry in", path, e))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if !include_hidden && name.starts_with('.') {
            continue;
        }

        let entry_path = entry.path();
        let is_symlink = entry
            .file_type()
            .await
            .map(|t| t.is_symlink())
            .unwrap_or(false);
        let metadata = match fs::metadata(&entry_path).await {
            Ok(metadata) => metadata,
            Err(_) => match entry.metadata().await {
                // Dangling symlink
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!("Failed to stat {:?}: {}", entry_path, e);
                    continue;
                }
            },
        };

        batch.push(DirEntry {
            name,
            info: FileInfo::from_metadata(entry_path, &metadata, is_symlink),
        });
    }

    batch.sort_by(|a, b| a.name.cmp(&b.name));
    entries.extend(batch);
    Ok(())
}

/// Reports metadata for a path
pub struct GetFileInfoTool;

#[async_trait]
impl Tool for GetFileInfoTool {
    fn name(&self) -> &'static str {
        "get_file_info"
    }

    fn description(&self) -> &'static str {
        "Get size, type and timestamps of a file or directory"
    }

    fn targets(&self, params: &Value) -> Result<Vec<Target>, ToolError> {
        let params: PathParams = parse(params)?;
        Ok(vec![Target::Path {
            kind: OperationKind::Read,
            path: params.path,
        }])
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: PathParams = parse(&params)?;
        let path = ctx.resolve(&params.path);

        let link = fs::symlink_metadata(&path)
            .await
            .map_err(|e| io_error("Failed to stat", &path, e))?;
        let metadata = fs::metadata(&path).await.unwrap_or_else(|_| link.clone());
        let info = FileInfo::from_metadata(path, &metadata, link.file_type().is_symlink());

        serde_json::to_value(info).map_err(|e| ToolError::Execution(e.to_string()))
    }
}

/// Creates a directory and any missing parents
pub struct CreateDirectoryTool;

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &'static str {
        "create_directory"
    }

    fn description(&self) -> &'static str {
        "Create a directory, including missing parents"
    }

    fn targets(&self, params: &Value) -> Result<Vec<Target>, ToolError> {
        let params: PathParams = parse(params)?;
        Ok(vec![Target::Path {
            kind: OperationKind::Write,
            path: params.path,
        }])
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: PathParams = parse(&params)?;
        let path = ctx.resolve(&params.path);
        let existed = fs::metadata(&path).await.map(|m| m.is_dir()).unwrap_or(false);

        fs::create_dir_all(&path)
            .await
            .map_err(|e| io_error("Failed to create", &path, e))?;

        Ok(json!({ "path": path, "created": !existed }))
    }
}

#[derive(Debug, Deserialize)]
struct MoveFileParams {
    source: PathBuf,
    destination: PathBuf,
}

/// Renames a file or directory
pub struct MoveFileTool;

#[async_trait]
impl Tool for MoveFileTool {
    fn name(&self) -> &'static str {
        "move_file"
    }

    fn description(&self) -> &'static str {
        "Move or rename a file or directory"
    }

    fn targets(&self, params: &Value) -> Result<Vec<Target>, ToolError> {
        let params: MoveFileParams = parse(params)?;
        Ok(vec![
            Target::Path {
                kind: OperationKind::Write,
                path: params.source,
            },
            Target::Path {
                kind: OperationKind::Write,
                path: params.destination,
            },
        ])
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: MoveFileParams = parse(&params)?;
        let source = ctx.resolve(&params.source);
        let destination = ctx.resolve(&params.destination);

        if fs::symlink_metadata(&destination).await.is_ok() {
            return Err(ToolError::Execution(format!(
                "{} already exists",
                destination.display()
            )));
        }

        fs::rename(&source, &destination)
            .await
            .map_err(|e| io_error("Failed to move", &source, e))?;

        Ok(json!({ "source": source, "destination": destination }))
    }
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    path: PathBuf,
    #[serde(default)]
    recursive: bool,
}

/// Removes a file or directory
pub struct DeleteFileTool;

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &'static str {
        "delete_file"
    }

    fn description(&self) -> &'static str {
        "Delete a file, or a directory with recursive set"
    }

    fn targets(&self, params: &Value) -> Result<Vec<Target>, ToolError> {
        let params: DeleteParams = parse(params)?;
        Ok(vec![Target::Path {
            kind: OperationKind::Delete,
            path: params.path,
        }])
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: DeleteParams = parse(&params)?;
        let path = ctx.resolve(&params.path);

        let metadata = fs::symlink_metadata(&path)
            .await
            .map_err(|e| io_error("Failed to stat", &path, e))?;

        let result = if metadata.is_dir() {
            if params.recursive {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_dir(&path).await
            }
        } else {
            fs::remove_file(&path).await
        };
        result.map_err(|e| io_error("Failed to delete", &path, e))?;

        Ok(json!({ "path": path, "deleted": true }))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteCommandParams {
    command: String,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Runs a command line through the platform shell
pub struct ExecuteCommandTool;

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &'static str {
        "execute_command"
    }

    fn description(&self) -> &'static str {
        "Run a shell command and capture its output"
    }

    fn default_timeout(&self) -> Duration {
        DEFAULT_COMMAND_TIMEOUT
    }

    fn targets(&self, params: &Value) -> Result<Vec<Target>, ToolError> {
        let params: ExecuteCommandParams = parse(params)?;
        if params.command.trim().is_empty() {
            return Err(ToolError::InvalidParams("Empty command".to_string()));
        }
        Ok(vec![Target::Command {
            command: params.command,
            cwd: params.cwd,
        }])
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: ExecuteCommandParams = parse(&params)?;
        debug!("Executing command: {}", params.command);

        let start = Instant::now();
        let mut cmd = shell_command(&params.command);
        cmd.envs(&params.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match &params.cwd {
            Some(cwd) => {
                cmd.current_dir(ctx.resolve(cwd));
            }
            None => {
                if let Some(base) = ctx.engine().allowed_dirs().first() {
                    cmd.current_dir(base);
                }
            }
        }

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| ToolError::Spawn(e.to_string()))?;
        let group = ProcessGroup::new(child.id());
        let stdout = Captured::default();
        let stderr = Captured::default();
        let mut readers = tokio::spawn({
            let (out, err) = (child.stdout.take(), child.stderr.take());
            let (stdout, stderr) = (stdout.clone(), stderr.clone());
            async move {
                tokio::join!(read_capped(out, stdout), read_capped(err, stderr));
            }
        });

        let deadline = tokio::time::Instant::now() + ctx.timeout;
        let status = match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => Some(status.map_err(|e| ToolError::Execution(e.to_string()))?),
            Err(_) => {
                warn!(
                    "Command exceeded {:?}, terminating: {}",
                    ctx.timeout, params.command
                );
                terminate(&mut child, &group, ctx.kill_grace).await;
                None
            }
        };

        // Background jobs may still hold the pipes open after the shell exits
        if !drain(&mut readers, OUTPUT_DRAIN).await {
            debug!("Output still open after exit: {}", params.command);
        }
        group.terminate(ctx.kill_grace).await;
        drain(&mut readers, OUTPUT_DRAIN).await;
        readers.abort();
        group.disarm();

        let (stdout, stdout_truncated) = stdout.take();
        let (stderr, stderr_truncated) = stderr.take();

        let Some(status) = status else {
            return Err(ToolError::Timeout {
                timeout: ctx.timeout,
                stdout: Some(stdout),
                stderr: Some(stderr),
            });
        };

        Ok(json!({
            "exitCode": status.code(),
            "success": status.success(),
            "stdout": stdout,
            "stderr": stderr,
            "truncated": stdout_truncated || stderr_truncated,
            "durationMs": start.elapsed().as_millis() as u64,
        }))
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Output of one stream, readable while the reader is still running
#[derive(Debug, Clone, Default)]
struct Captured(Arc<Mutex<CapturedBytes>>);

#[derive(Debug, Default)]
struct CapturedBytes {
    bytes: Vec<u8>,
    truncated: bool,
}

impl Captured {
    fn lock(&self) -> MutexGuard<'_, CapturedBytes> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, chunk: &[u8]) {
        let mut captured = self.lock();
        let room = MAX_OUTPUT_BYTES.saturating_sub(captured.bytes.len());
        if chunk.len() > room {
            captured.truncated = true;
        }
        captured.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn take(&self) -> (String, bool) {
        let mut captured = self.lock();
        let bytes = std::mem::take(&mut captured.bytes);
        (String::from_utf8_lossy(&bytes).into_owned(), captured.truncated)
    }
}

async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, captured: Captured) {
    let Some(mut reader) = reader else {
        return;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => captured.push(&chunk[..n]),
        }
    }
}

/// Wait up to `window` for both readers to hit end of file
async fn drain(readers: &mut JoinHandle<()>, window: Duration) -> bool {
    readers.is_finished() || tokio::time::timeout(window, readers).await.is_ok()
}

/// Process group of a spawned command. Dropping it before [`disarm`] kills
/// the whole group, which covers the executor abandoning the call.
///
/// [`disarm`]: ProcessGroup::disarm
#[derive(Debug)]
struct ProcessGroup {
    pid: Option<u32>,
    armed: AtomicBool,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            armed: AtomicBool::new(true),
        }
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    /// Send `signal`; `false` once no member of the group is left
    #[cfg(unix)]
    fn signal(&self, signal: Option<nix::sys::signal::Signal>) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let Some(pid) = self.pid else {
            return false;
        };
        match killpg(Pid::from_raw(pid as i32), signal) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                debug!("Signal {:?} to group {} failed: {}", signal, pid, e);
                false
            }
        }
    }

    /// SIGTERM whatever is left of the group, then SIGKILL it once `grace`
    /// has passed
    #[cfg(unix)]
    async fn terminate(&self, grace: Duration) {
        use nix::sys::signal::Signal;

        if !self.signal(Some(Signal::SIGTERM)) {
            return;
        }
        debug!("Terminating leftover processes of group {:?}", self.pid);
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(GROUP_POLL).await;
            if !self.signal(None) {
                return;
            }
        }
        self.signal(Some(Signal::SIGKILL));
    }

    #[cfg(not(unix))]
    async fn terminate(&self, _grace: Duration) {}
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        #[cfg(unix)]
        if self.armed.load(Ordering::SeqCst) {
            self.signal(Some(nix::sys::signal::Signal::SIGKILL));
        }
    }
}

/// SIGTERM the process group, give the shell `grace` to exit, then SIGKILL
/// the group. The shell is reaped before returning.
#[cfg(unix)]
async fn terminate(child: &mut Child, group: &ProcessGroup, grace: Duration) {
    use nix::sys::signal::Signal;

    group.signal(Some(Signal::SIGTERM));
    let _ = tokio::time::timeout(grace, child.wait()).await;
    group.signal(Some(Signal::SIGKILL));
    let _ = child.kill().await;
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child, _group: &ProcessGroup, _grace: Duration) {
    let _ = child.kill().await;
}

/// Reports host facts and the agent's permission configuration
pub struct GetSystemInfoTool;

#[async_trait]
impl Tool for GetSystemInfoTool {
    fn name(&self) -> &'static str {
        "get_system_info"
    }

    fn description(&self) -> &'static str {
        "Describe the host operating system and agent configuration"
    }

    fn targets(&self, _params: &Value) -> Result<Vec<Target>, ToolError> {
        Ok(vec![Target::System])
    }

    async fn run(&self, _params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Ok(json!({
            "hostname": hostname().await,
            "os": std::env::consts::OS,
            "family": std::env::consts::FAMILY,
            "arch": std::env::consts::ARCH,
            "cpus": cpus,
            "pid": std::process::id(),
            "user": std::env::var("USER").or_else(|_| std::env::var("USERNAME")).ok(),
            "homeDir": std::env::var_os("HOME").map(PathBuf::from),
            "permissionMode": ctx.engine().mode().to_string(),
            "allowedDirectories": ctx.engine().allowed_dirs(),
            "agentVersion": env!("CARGO_PKG_VERSION"),
        }))
    }
}

async fn hostname() -> Option<String> {
    if let Ok(name) = std::env::var("HOSTNAME").or_else(|_| std::env::var("COMPUTERNAME")) {
        return Some(name);
    }
    fs::read_to_string("/etc/hostname")
        .await
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
