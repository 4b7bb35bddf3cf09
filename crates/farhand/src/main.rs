//! Farhand Relay Binary
//!
//! Serves agent WebSocket connections, or invokes a single tool call from the
//! command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use farhand::{
    AuditLog, CommandRouter, ConnectionManager, ConnectionRegistry, JsonlAuditLog,
    MemoryRegistry, RelayConfig, StaticCredentials, TracingAuditLog,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "farhand-relay", version, about = "Farhand relay and tool-call client")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Address to listen on
    #[arg(long, env = "FARHAND_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Redis URL of the shared registry. Without it the relay keeps state in
    /// memory and cannot be scaled out.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// TOML file listing agent identities and secrets
    #[arg(long, env = "FARHAND_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Append audit records to this JSON Lines file
    #[arg(long, env = "FARHAND_AUDIT_LOG")]
    audit_log: Option<PathBuf>,

    /// Instance id to register as owner (random by default)
    #[arg(long, env = "FARHAND_INSTANCE_ID")]
    instance_id: Option<String>,

    /// Seconds to wait for in-flight calls on shutdown
    #[arg(long, env = "FARHAND_DRAIN_GRACE_SECS", default_value_t = 10)]
    drain_grace_secs: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Invoke one tool on a connected agent and print the response
    Invoke {
        /// Target agent identity
        #[arg(short, long)]
        identity: String,

        /// Tool name
        #[arg(short, long)]
        tool: String,

        /// Tool parameters as JSON
        #[arg(short, long, default_value = "{}")]
        params: String,

        /// Seconds to wait for the response
        #[arg(long)]
        timeout: Option<u64>,

        /// Mark the call as approved by a human
        #[arg(long)]
        approve: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let registry = connect_registry(cli.redis_url.as_deref()).await?;

    match cli.command {
        Some(Command::Invoke {
            identity,
            tool,
            params,
            timeout,
            approve,
        }) => {
            let params = serde_json::from_str(&params).context("--params must be valid JSON")?;
            let mut call = farhand::proto::ToolCall::new(identity, tool, params);
            if let Some(secs) = timeout {
                call = call.with_timeout(Duration::from_secs(secs));
            }
            if approve {
                call = call.approved();
            }

            let response = CommandRouter::new(registry).invoke_request(call).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                std::process::exit(2);
            }
            Ok(())
        }
        None => {
            serve(
                registry,
                cli.listen,
                cli.credentials,
                cli.audit_log,
                cli.instance_id,
                Duration::from_secs(cli.drain_grace_secs),
            )
            .await
        }
    }
}

async fn connect_registry(redis_url: Option<&str>) -> Result<Arc<dyn ConnectionRegistry>> {
    match redis_url {
        #[cfg(not(feature = "redis"))]
        Some(_) => bail!("This build has no Redis support"),
        #[cfg(feature = "redis")]
        Some(url) => {
            let registry = farhand::RedisRegistry::connect(url)
                .await
                .context("Failed to connect to Redis")?;
            info!("Using Redis registry");
            Ok(Arc::new(registry))
        }
        None => {
            warn!("No Redis URL configured; using in-memory registry for a single instance");
            Ok(Arc::new(MemoryRegistry::new()))
        }
    }
}

async fn serve(
    registry: Arc<dyn ConnectionRegistry>,
    listen: SocketAddr,
    credentials: Option<PathBuf>,
    audit_log: Option<PathBuf>,
    instance_id: Option<String>,
    drain_grace: Duration,
) -> Result<()> {
    let Some(path) = credentials else {
        bail!("--credentials is required to serve");
    };
    let credentials = StaticCredentials::load(&path)
        .await
        .with_context(|| format!("Failed to load credentials from {}", path.display()))?;
    if credentials.is_empty() {
        warn!("Credentials file lists no agents; every handshake will be rejected");
    }

    let audit: Arc<dyn AuditLog> = match audit_log {
        Some(path) => Arc::new(
            JsonlAuditLog::open(&path)
                .await
                .with_context(|| format!("Failed to open audit log {}", path.display()))?,
        ),
        None => Arc::new(TracingAuditLog),
    };

    let mut config = RelayConfig::default().with_drain_grace(drain_grace);
    if let Some(instance_id) = instance_id {
        config = config.with_instance_id(instance_id);
    }

    let manager = Arc::new(
        ConnectionManager::new(config, registry, Arc::new(credentials)).with_audit_log(audit),
    );
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind {}", listen))?;
    info!("Relay {} listening on {}", manager.instance_id(), listen);

    farhand::server::serve(listener, manager, shutdown_signal()).await?;
    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                info!("Shutdown requested");
                return;
            }
            Err(e) => warn!("SIGTERM handler unavailable: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    }
    info!("Shutdown requested");
}
