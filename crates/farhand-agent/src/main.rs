//! Farhand Agent Binary
//!
//! Connects this machine to a relay and serves tool calls under the local
//! permission model.

use anyhow::{Context, Result};
use clap::Parser;
use farhand_agent::{AgentClient, AgentConfig, PermissionMode};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "farhand-agent", version, about = "Farhand machine-side agent")]
struct Cli {
    /// TOML config file
    #[arg(short, long, env = "FARHAND_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Relay WebSocket URL
    #[arg(long, env = "FARHAND_RELAY_URL")]
    relay_url: Option<String>,

    /// Identity to authenticate as
    #[arg(long, env = "FARHAND_IDENTITY")]
    identity: Option<String>,

    /// Shared secret for the identity
    #[arg(long, env = "FARHAND_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Permission mode: safe, balanced or unrestricted
    #[arg(long, env = "FARHAND_MODE")]
    mode: Option<PermissionMode>,

    /// Directory operations may touch (repeatable)
    #[arg(long = "allow", value_name = "DIR")]
    allowed_directories: Vec<PathBuf>,
}

impl Cli {
    fn into_config(self) -> Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path)?,
            None => AgentConfig::new(
                self.relay_url.clone().context("--relay-url is required without --config")?,
                self.identity.clone().context("--identity is required without --config")?,
                self.secret.clone().context("--secret is required without --config")?,
            ),
        };

        if let Some(relay_url) = self.relay_url {
            config.relay_url = relay_url;
        }
        if let Some(identity) = self.identity {
            config.identity = identity;
        }
        if let Some(secret) = self.secret {
            config.secret = secret;
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if !self.allowed_directories.is_empty() {
            config.allowed_directories = self.allowed_directories;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    if config.allowed_directories.is_empty() {
        warn!("No allowed directories configured; every filesystem operation will be denied");
    }
    info!(
        "Starting Farhand agent {} in {} mode",
        config.identity, config.mode
    );

    let client = Arc::new(AgentClient::from_config(config));
    let runner = tokio::spawn({
        let client = client.clone();
        async move { client.run().await }
    });

    shutdown_signal().await;
    info!("Shutdown requested");
    client.shutdown();

    match runner.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Agent error: {:#}", e),
        Err(e) => error!("Agent task failed: {}", e),
    }

    info!("Agent shutting down");
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
                return;
            }
            Err(e) => warn!("SIGTERM handler unavailable: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    }
}
