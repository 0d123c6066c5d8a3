//! Sandchat Relay
//!
//! Serves the chat, shell, and health endpoints over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sandchat_core::config::{ChatBackend, Config, load_config};
use sandchat_core::{Persona, tracing_init};
use sandchat_relay::producer::{self, Identity, ProcessProducer, Producer};
use sandchat_relay::relay::Relay;
use sandchat_relay::server::{AppState, build_router};
use sandchat_relay::shell::ShellService;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sandchat-relay")]
#[command(version, about = "Sandchat relay - streams LLM and shell output over SSE")]
struct Args {
    /// Settings file (JSON). Defaults to the global settings file if present.
    #[arg(long, env = "SANDCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "SANDCHAT_ADDR")]
    addr: Option<SocketAddr>,

    /// Chat backend: "api" (Messages API) or "cli" (command-line tool)
    #[arg(long, env = "SANDCHAT_CHAT_BACKEND")]
    backend: Option<ChatBackend>,

    /// Model requested from the Messages API
    #[arg(long, env = "SANDCHAT_MODEL")]
    model: Option<String>,

    /// Path to the command-line AI tool
    #[arg(long, env = "SANDCHAT_CLI_BIN")]
    cli_bin: Option<PathBuf>,

    /// Seconds before a non-streaming chat request times out
    #[arg(long, env = "SANDCHAT_TIMEOUT")]
    timeout: Option<u64>,

    /// File containing the persona description
    #[arg(long, env = "SANDCHAT_PERSONA")]
    persona: Option<PathBuf>,

    /// Execute commands sent to the shell endpoint.
    #[arg(long, env = "SANDCHAT_SHELL_ENABLED")]
    shell_enabled: bool,

    /// Account shell commands run as (requires the relay to run as root)
    #[arg(long, env = "SANDCHAT_SHELL_USER")]
    shell_user: Option<String>,

    /// Working directory for shell commands
    #[arg(long, env = "SANDCHAT_SHELL_WORKDIR")]
    shell_workdir: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, env = "SANDCHAT_LOG_LEVEL")]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SANDCHAT_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Overlay flags and environment onto the loaded settings.
    fn apply(self, config: &mut Config) {
        if let Some(addr) = self.addr {
            config.server.listen_addr = addr;
        }
        if let Some(level) = self.log_level {
            config.server.log_level = level;
        }
        config.server.log_json |= self.log_json;
        if let Some(backend) = self.backend {
            config.chat.backend = backend;
        }
        if let Some(model) = self.model {
            config.chat.model = model;
        }
        if let Some(bin) = self.cli_bin {
            config.chat.cli_bin = bin;
        }
        if let Some(secs) = self.timeout {
            config.chat.timeout_secs = secs;
        }
        if self.persona.is_some() {
            config.chat.persona_path = self.persona;
        }
        config.shell.enabled |= self.shell_enabled;
        if self.shell_user.is_some() {
            config.shell.user = self.shell_user;
        }
        if let Some(dir) = self.shell_workdir {
            config.shell.working_directory = dir;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);

    let log_filter = format!("sandchat_relay={}", config.server.log_level);
    tracing_init::init_tracing(&log_filter, config.server.log_json);

    let persona = match &config.chat.persona_path {
        Some(path) => Persona::from_file(path)?,
        None => Persona::default(),
    };

    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    if api_key.is_none() && config.chat.backend == ChatBackend::Cli {
        warn!("ANTHROPIC_API_KEY is not set; the CLI tool must be authenticated another way");
    }
    let chat = producer::chat_producer(&config.chat, api_key)
        .context("failed to configure chat producer")?;

    let executor: Option<Arc<dyn Producer>> = if config.shell.enabled {
        let identity = config
            .shell
            .user
            .as_deref()
            .map(Identity::lookup)
            .transpose()
            .context("failed to resolve shell user")?;
        Some(Arc::new(ProcessProducer::shell(&config.shell, identity)))
    } else {
        None
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.listen_addr,
        backend = chat.name(),
        shell_enabled = config.shell.enabled,
        shell_user = ?config.shell.user,
        "Starting sandchat-relay"
    );

    let relay = Relay::new(
        persona,
        chat,
        Duration::from_secs(config.chat.timeout_secs),
    );
    let shell = ShellService::new(&config.shell, executor);
    let app = build_router(AppState::new(relay, shell));

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        () = sigterm => {
            info!("Received SIGTERM shutdown signal");
        }
    }
}
