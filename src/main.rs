#![forbid(unsafe_code)]

//! `fleet-agent` — per-node fleet agent binary.
//!
//! Verifies startup preconditions, establishes the broker session with a
//! bounded retry loop, announces the node, and hands control to the
//! dispatcher until a shutdown signal arrives.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use fleet_agent::broker::{Outbox, TcpConnection};
use fleet_agent::config::AgentConfig;
use fleet_agent::dispatcher::Dispatcher;
use fleet_agent::identity::NodeIdentity;
use fleet_agent::{AppError, Result};

/// Exit code when the agent is not started as root.
const EXIT_NOT_ROOT: i32 = 100;
/// Exit code when the log directory is missing.
const EXIT_NO_LOG_DIR: i32 = 200;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "fleet-agent", about = "Per-node fleet agent", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the state directory (queue and uuid files).
    #[arg(long)]
    state_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();

    if !running_as_root() {
        eprintln!("fleet-agent must run as root, exiting");
        std::process::exit(EXIT_NOT_ROOT);
    }

    let mut config = AgentConfig::load_from_path(&args.config)?;
    if let Some(state_dir) = args.state_dir.clone() {
        config.state_dir = state_dir;
    }

    if !config.log_dir.is_dir() {
        eprintln!(
            "log directory {} does not exist, exiting",
            config.log_dir.display()
        );
        dump_startup_failure(&config, "log directory missing");
        std::process::exit(EXIT_NO_LOG_DIR);
    }

    init_tracing(&config, args.log_format)?;
    info!("fleet-agent bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(config))
}

async fn run(config: AgentConfig) -> Result<()> {
    let identity = NodeIdentity::bootstrap(&config)?;
    info!(uuid = identity.uuid, hostname = identity.hostname, "node identity ready");

    // ── Establish the broker session (bounded retries) ──
    let connection = Arc::new(TcpConnection::new(&config.broker.url, config.broker.port));
    open_with_retries(&connection, &config).await?;

    // ── Output channel and sender task ──────────────────
    let ct = CancellationToken::new();
    let (outbox, sender_task) = Outbox::start(Arc::clone(&connection), ct.clone());

    // ── Dispatcher ──────────────────────────────────────
    let mut dispatcher = Dispatcher::new(config, identity, Arc::clone(&connection), outbox)?;
    dispatcher.announce()?;

    tokio::select! {
        () = dispatcher.run(ct.clone()) => {}
        () = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    ct.cancel();
    if let Err(err) = sender_task.await {
        error!(%err, "sender task join failed");
    }
    info!("fleet-agent shut down");
    Ok(())
}

/// Try to open the broker session, sleeping between attempts, until the
/// configured attempt budget is exhausted.
async fn open_with_retries(connection: &TcpConnection, config: &AgentConfig) -> Result<()> {
    use fleet_agent::broker::Connection;

    let delay = std::time::Duration::from_secs(config.broker.reconnect_delay_seconds);
    for attempt in 1..=config.broker.reconnect_attempts {
        if connection.open_session()? {
            return Ok(());
        }
        info!(
            attempt,
            url = config.broker.url,
            port = config.broker.port,
            "broker unreachable, retrying"
        );
        tokio::time::sleep(delay).await;
    }

    Err(AppError::Broker(format!(
        "broker {}:{} unreachable after {} attempts",
        config.broker.url, config.broker.port, config.broker.reconnect_attempts
    )))
}

#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    true
}

/// Best-effort note written when startup fails before logging exists.
fn dump_startup_failure(config: &AgentConfig, reason: &str) {
    let path = config.state_dir.join("startup-failure.log");
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&path) {
        let _ = writeln!(file, "{reason}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(config: &AgentConfig, log_format: LogFormat) -> Result<()> {
    let log_path = config.log_dir.join("fleet-agent.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|err| {
            AppError::Config(format!("cannot open log file {}: {err}", log_path.display()))
        })?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(Arc::new(file))
        .with_ansi(false);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
