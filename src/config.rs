//! Agent configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Broker connectivity settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BrokerConfig {
    /// Broker host name or address.
    pub url: String,
    /// Broker TCP port.
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Delay between reconnect attempts during session establishment.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_seconds: u64,
    /// Maximum reconnect attempts before startup fails.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    /// Bounded wait applied to each connection poll in the dispatch loop.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_broker_port() -> u16 {
    1883
}

fn default_reconnect_delay() -> u64 {
    10
}

fn default_reconnect_attempts() -> u32 {
    30
}

fn default_poll_interval_ms() -> u64 {
    50
}

/// Periodic event thresholds (seconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimerConfig {
    /// Heartbeat emission threshold.
    #[serde(default = "default_heartbeat_seconds")]
    pub heartbeat_seconds: u32,
    /// Queued-command re-announcement threshold.
    #[serde(default = "default_queue_announce_seconds")]
    pub queue_announce_seconds: u32,
}

fn default_heartbeat_seconds() -> u32 {
    175
}

fn default_queue_announce_seconds() -> u32 {
    30
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            heartbeat_seconds: default_heartbeat_seconds(),
            queue_announce_seconds: default_queue_announce_seconds(),
        }
    }
}

/// Agent configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Broker connectivity settings.
    pub broker: BrokerConfig,
    /// Directory holding the durable command queue and the node uuid file.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Directory the agent log file is written to. Must exist at startup.
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Environment this node is registered under.
    #[serde(default)]
    pub environment_id: String,
    /// Hostname of the physical parent when the agent runs inside a container.
    #[serde(default)]
    pub parent_hostname: Option<String>,
    /// Override for the worker concurrency cap. Defaults to the core count.
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Root directory scanned for managed containers.
    #[serde(default = "default_container_root")]
    pub container_root: PathBuf,
    /// Periodic event thresholds.
    #[serde(default)]
    pub timers: TimerConfig,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/etc/fleet-agent")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/fleet-agent")
}

fn default_container_root() -> PathBuf {
    PathBuf::from("/var/lib/fleet-agent/containers")
}

impl AgentConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize values.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the durable command queue file.
    #[must_use]
    pub fn queue_path(&self) -> PathBuf {
        self.state_dir.join("command-queue.txt")
    }

    /// Path of the persisted node uuid file.
    #[must_use]
    pub fn uuid_path(&self) -> PathBuf {
        self.state_dir.join("node-uuid")
    }

    /// Effective worker concurrency cap.
    #[must_use]
    pub fn worker_cap(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        })
    }

    fn validate(&mut self) -> Result<()> {
        if self.broker.url.is_empty() {
            return Err(AppError::Config("broker.url must not be empty".into()));
        }

        if self.max_workers == Some(0) {
            return Err(AppError::Config(
                "max_workers must be greater than zero when set".into(),
            ));
        }

        if self.broker.reconnect_delay_seconds == 0 {
            warn!("broker.reconnect_delay_seconds is zero, using default");
            self.broker.reconnect_delay_seconds = default_reconnect_delay();
        }

        Ok(())
    }
}
