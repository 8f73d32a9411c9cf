//! Error types shared across the agent.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Inbound message failed deserialization.
    Parse(String),
    /// Durable command queue I/O failure.
    Queue(String),
    /// Broker connection failure (session, poll, or publish).
    Broker(String),
    /// Worker process spawn or signal failure.
    Process(String),
    /// Output channel send or teardown failure.
    Channel(String),
    /// Filesystem watch registration or event failure.
    Watch(String),
    /// Node identity discovery failure.
    Identity(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Queue(msg) => write!(f, "queue: {msg}"),
            Self::Broker(msg) => write!(f, "broker: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Channel(msg) => write!(f, "channel: {msg}"),
            Self::Watch(msg) => write!(f, "watch: {msg}"),
            Self::Identity(msg) => write!(f, "identity: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<notify::Error> for AppError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}
