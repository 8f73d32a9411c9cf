//! Inbound command model and wire parsing.

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Inbound payloads at or above this size are classified as oversize rather
/// than merely malformed when they fail to parse.
pub const MAX_INBOUND_BYTES: usize = 10_000;

/// Administrative request type carried in the wire `type` field.
///
/// Any other tag fails deserialization and is handled through the
/// unparseable-message path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CommandType {
    /// Controller acknowledged this node's registration.
    #[serde(rename = "REGISTRATION_REQUEST_DONE")]
    RegistrationRequestDone,
    /// Run a program on this node or a managed container.
    #[serde(rename = "EXECUTE_REQUEST")]
    ExecuteRequest,
    /// Report the currently running worker subprocesses.
    #[serde(rename = "PS_REQUEST")]
    PsRequest,
    /// Emit an immediate heartbeat response.
    #[serde(rename = "HEARTBEAT_REQUEST")]
    HeartbeatRequest,
    /// Kill the process named by `pid`.
    #[serde(rename = "TERMINATE_REQUEST")]
    TerminateRequest,
    /// Add filesystem watch points.
    #[serde(rename = "INOTIFY_CREATE_REQUEST")]
    InotifyCreateRequest,
    /// Remove filesystem watch points.
    #[serde(rename = "INOTIFY_REMOVE_REQUEST")]
    InotifyRemoveRequest,
    /// Report the current watch-point list.
    #[serde(rename = "INOTIFY_LIST_REQUEST")]
    InotifyListRequest,
}

/// Routing for one of a worker's output streams.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutputMode {
    /// Stream chunks back to the controller through the output channel.
    #[default]
    #[serde(rename = "RETURN")]
    Return,
    /// Append the stream to a file on this node.
    #[serde(rename = "CAPTURE")]
    Capture,
    /// Drop the stream.
    #[serde(rename = "DISCARD")]
    Discard,
}

/// A parsed administrative request. Immutable after a successful parse; a
/// malformed wire message never produces a `Command`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Request type tag.
    #[serde(rename = "type")]
    pub command_type: CommandType,
    /// Target node or container identifier.
    #[serde(default)]
    pub uuid: String,
    /// Task identifier used for request/response correlation.
    #[serde(default)]
    pub task_uuid: String,
    /// Originating controller component.
    #[serde(default)]
    pub source: String,
    /// Monotonic per-controller sequence number.
    #[serde(default)]
    pub request_sequence_number: i64,
    /// Program line handed to the worker shell.
    #[serde(default)]
    pub program: String,
    /// Working directory for the worker process.
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    /// Identity the worker runs as; empty means the agent's own.
    #[serde(default)]
    pub run_as: String,
    /// Stdout routing.
    #[serde(default)]
    pub std_out: OutputMode,
    /// Capture path for stdout when the mode is `Capture`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_out_path: Option<String>,
    /// Stderr routing.
    #[serde(default)]
    pub std_err: OutputMode,
    /// Capture path for stderr when the mode is `Capture`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_err_path: Option<String>,
    /// Declared execution timeout in seconds; 0 means unlimited. Carried on
    /// the worker record but not enforced by the agent.
    #[serde(default)]
    pub timeout: u64,
    /// Target process id for termination requests.
    #[serde(default)]
    pub pid: i32,
    /// Ordered watch-point paths for the inotify requests.
    #[serde(default)]
    pub watch_arguments: Vec<String>,
}

fn default_working_directory() -> String {
    "/".into()
}

impl Command {
    /// Parse one wire message or queue line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Parse` when the payload is not a valid command.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| AppError::Parse(err.to_string()))
    }

    /// Serialize to the single-line form persisted in the durable queue.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Parse` if serialization fails.
    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| AppError::Parse(err.to_string()))
    }
}
