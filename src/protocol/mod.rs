//! Outbound wire protocol: typed response messages and their builder.

pub mod builder;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

pub use builder::ResponseBuilder;

/// Sentinel pid used on responses that do not describe a worker process.
pub const NO_PID: i64 = 9_999_999;

/// Outbound message type tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ResponseType {
    /// Announce this node to the controller.
    #[serde(rename = "REGISTRATION_REQUEST")]
    Registration,
    /// Periodic or requested liveness report.
    #[serde(rename = "HEARTBEAT_RESPONSE")]
    Heartbeat,
    /// A command is accepted and waiting in the local queue.
    #[serde(rename = "IN_QUEUE_RESPONSE")]
    InQueue,
    /// A termination request succeeded.
    #[serde(rename = "TERMINATE_RESPONSE_DONE")]
    TerminateDone,
    /// A termination request failed.
    #[serde(rename = "TERMINATE_RESPONSE_FAILED")]
    TerminateFailed,
    /// Generic response: error/status code, free text, or worker output.
    #[serde(rename = "EXECUTE_RESPONSE")]
    Execute,
    /// Exit notice: a command finished or was abandoned, with a reason code.
    #[serde(rename = "EXECUTE_RESPONSE_DONE")]
    ExecuteDone,
    /// Snapshot of the current watch-point list.
    #[serde(rename = "INOTIFY_LIST_RESPONSE")]
    WatchList,
}

/// One outbound protocol message.
///
/// A single struct covers every template; fields irrelevant to a given type
/// stay `None` and are omitted from the wire form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Message type tag.
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    /// This node's identifier.
    pub uuid: String,
    /// Correlates with the originating command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_uuid: Option<String>,
    /// Correlates with the originating command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_sequence_number: Option<i64>,
    /// Originating controller component, echoed back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Environment the node belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    /// Node hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Physical parent hostname when containerized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_hostname: Option<String>,
    /// Node MAC address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    /// Node IP addresses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ips: Option<Vec<String>>,
    /// Worker pid, or [`NO_PID`] for agent-level responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<i64>,
    /// Ordinal of this message within one command's response stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_number: Option<u32>,
    /// Numeric error/status code on generic responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Stdout chunk or free-text message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_out: Option<String>,
    /// Stderr chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_err: Option<String>,
    /// Worker exit code on exit notices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Watch-point list on snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_points: Option<Vec<String>>,
}

impl Response {
    pub(crate) fn bare(response_type: ResponseType, uuid: &str) -> Self {
        Self {
            response_type,
            uuid: uuid.to_owned(),
            task_uuid: None,
            request_sequence_number: None,
            source: None,
            environment_id: None,
            hostname: None,
            parent_hostname: None,
            mac_address: None,
            ips: None,
            pid: None,
            response_number: None,
            code: None,
            std_out: None,
            std_err: None,
            exit_code: None,
            watch_points: None,
        }
    }

    /// One chunk of captured worker output, bound for the output channel.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn output_chunk(
        uuid: &str,
        pid: u32,
        response_number: u32,
        std_out: Option<String>,
        std_err: Option<String>,
        source: &str,
        task_uuid: &str,
        request_sequence_number: i64,
    ) -> Self {
        let mut msg = Self::bare(ResponseType::Execute, uuid);
        msg.pid = Some(i64::from(pid));
        msg.response_number = Some(response_number);
        msg.std_out = std_out;
        msg.std_err = std_err;
        msg.source = Some(source.to_owned());
        msg.task_uuid = Some(task_uuid.to_owned());
        msg.request_sequence_number = Some(request_sequence_number);
        msg
    }

    /// Serialize to the single-line wire form.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Parse` if serialization fails.
    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| AppError::Parse(err.to_string()))
    }
}
