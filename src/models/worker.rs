//! Worker record tracked by the process lifecycle manager.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::command::Command;

/// One spawned worker process.
///
/// Keyed by a stable internal identifier rather than the OS pid, so pid
/// reuse can never alias two workers in the active set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRecord {
    /// Stable internal identifier.
    pub id: String,
    /// OS process id; one attribute of the record, not its key.
    pub pid: u32,
    /// Task identifier of the owning command.
    pub task_uuid: String,
    /// Originating controller component of the owning command.
    pub source: String,
    /// Sequence number of the owning command.
    pub request_sequence_number: i64,
    /// Spawn timestamp.
    pub spawned_at: DateTime<Utc>,
    /// Declared timeout from the owning command, in seconds. Recorded for
    /// diagnostics; the agent does not enforce it.
    pub timeout_seconds: u64,
}

impl WorkerRecord {
    /// Construct a record for a freshly spawned worker.
    #[must_use]
    pub fn new(pid: u32, command: &Command) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            pid,
            task_uuid: command.task_uuid.clone(),
            source: command.source.clone(),
            request_sequence_number: command.request_sequence_number,
            spawned_at: Utc::now(),
            timeout_seconds: command.timeout,
        }
    }
}
