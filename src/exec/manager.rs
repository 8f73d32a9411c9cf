//! Worker process lifecycle manager.
//!
//! Spawns one OS process per command, tracks it in an active set keyed by a
//! stable internal identifier, reaps completions without blocking the
//! dispatch loop, and delivers forced termination signals.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use tokio::process::{Child, Command as WorkerCommand};
use tracing::{info, warn};

use crate::broker::Outbox;
use crate::exec::output::{pump_stream, OutputMeta, StreamKind};
use crate::models::command::{Command, OutputMode};
use crate::models::worker::WorkerRecord;
use crate::{AppError, Result};

/// Outcome of a termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The kill signal was delivered.
    Killed,
    /// Signal delivery failed (no such process, or not permitted).
    Failed,
    /// Non-positive pid; no signal was issued.
    Irrelevant,
}

/// A worker that has exited and left the active set.
#[derive(Debug, Clone)]
pub struct ReapedWorker {
    /// The worker's record.
    pub record: WorkerRecord,
    /// Exit code; -1 when the worker was killed by a signal or its status
    /// could not be read.
    pub exit_code: i32,
    /// Ordinal following the last output chunk the worker produced.
    pub final_ordinal: u32,
}

struct Tracked {
    record: WorkerRecord,
    child: Child,
    counter: Arc<AtomicU32>,
}

/// Owns every spawned worker. Single-writer: only the dispatcher task
/// touches the active set.
pub struct ProcessManager {
    cap: usize,
    active: HashMap<String, Tracked>,
}

impl ProcessManager {
    /// Create a manager with the given concurrency cap.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            active: HashMap::new(),
        }
    }

    /// The concurrency cap.
    #[must_use]
    pub fn cap(&self) -> usize {
        self.cap
    }

    /// Number of live workers.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether another worker may be dequeued and spawned.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.active.len() < self.cap
    }

    /// Spawn a worker for `command`, running `program_line` (the command's
    /// program, possibly wrapped in a container execution context).
    ///
    /// Piped streams get pump tasks that feed the outbox; `Discard` streams
    /// are routed to the null device. The declared timeout is recorded but
    /// not enforced.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` when the OS process cannot be started.
    pub fn spawn(
        &mut self,
        command: &Command,
        node_uuid: &str,
        program_line: &str,
        outbox: &Outbox,
    ) -> Result<WorkerRecord> {
        let mut worker = build_worker(command, program_line);
        let mut child = worker
            .spawn()
            .map_err(|err| AppError::Process(format!("failed to spawn worker: {err}")))?;

        let pid = child.id().unwrap_or(0);
        let record = WorkerRecord::new(pid, command);
        info!(
            pid,
            task_uuid = command.task_uuid,
            run_as = command.run_as,
            timeout_seconds = command.timeout,
            "worker spawned"
        );

        let counter = Arc::new(AtomicU32::new(1));
        let shared_counter = Arc::clone(&counter);
        let meta = OutputMeta {
            node_uuid: node_uuid.to_owned(),
            pid,
            task_uuid: command.task_uuid.clone(),
            source: command.source.clone(),
            request_sequence_number: command.request_sequence_number,
            counter,
        };

        if let Some(stdout) = child.stdout.take() {
            pump_stream(
                stdout,
                StreamKind::Stdout,
                capture_path(command.std_out, command.std_out_path.as_deref()),
                meta.clone(),
                outbox.clone(),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            pump_stream(
                stderr,
                StreamKind::Stderr,
                capture_path(command.std_err, command.std_err_path.as_deref()),
                meta,
                outbox.clone(),
            );
        }

        self.active.insert(
            record.id.clone(),
            Tracked {
                record: record.clone(),
                child,
                counter: shared_counter,
            },
        );
        Ok(record)
    }

    /// Non-blocking sweep over every tracked worker. Exited workers leave
    /// the active set and are returned with their exit codes.
    pub fn reap_completed(&mut self) -> Vec<ReapedWorker> {
        let mut reaped = Vec::new();

        for (id, tracked) in &mut self.active {
            match tracked.child.try_wait() {
                Ok(Some(status)) => {
                    reaped.push((id.clone(), status.code().unwrap_or(-1)));
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(pid = tracked.record.pid, %err, "failed to poll worker status");
                    // The handle is unusable; drop the dead entry.
                    reaped.push((id.clone(), -1));
                }
            }
        }

        reaped
            .into_iter()
            .filter_map(|(id, exit_code)| {
                self.active.remove(&id).map(|tracked| {
                    info!(
                        pid = tracked.record.pid,
                        task_uuid = tracked.record.task_uuid,
                        exit_code,
                        "worker exited"
                    );
                    ReapedWorker {
                        record: tracked.record,
                        exit_code,
                        final_ordinal: tracked.counter.load(std::sync::atomic::Ordering::SeqCst),
                    }
                })
            })
            .collect()
    }

    /// Deliver one SIGKILL to an arbitrary pid. The pid need not belong to
    /// a worker this agent spawned.
    #[cfg(unix)]
    #[must_use]
    pub fn terminate(pid: i32) -> TerminateOutcome {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if pid <= 0 {
            info!(pid, "irrelevant terminate request");
            return TerminateOutcome::Irrelevant;
        }

        match kill(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => {
                info!(pid, "kill signal delivered");
                TerminateOutcome::Killed
            }
            Err(err) => {
                warn!(pid, %err, "kill signal failed");
                TerminateOutcome::Failed
            }
        }
    }

    /// Termination is only supported on unix hosts.
    #[cfg(not(unix))]
    #[must_use]
    pub fn terminate(pid: i32) -> TerminateOutcome {
        if pid <= 0 {
            info!(pid, "irrelevant terminate request");
            return TerminateOutcome::Irrelevant;
        }
        warn!(pid, "terminate unsupported on this platform");
        TerminateOutcome::Failed
    }
}

/// Build the OS command for a worker: shell invocation, run-as identity,
/// working directory, and stream routing.
fn build_worker(command: &Command, program_line: &str) -> WorkerCommand {
    let mut worker = if command.run_as.is_empty() || command.run_as == "root" {
        let mut cmd = WorkerCommand::new("/bin/sh");
        cmd.arg("-c").arg(program_line);
        cmd
    } else {
        let mut cmd = WorkerCommand::new("su");
        cmd.args(["-s", "/bin/sh", command.run_as.as_str(), "-c", program_line]);
        cmd
    };

    worker
        .current_dir(&command.working_directory)
        .stdin(Stdio::null())
        .stdout(stdio_for(command.std_out))
        .stderr(stdio_for(command.std_err))
        .kill_on_drop(true);
    worker
}

fn stdio_for(mode: OutputMode) -> Stdio {
    match mode {
        OutputMode::Discard => Stdio::null(),
        OutputMode::Return | OutputMode::Capture => Stdio::piped(),
    }
}

fn capture_path(mode: OutputMode, path: Option<&str>) -> Option<String> {
    match mode {
        OutputMode::Capture => path.map(str::to_owned),
        OutputMode::Return | OutputMode::Discard => None,
    }
}
