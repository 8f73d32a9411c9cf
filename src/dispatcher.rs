//! The command dispatcher: a single cooperative loop owning all agent state.
//!
//! Every iteration performs, in fixed order: fire due timers, reap
//! completed workers, forward buffered watch notifications, drive the
//! broker connection, then either handle one pending inbound message or
//! dequeue one queued command into a free worker slot. Any failure inside
//! an iteration is logged and the loop continues; nothing short of
//! cancellation stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{Connection, Outbox};
use crate::config::AgentConfig;
use crate::containers::ContainerRegistry;
use crate::exec::{ProcessManager, TerminateOutcome};
use crate::identity::NodeIdentity;
use crate::models::command::{Command, CommandType, MAX_INBOUND_BYTES};
use crate::protocol::{ResponseBuilder, NO_PID};
use crate::queue::CommandQueue;
use crate::timer::TimeoutAccumulator;
use crate::watch::WatchManager;
use crate::Result;

/// Fixed diagnostic run for `PS_REQUEST`: report every worker shell and its
/// children.
const PS_DIAGNOSTIC: &str = "ps -eo pid,ppid,user,stat,etime,args | grep '[s]h -c'";

/// Error code attached to parse-failure responses.
const CODE_PARSE_FAILURE: i32 = 1;
/// Reason code attached to the exit notice paired with a parse failure.
const EXIT_NOTICE_ORDINAL: u32 = 2;

/// The agent's command-processing engine. Owns the timers, the worker
/// table, the durable queue, and the watch and container collaborators.
pub struct Dispatcher<C: Connection> {
    config: AgentConfig,
    connection: Arc<C>,
    outbox: Outbox,
    identity: NodeIdentity,
    response: ResponseBuilder,
    queue: CommandQueue,
    workers: ProcessManager,
    watches: WatchManager,
    containers: ContainerRegistry,
    heartbeat_timer: TimeoutAccumulator,
    queue_timer: TimeoutAccumulator,
}

impl<C: Connection> Dispatcher<C> {
    /// Assemble the dispatcher and its owned state.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue directory or the watch backend
    /// cannot be set up.
    pub fn new(
        config: AgentConfig,
        identity: NodeIdentity,
        connection: Arc<C>,
        outbox: Outbox,
    ) -> Result<Self> {
        let queue = CommandQueue::open(config.queue_path())?;
        let workers = ProcessManager::new(config.worker_cap());
        let watches = WatchManager::new()?;
        let mut containers = ContainerRegistry::new();
        containers.scan(&config.container_root);

        let heartbeat_timer = TimeoutAccumulator::started_now(config.timers.heartbeat_seconds);
        let queue_timer = TimeoutAccumulator::started_now(config.timers.queue_announce_seconds);
        let response = ResponseBuilder::new(&identity.uuid);

        Ok(Self {
            config,
            connection,
            outbox,
            identity,
            response,
            queue,
            workers,
            watches,
            containers,
            heartbeat_timer,
            queue_timer,
        })
    }

    /// The durable command queue.
    #[must_use]
    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// The worker table.
    #[must_use]
    pub fn workers(&self) -> &ProcessManager {
        &self.workers
    }

    /// Announce this node to the controller. Sent once after the broker
    /// session opens.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Broker` if the announcement cannot be published.
    pub fn announce(&self) -> Result<()> {
        let msg = self.response.registration(
            &self.identity.mac_address,
            &self.identity.hostname,
            &self.identity.parent_hostname,
            &self.identity.environment_id,
            self.identity.ips.clone(),
        );
        self.connection.publish(&msg.to_wire()?)?;
        info!("registration announced");
        Ok(())
    }

    /// Run the dispatch loop until cancellation.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(
            cap = self.workers.cap(),
            queue = %self.queue.path().display(),
            "dispatcher running"
        );

        while !cancel.is_cancelled() {
            if let Err(err) = self.iterate().await {
                // The loop boundary: unexpected per-iteration failures are
                // logged, never fatal.
                error!(%err, "dispatch iteration failed");
            }
        }
        info!("dispatcher stopped");
    }

    /// One full loop iteration in the fixed stage order. Public so hosts
    /// and tests can drive the state machine step by step.
    ///
    /// # Errors
    ///
    /// Returns the first stage error; the caller treats it as non-fatal.
    pub async fn iterate(&mut self) -> Result<()> {
        self.fire_timers()?;
        self.reap_workers().await?;
        self.forward_watch_events()?;

        let poll = Duration::from_millis(self.config.broker.poll_interval_ms);
        let rc = self.connection.drive(poll);
        if rc != 0 {
            debug!(rc, "connection poll reported trouble, reconnecting");
            if let Err(err) = self.connection.reconnect() {
                warn!(%err, "reconnect failed");
                tokio::time::sleep(poll).await;
            }
        }

        if let Some(raw) = self.connection.try_recv() {
            self.handle_message(&raw)?;
        } else {
            self.pump_queue()?;
        }

        Ok(())
    }

    /// Fire the heartbeat and queue re-announcement timers when due.
    fn fire_timers(&mut self) -> Result<()> {
        if self.heartbeat_timer.tick() {
            self.emit_heartbeat(0, "", "")?;
            self.heartbeat_timer.reset_now();
        }

        if self.queue_timer.tick() {
            for line in self.queue.entries()? {
                match Command::parse(&line) {
                    Ok(command) => {
                        let msg = self.response.in_queue(&command.task_uuid);
                        self.connection.publish(&msg.to_wire()?)?;
                    }
                    Err(err) => {
                        warn!(%err, "unparseable entry in command queue");
                    }
                }
            }
            self.queue_timer.reset_now();
        }

        Ok(())
    }

    /// Sweep exited workers and emit their exit notices.
    async fn reap_workers(&mut self) -> Result<()> {
        for reaped in self.workers.reap_completed() {
            let msg = self.response.exit(
                i64::from(reaped.record.pid),
                reaped.record.request_sequence_number,
                reaped.final_ordinal,
                &reaped.record.source,
                &reaped.record.task_uuid,
                reaped.exit_code,
            );
            // Exit notices follow the worker's own output through the
            // channel so the controller sees chunks before completion.
            self.outbox.send(msg.to_wire()?).await?;
        }
        Ok(())
    }

    /// Forward buffered watch notifications upstream.
    fn forward_watch_events(&mut self) -> Result<()> {
        for event in self.watches.drain_events() {
            let msg = self.response.response(0, 0, &event, "", "", "");
            self.connection.publish(&msg.to_wire()?)?;
        }
        Ok(())
    }

    /// Dispatch one inbound message.
    fn handle_message(&mut self, raw: &str) -> Result<()> {
        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, len = raw.len(), "failed to parse inbound message");
                return self.reject_unparseable(raw);
            }
        };

        debug!(
            command_type = ?command.command_type,
            uuid = command.uuid,
            task_uuid = command.task_uuid,
            "inbound command"
        );

        match command.command_type {
            CommandType::RegistrationRequestDone => {
                info!("registration acknowledged by controller");
            }
            CommandType::ExecuteRequest => self.handle_execute(&command, raw)?,
            CommandType::PsRequest => self.handle_ps(&command)?,
            CommandType::HeartbeatRequest => self.handle_heartbeat(&command)?,
            CommandType::TerminateRequest => self.handle_terminate(&command)?,
            CommandType::InotifyCreateRequest => {
                for path in &command.watch_arguments {
                    if let Err(err) = self.watches.add_watcher(path) {
                        warn!(path, %err, "failed to add watch point");
                    } else {
                        self.response.add_watch_point(path);
                    }
                }
                self.publish_watch_list()?;
            }
            CommandType::InotifyRemoveRequest => {
                for path in &command.watch_arguments {
                    if let Err(err) = self.watches.erase_watcher(path) {
                        warn!(path, %err, "failed to remove watch point");
                    } else {
                        self.response.remove_watch_point(path);
                    }
                }
                self.publish_watch_list()?;
            }
            CommandType::InotifyListRequest => self.publish_watch_list()?,
        }

        Ok(())
    }

    /// Unparseable inbound message: classify by size and answer with a
    /// response + exit-notice pair.
    fn reject_unparseable(&mut self, raw: &str) -> Result<()> {
        let text = if raw.len() >= MAX_INBOUND_BYTES {
            "command exceeds the maximum accepted size"
        } else {
            "command is not a valid JSON message"
        };

        let msg = self
            .response
            .response(0, CODE_PARSE_FAILURE, text, "", "", "");
        self.connection.publish(&msg.to_wire()?)?;

        let exit = self
            .response
            .exit(NO_PID, 0, EXIT_NOTICE_ORDINAL, "", "", CODE_PARSE_FAILURE);
        self.connection.publish(&exit.to_wire()?)?;
        Ok(())
    }

    /// `EXECUTE_REQUEST`: queue locally, or hand to the container manager.
    fn handle_execute(&mut self, command: &Command, raw: &str) -> Result<()> {
        self.containers.scan(&self.config.container_root);

        if let Some(container) = self.containers.find_by_id(&command.uuid) {
            self.containers.forward(container, raw)?;
            return Ok(());
        }

        self.queue.append(raw)?;
        debug!(task_uuid = command.task_uuid, "execute request queued");
        Ok(())
    }

    /// `PS_REQUEST`: spawn the fixed diagnostic immediately, bypassing the
    /// queue and the concurrency gate.
    fn handle_ps(&mut self, command: &Command) -> Result<()> {
        let mut diagnostic = command.clone();
        diagnostic.program = PS_DIAGNOSTIC.to_owned();
        diagnostic.working_directory = "/".to_owned();
        self.workers.spawn(
            &diagnostic,
            &self.identity.uuid,
            PS_DIAGNOSTIC,
            &self.outbox,
        )?;
        Ok(())
    }

    /// `HEARTBEAT_REQUEST`: refresh identity and answer immediately when the
    /// request targets this node; container-addressed requests are ignored.
    fn handle_heartbeat(&mut self, command: &Command) -> Result<()> {
        if self.containers.find_by_id(&command.uuid).is_some() {
            debug!(uuid = command.uuid, "heartbeat request for container ignored");
            return Ok(());
        }
        self.emit_heartbeat(
            command.request_sequence_number,
            &command.source,
            &command.task_uuid,
        )
    }

    /// `TERMINATE_REQUEST`: one kill signal, acknowledged either way.
    fn handle_terminate(&mut self, command: &Command) -> Result<()> {
        match ProcessManager::terminate(command.pid) {
            TerminateOutcome::Killed => {
                let msg = self.response.terminate_done(
                    command.request_sequence_number,
                    &command.source,
                    &command.task_uuid,
                );
                self.connection.publish(&msg.to_wire()?)?;
            }
            TerminateOutcome::Failed => {
                let msg = self.response.terminate_failed(
                    command.request_sequence_number,
                    &command.source,
                    &command.task_uuid,
                );
                self.connection.publish(&msg.to_wire()?)?;
            }
            TerminateOutcome::Irrelevant => {}
        }
        Ok(())
    }

    /// With a free worker slot, move one queued command into a worker.
    fn pump_queue(&mut self) -> Result<()> {
        if !self.workers.has_capacity() || self.queue.is_empty() {
            return Ok(());
        }

        let Some(line) = self.queue.pop_front()? else {
            return Ok(());
        };
        if line.trim().is_empty() {
            return Ok(());
        }

        let mut command = match Command::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, "dropping unparseable queue entry");
                return Ok(());
            }
        };

        self.containers.scan(&self.config.container_root);
        let program_line = if let Some(container) = self.containers.find_by_id(&command.uuid) {
            self.containers.exec_context(container, &command.program)
        } else {
            // A locally executed command runs under this node's identity.
            command.uuid = self.identity.uuid.clone();
            command.program.clone()
        };

        self.workers
            .spawn(&command, &self.identity.uuid, &program_line, &self.outbox)?;
        Ok(())
    }

    /// Refresh identity caches and publish one heartbeat response.
    fn emit_heartbeat(
        &mut self,
        request_sequence_number: i64,
        source: &str,
        task_uuid: &str,
    ) -> Result<()> {
        self.response.clear();
        self.identity.refresh();
        self.response.set_ips(self.identity.ips.clone());
        self.response.set_hostname(&self.identity.hostname);
        self.response
            .set_parent_hostname(&self.identity.parent_hostname);
        self.response.set_mac_address(&self.identity.mac_address);

        let msg = self.response.heartbeat(
            request_sequence_number,
            &self.identity.environment_id,
            source,
            task_uuid,
        );
        self.connection.publish(&msg.to_wire()?)?;
        debug!("heartbeat published");
        Ok(())
    }

    fn publish_watch_list(&mut self) -> Result<()> {
        let msg = self.response.watch_list();
        self.connection.publish(&msg.to_wire()?)?;
        Ok(())
    }
}
