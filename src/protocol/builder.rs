//! Construction of outbound message bodies from the fixed template set.

use crate::protocol::{Response, ResponseType, NO_PID};

/// Builds outbound messages for one node, caching the transient identity
/// fields between calls and accumulating the watch-point list across the
/// agent's lifetime.
///
/// [`ResponseBuilder::clear`] resets only the transient identity caches;
/// the node uuid and the watch-point list survive.
#[derive(Debug, Default, Clone)]
pub struct ResponseBuilder {
    uuid: String,
    ips: Vec<String>,
    hostname: String,
    parent_hostname: String,
    mac_address: String,
    watch_points: Vec<String>,
}

impl ResponseBuilder {
    /// Create a builder for the node identified by `uuid`.
    #[must_use]
    pub fn new(uuid: &str) -> Self {
        Self {
            uuid: uuid.to_owned(),
            ..Self::default()
        }
    }

    /// Replace the cached IP address set.
    pub fn set_ips(&mut self, ips: Vec<String>) {
        self.ips = ips;
    }

    /// Replace the cached hostname.
    pub fn set_hostname(&mut self, hostname: &str) {
        self.hostname = hostname.to_owned();
    }

    /// Replace the cached parent hostname.
    pub fn set_parent_hostname(&mut self, parent_hostname: &str) {
        self.parent_hostname = parent_hostname.to_owned();
    }

    /// Replace the cached MAC address.
    pub fn set_mac_address(&mut self, mac_address: &str) {
        self.mac_address = mac_address.to_owned();
    }

    /// Record a watch point for subsequent snapshots.
    pub fn add_watch_point(&mut self, path: &str) {
        if !self.watch_points.iter().any(|p| p == path) {
            self.watch_points.push(path.to_owned());
        }
    }

    /// Drop a watch point from subsequent snapshots.
    pub fn remove_watch_point(&mut self, path: &str) {
        self.watch_points.retain(|p| p != path);
    }

    /// The accumulated watch-point list.
    #[must_use]
    pub fn watch_points(&self) -> &[String] {
        &self.watch_points
    }

    /// Reset the per-call transient identity caches. The node uuid and the
    /// accumulated watch-point list are preserved.
    pub fn clear(&mut self) {
        self.ips.clear();
        self.hostname.clear();
        self.parent_hostname.clear();
        self.mac_address.clear();
    }

    /// Node announcement sent once after the broker session opens.
    #[must_use]
    pub fn registration(
        &self,
        mac_address: &str,
        hostname: &str,
        parent_hostname: &str,
        environment_id: &str,
        ips: Vec<String>,
    ) -> Response {
        let mut msg = Response::bare(ResponseType::Registration, &self.uuid);
        msg.mac_address = Some(mac_address.to_owned());
        msg.hostname = Some(hostname.to_owned());
        msg.parent_hostname = Some(parent_hostname.to_owned());
        msg.environment_id = Some(environment_id.to_owned());
        msg.ips = Some(ips);
        msg
    }

    /// Liveness report. Identity fields come from the builder caches, which
    /// the caller refreshes beforehand; both the timer-driven and the
    /// request-driven paths use this same field set.
    #[must_use]
    pub fn heartbeat(
        &self,
        request_sequence_number: i64,
        environment_id: &str,
        source: &str,
        task_uuid: &str,
    ) -> Response {
        let mut msg = Response::bare(ResponseType::Heartbeat, &self.uuid);
        msg.request_sequence_number = Some(request_sequence_number);
        msg.environment_id = Some(environment_id.to_owned());
        msg.mac_address = Some(self.mac_address.clone());
        msg.hostname = Some(self.hostname.clone());
        msg.parent_hostname = Some(self.parent_hostname.clone());
        msg.ips = Some(self.ips.clone());
        msg.source = Some(source.to_owned());
        msg.task_uuid = Some(task_uuid.to_owned());
        msg
    }

    /// Acknowledge that a command sits in the local queue.
    #[must_use]
    pub fn in_queue(&self, task_uuid: &str) -> Response {
        let mut msg = Response::bare(ResponseType::InQueue, &self.uuid);
        msg.task_uuid = Some(task_uuid.to_owned());
        msg
    }

    /// Successful termination acknowledgement.
    #[must_use]
    pub fn terminate_done(
        &self,
        request_sequence_number: i64,
        source: &str,
        task_uuid: &str,
    ) -> Response {
        let mut msg = Response::bare(ResponseType::TerminateDone, &self.uuid);
        msg.request_sequence_number = Some(request_sequence_number);
        msg.source = Some(source.to_owned());
        msg.task_uuid = Some(task_uuid.to_owned());
        msg
    }

    /// Failed termination acknowledgement.
    #[must_use]
    pub fn terminate_failed(
        &self,
        request_sequence_number: i64,
        source: &str,
        task_uuid: &str,
    ) -> Response {
        let mut msg = Response::bare(ResponseType::TerminateFailed, &self.uuid);
        msg.request_sequence_number = Some(request_sequence_number);
        msg.source = Some(source.to_owned());
        msg.task_uuid = Some(task_uuid.to_owned());
        msg
    }

    /// Generic response carrying a numeric code and free-text message.
    #[must_use]
    pub fn response(
        &self,
        request_sequence_number: i64,
        code: i32,
        std_out: &str,
        std_err: &str,
        source: &str,
        task_uuid: &str,
    ) -> Response {
        let mut msg = Response::bare(ResponseType::Execute, &self.uuid);
        msg.pid = Some(NO_PID);
        msg.request_sequence_number = Some(request_sequence_number);
        msg.code = Some(code);
        msg.std_out = Some(std_out.to_owned());
        msg.std_err = Some(std_err.to_owned());
        msg.source = Some(source.to_owned());
        msg.task_uuid = Some(task_uuid.to_owned());
        msg
    }

    /// Exit notice carrying a reason code, paired with error responses or
    /// emitted when a worker finishes.
    #[must_use]
    pub fn exit(
        &self,
        pid: i64,
        request_sequence_number: i64,
        response_number: u32,
        source: &str,
        task_uuid: &str,
        exit_code: i32,
    ) -> Response {
        let mut msg = Response::bare(ResponseType::ExecuteDone, &self.uuid);
        msg.pid = Some(pid);
        msg.request_sequence_number = Some(request_sequence_number);
        msg.response_number = Some(response_number);
        msg.source = Some(source.to_owned());
        msg.task_uuid = Some(task_uuid.to_owned());
        msg.exit_code = Some(exit_code);
        msg
    }

    /// Snapshot of the accumulated watch-point list.
    #[must_use]
    pub fn watch_list(&self) -> Response {
        let mut msg = Response::bare(ResponseType::WatchList, &self.uuid);
        msg.watch_points = Some(self.watch_points.clone());
        msg
    }
}
