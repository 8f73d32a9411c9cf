//! Shared test doubles and fixtures for the integration suite.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleet_agent::broker::Connection;
use fleet_agent::config::AgentConfig;
use fleet_agent::identity::NodeIdentity;
use fleet_agent::{AppError, Result};

/// In-memory broker connection: inbound messages are pushed by the test,
/// published messages are captured for assertions.
#[derive(Default)]
pub struct MockConnection {
    inbound: Mutex<VecDeque<String>>,
    sent: Mutex<Vec<String>>,
    rc: AtomicI32,
    fail_publish: AtomicBool,
    reconnects: AtomicI32,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_inbound(&self, raw: impl Into<String>) {
        self.inbound.lock().expect("inbound lock").push_back(raw.into());
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().expect("sent lock").clone()
    }

    /// Published messages of one wire type, parsed as JSON values.
    pub fn sent_of_type(&self, tag: &str) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .filter_map(|raw| serde_json::from_str::<serde_json::Value>(raw).ok())
            .filter(|value| value["type"] == tag)
            .collect()
    }

    /// Make every subsequent poll report connection trouble.
    pub fn set_poll_trouble(&self, rc: i32) {
        self.rc.store(rc, Ordering::SeqCst);
    }

    /// Make every subsequent publish fail.
    pub fn fail_publishes(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn reconnect_count(&self) -> i32 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

impl Connection for MockConnection {
    fn open_session(&self) -> Result<bool> {
        Ok(true)
    }

    fn reconnect(&self) -> Result<()> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        self.rc.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn drive(&self, _timeout: Duration) -> i32 {
        self.rc.load(Ordering::SeqCst)
    }

    fn try_recv(&self) -> Option<String> {
        self.inbound.lock().expect("inbound lock").pop_front()
    }

    fn publish(&self, payload: &str) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(AppError::Broker("mock publish failure".into()));
        }
        self.sent.lock().expect("sent lock").push(payload.to_owned());
        Ok(())
    }
}

/// Agent configuration rooted in a temp directory, with both periodic
/// timers disabled so tests drive every effect explicitly.
pub fn test_config(root: &Path) -> AgentConfig {
    let raw = format!(
        r#"
state_dir = "{state}"
log_dir = "{log}"
environment_id = "env-test"
parent_hostname = "rack-test"
max_workers = 2
container_root = "{containers}"

[broker]
url = "broker.test"
poll_interval_ms = 1

[timers]
heartbeat_seconds = 0
queue_announce_seconds = 0
"#,
        state = root.join("state").display(),
        log = root.display(),
        containers = root.join("containers").display(),
    );
    AgentConfig::from_toml_str(&raw).expect("test config")
}

/// Fixed node identity so assertions can pin exact field values.
pub fn test_identity() -> NodeIdentity {
    NodeIdentity {
        uuid: "node-under-test".into(),
        mac_address: "aa:bb:cc:dd:ee:ff".into(),
        hostname: "test-host".into(),
        parent_hostname: "rack-test".into(),
        environment_id: "env-test".into(),
        ips: vec!["10.0.0.9".into()],
    }
}

/// Serialized `EXECUTE_REQUEST` wire message.
pub fn execute_request(uuid: &str, task_uuid: &str, program: &str) -> String {
    serde_json::json!({
        "type": "EXECUTE_REQUEST",
        "uuid": uuid,
        "taskUuid": task_uuid,
        "source": "controller",
        "requestSequenceNumber": 1,
        "program": program,
        "workingDirectory": "/",
    })
    .to_string()
}
