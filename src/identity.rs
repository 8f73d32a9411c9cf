//! Node identity bootstrap and refresh.
//!
//! The node uuid is generated once and persisted under the agent state
//! directory; mac address, hostname, and the IP set are discovered from the
//! host and refreshed before each heartbeat.

use std::fs;
use std::net::UdpSocket;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::{AppError, Result};

/// Identity fields announced to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Stable node identifier, persisted across restarts.
    pub uuid: String,
    /// MAC address of the first physical interface.
    pub mac_address: String,
    /// Current hostname.
    pub hostname: String,
    /// Hostname of the physical parent when containerized.
    pub parent_hostname: String,
    /// Environment this node is registered under.
    pub environment_id: String,
    /// Currently bound IP addresses.
    pub ips: Vec<String>,
}

impl NodeIdentity {
    /// Discover the node identity, creating and persisting the uuid on
    /// first run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Identity` when the uuid file can neither be read
    /// nor created.
    pub fn bootstrap(config: &AgentConfig) -> Result<Self> {
        let uuid = load_or_create_uuid(&config.uuid_path())?;
        let hostname = current_hostname();
        let parent_hostname = config
            .parent_hostname
            .clone()
            .unwrap_or_else(|| hostname.clone());

        Ok(Self {
            uuid,
            mac_address: discover_mac_address(),
            hostname,
            parent_hostname,
            environment_id: config.environment_id.clone(),
            ips: discover_ips(),
        })
    }

    /// Refresh the fields that change while the agent runs: hostname and
    /// the IP set. Refreshed before every heartbeat.
    pub fn refresh(&mut self) {
        self.hostname = current_hostname();
        self.ips = discover_ips();
    }
}

fn load_or_create_uuid(path: &Path) -> Result<String> {
    if let Ok(raw) = fs::read_to_string(path) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_owned());
        }
    }

    let fresh = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            AppError::Identity(format!("failed to create state directory: {err}"))
        })?;
    }
    fs::write(path, &fresh)
        .map_err(|err| AppError::Identity(format!("failed to persist node uuid: {err}")))?;
    debug!(uuid = %fresh, "generated new node uuid");
    Ok(fresh)
}

fn current_hostname() -> String {
    hostname::get().map_or_else(
        |err| {
            warn!(%err, "hostname lookup failed");
            String::new()
        },
        |name| name.to_string_lossy().into_owned(),
    )
}

/// MAC address of the first non-loopback interface, from sysfs.
fn discover_mac_address() -> String {
    let Ok(entries) = fs::read_dir("/sys/class/net") else {
        return String::new();
    };

    let mut names: Vec<PathBuf> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.file_name().is_some_and(|name| name != "lo"))
        .collect();
    names.sort();

    for iface in names {
        if let Ok(raw) = fs::read_to_string(iface.join("address")) {
            let mac = raw.trim();
            if !mac.is_empty() && mac != "00:00:00:00:00:00" {
                return mac.to_owned();
            }
        }
    }
    String::new()
}

/// Primary outbound IP, found by binding a UDP socket toward a public
/// address. No packet is sent; the socket only resolves a route.
fn discover_ips() -> Vec<String> {
    let probe = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| socket.connect("8.8.8.8:53").map(|()| socket))
        .and_then(|socket| socket.local_addr());

    match probe {
        Ok(addr) => vec![addr.ip().to_string()],
        Err(err) => {
            debug!(%err, "ip discovery probe failed, falling back to loopback");
            vec!["127.0.0.1".to_owned()]
        }
    }
}
