//! Managed-container registry.
//!
//! Each managed container lives in a directory under the configured
//! container root: the directory name is the container name, a `uuid` file
//! inside it holds the container identifier, and `rootfs/` is its
//! filesystem. Commands addressed to a container are either forwarded into
//! its own queue file or executed inside its root via a chroot wrapper.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::queue::CommandQueue;
use crate::Result;

/// One managed container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Container identifier, as addressed by the controller.
    pub id: String,
    /// Directory name under the container root.
    pub name: String,
    /// Container filesystem root.
    pub rootfs: PathBuf,
}

/// Registry of managed containers, scanned from the container root.
#[derive(Debug, Default)]
pub struct ContainerRegistry {
    containers: HashMap<String, Container>,
}

impl ContainerRegistry {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan the container root, replacing the known set. Directories
    /// without a readable `uuid` file are skipped.
    pub fn scan(&mut self, root: &std::path::Path) {
        let Ok(entries) = fs::read_dir(root) else {
            debug!(root = %root.display(), "container root not readable, no containers");
            self.containers.clear();
            return;
        };

        let mut found = HashMap::new();
        for entry in entries.filter_map(std::result::Result::ok) {
            let dir = entry.path();
            if !dir.is_dir() {
                continue;
            }
            let Ok(raw) = fs::read_to_string(dir.join("uuid")) else {
                continue;
            };
            let id = raw.trim().to_owned();
            if id.is_empty() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            found.insert(
                id.clone(),
                Container {
                    id,
                    name,
                    rootfs: dir.join("rootfs"),
                },
            );
        }

        if found.len() != self.containers.len() {
            info!(count = found.len(), "managed container set updated");
        }
        self.containers = found;
    }

    /// Register a container directly. Used by tests and by hosts that
    /// provision containers out of band.
    pub fn insert(&mut self, container: Container) {
        self.containers.insert(container.id.clone(), container);
    }

    /// Look up a container by its identifier.
    #[must_use]
    pub fn find_by_id(&self, uuid: &str) -> Option<&Container> {
        self.containers.get(uuid)
    }

    /// Forward a raw command line into the container's own queue file, to
    /// be picked up by the agent running inside it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Queue` if the container queue cannot be written.
    pub fn forward(&self, container: &Container, raw: &str) -> Result<()> {
        let queue_dir = container
            .rootfs
            .join("etc")
            .join("fleet-agent")
            .join("command-queue.txt");
        let queue = CommandQueue::open(queue_dir)?;
        queue.append(raw)?;
        info!(container = container.name, "command forwarded to container queue");
        Ok(())
    }

    /// Wrap a program line so it executes inside the container's root.
    #[must_use]
    pub fn exec_context(&self, container: &Container, program: &str) -> String {
        if container.rootfs.is_dir() {
            format!(
                "chroot {} /bin/sh -c '{}'",
                container.rootfs.display(),
                program.replace('\'', "'\\''")
            )
        } else {
            warn!(
                container = container.name,
                "container rootfs missing, running on host"
            );
            program.to_owned()
        }
    }
}
