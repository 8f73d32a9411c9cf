//! Unit tests for the managed-container registry.

use std::fs;

use fleet_agent::containers::{Container, ContainerRegistry};

fn provision(root: &std::path::Path, name: &str, id: &str) {
    let dir = root.join(name);
    fs::create_dir_all(dir.join("rootfs")).expect("create container dirs");
    fs::write(dir.join("uuid"), id).expect("write uuid");
}

#[test]
fn scan_finds_provisioned_containers() {
    let root = tempfile::tempdir().expect("tempdir");
    provision(root.path(), "web01", "c-123");
    provision(root.path(), "db01", "c-456");
    // A directory without a uuid file is not a container.
    fs::create_dir_all(root.path().join("junk")).expect("junk dir");

    let mut registry = ContainerRegistry::new();
    registry.scan(root.path());

    let web = registry.find_by_id("c-123").expect("web01");
    assert_eq!(web.name, "web01");
    assert!(registry.find_by_id("c-456").is_some());
    assert!(registry.find_by_id("c-999").is_none());
}

#[test]
fn scan_of_missing_root_yields_empty_registry() {
    let mut registry = ContainerRegistry::new();
    registry.insert(Container {
        id: "stale".into(),
        name: "gone".into(),
        rootfs: "/nonexistent".into(),
    });
    registry.scan(std::path::Path::new("/nonexistent/container/root"));
    assert!(registry.find_by_id("stale").is_none());
}

#[test]
fn forward_appends_to_container_queue() {
    let root = tempfile::tempdir().expect("tempdir");
    provision(root.path(), "web01", "c-123");

    let mut registry = ContainerRegistry::new();
    registry.scan(root.path());
    let container = registry.find_by_id("c-123").expect("container").clone();

    registry
        .forward(&container, r#"{"type":"EXECUTE_REQUEST"}"#)
        .expect("forward");
    registry.forward(&container, "second").expect("forward");

    let queue = container
        .rootfs
        .join("etc")
        .join("fleet-agent")
        .join("command-queue.txt");
    let raw = fs::read_to_string(queue).expect("read container queue");
    assert_eq!(raw, "{\"type\":\"EXECUTE_REQUEST\"}\nsecond\n");
}

#[test]
fn exec_context_wraps_in_chroot() {
    let root = tempfile::tempdir().expect("tempdir");
    provision(root.path(), "web01", "c-123");

    let mut registry = ContainerRegistry::new();
    registry.scan(root.path());
    let container = registry.find_by_id("c-123").expect("container");

    let wrapped = registry.exec_context(container, "echo 'it works'");
    assert!(wrapped.starts_with("chroot "));
    assert!(wrapped.contains("web01/rootfs"));
    // Single quotes in the program survive the shell wrapping.
    assert!(wrapped.contains("it works"));
}

#[test]
fn exec_context_without_rootfs_runs_on_host() {
    let registry = ContainerRegistry::new();
    let container = Container {
        id: "c-1".into(),
        name: "bare".into(),
        rootfs: "/nonexistent/rootfs".into(),
    };
    assert_eq!(registry.exec_context(&container, "uptime"), "uptime");
}
