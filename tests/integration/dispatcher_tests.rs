//! Dispatcher state-machine tests against the in-memory broker.

use std::fs;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use fleet_agent::broker::Outbox;
use fleet_agent::dispatcher::Dispatcher;

use super::support::{execute_request, test_config, test_identity, MockConnection};

async fn build_dispatcher(
    root: &std::path::Path,
) -> (Dispatcher<MockConnection>, Arc<MockConnection>, CancellationToken) {
    let connection = MockConnection::new();
    let cancel = CancellationToken::new();
    let (outbox, _task) = Outbox::start(Arc::clone(&connection), cancel.clone());
    let dispatcher = Dispatcher::new(
        test_config(root),
        test_identity(),
        Arc::clone(&connection),
        outbox,
    )
    .expect("dispatcher");
    (dispatcher, connection, cancel)
}

#[tokio::test]
async fn oversize_message_yields_size_error_and_exit_pair() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    connection.push_inbound("X".repeat(10_000));
    dispatcher.iterate().await.expect("iterate");

    let responses = connection.sent_of_type("EXECUTE_RESPONSE");
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0]["code"], 1);
    assert!(responses[0]["stdOut"]
        .as_str()
        .expect("stdOut")
        .contains("maximum accepted size"));

    let exits = connection.sent_of_type("EXECUTE_RESPONSE_DONE");
    assert_eq!(exits.len(), 1, "error response is paired with an exit notice");
}

#[tokio::test]
async fn small_malformed_message_yields_json_error_and_exit_pair() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    connection.push_inbound("this is not json");
    dispatcher.iterate().await.expect("iterate");

    let responses = connection.sent_of_type("EXECUTE_RESPONSE");
    assert_eq!(responses.len(), 1);
    assert!(responses[0]["stdOut"]
        .as_str()
        .expect("stdOut")
        .contains("not a valid JSON"));
    assert_eq!(connection.sent_of_type("EXECUTE_RESPONSE_DONE").len(), 1);
}

#[tokio::test]
async fn local_execute_request_is_appended_to_queue() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    let raw = execute_request("node-under-test", "task-1", "sleep 5");
    connection.push_inbound(raw.clone());
    dispatcher.iterate().await.expect("iterate");

    let entries = dispatcher.queue().entries().expect("entries");
    assert_eq!(entries, vec![raw]);
}

#[tokio::test]
async fn container_execute_request_is_forwarded_not_queued() {
    let root = tempfile::tempdir().expect("tempdir");

    // Provision a managed container on disk before the agent sees traffic.
    let container_dir = root.path().join("containers").join("web01");
    fs::create_dir_all(container_dir.join("rootfs")).expect("container dirs");
    fs::write(container_dir.join("uuid"), "c-123").expect("container uuid");

    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    let raw = execute_request("c-123", "task-2", "uptime");
    connection.push_inbound(raw.clone());
    dispatcher.iterate().await.expect("iterate");

    assert!(
        dispatcher.queue().is_empty(),
        "container-addressed commands never enter the local queue"
    );
    let forwarded = fs::read_to_string(
        container_dir
            .join("rootfs")
            .join("etc")
            .join("fleet-agent")
            .join("command-queue.txt"),
    )
    .expect("container queue");
    assert_eq!(forwarded, format!("{raw}\n"));
}

#[tokio::test]
async fn heartbeat_request_answers_with_consistent_fields() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    connection.push_inbound(
        serde_json::json!({
            "type": "HEARTBEAT_REQUEST",
            "uuid": "node-under-test",
            "taskUuid": "task-hb",
            "source": "controller",
            "requestSequenceNumber": 5,
        })
        .to_string(),
    );
    dispatcher.iterate().await.expect("iterate");

    let beats = connection.sent_of_type("HEARTBEAT_RESPONSE");
    assert_eq!(beats.len(), 1);
    let beat = &beats[0];
    assert_eq!(beat["uuid"], "node-under-test");
    assert_eq!(beat["taskUuid"], "task-hb");
    assert_eq!(beat["requestSequenceNumber"], 5);
    // The mac field carries the mac address, never the parent hostname.
    assert_eq!(beat["macAddress"], "aa:bb:cc:dd:ee:ff");
    assert_eq!(beat["parentHostname"], "rack-test");
}

#[tokio::test]
async fn terminate_with_non_positive_pid_is_ignored() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    connection.push_inbound(
        serde_json::json!({"type": "TERMINATE_REQUEST", "pid": -4, "taskUuid": "task-t"})
            .to_string(),
    );
    dispatcher.iterate().await.expect("iterate");

    assert!(connection.sent_of_type("TERMINATE_RESPONSE_DONE").is_empty());
    assert!(connection.sent_of_type("TERMINATE_RESPONSE_FAILED").is_empty());
}

#[tokio::test]
async fn terminate_unknown_pid_yields_failure_ack() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    connection.push_inbound(
        serde_json::json!({
            "type": "TERMINATE_REQUEST",
            "pid": i32::MAX,
            "taskUuid": "task-t",
            "source": "controller",
            "requestSequenceNumber": 8,
        })
        .to_string(),
    );
    dispatcher.iterate().await.expect("iterate");

    let nacks = connection.sent_of_type("TERMINATE_RESPONSE_FAILED");
    assert_eq!(nacks.len(), 1);
    assert_eq!(nacks[0]["taskUuid"], "task-t");
    assert_eq!(nacks[0]["requestSequenceNumber"], 8);
}

#[tokio::test]
async fn terminate_running_process_yields_success_ack() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    let mut victim = std::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .expect("spawn victim");

    connection.push_inbound(
        serde_json::json!({
            "type": "TERMINATE_REQUEST",
            "pid": victim.id(),
            "taskUuid": "task-t",
            "source": "controller",
            "requestSequenceNumber": 9,
        })
        .to_string(),
    );
    dispatcher.iterate().await.expect("iterate");

    assert_eq!(connection.sent_of_type("TERMINATE_RESPONSE_DONE").len(), 1);
    let status = victim.wait().expect("victim reaped");
    assert!(!status.success(), "victim was killed, not exited");
}

#[tokio::test]
async fn watch_requests_mutate_the_snapshot() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;
    let watched = root.path().join("watched");
    fs::create_dir_all(&watched).expect("watched dir");
    let watched = watched.to_string_lossy().into_owned();

    connection.push_inbound(
        serde_json::json!({
            "type": "INOTIFY_CREATE_REQUEST",
            "watchArguments": [watched.clone()],
        })
        .to_string(),
    );
    dispatcher.iterate().await.expect("iterate");

    let snapshots = connection.sent_of_type("INOTIFY_LIST_RESPONSE");
    assert_eq!(snapshots.len(), 1);
    assert_eq!(
        snapshots[0]["watchPoints"],
        serde_json::json!([watched.clone()])
    );

    connection.push_inbound(
        serde_json::json!({
            "type": "INOTIFY_REMOVE_REQUEST",
            "watchArguments": [watched],
        })
        .to_string(),
    );
    dispatcher.iterate().await.expect("iterate");

    let snapshots = connection.sent_of_type("INOTIFY_LIST_RESPONSE");
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[1]["watchPoints"], serde_json::json!([]));
}

#[tokio::test]
async fn registration_announcement_carries_identity() {
    let root = tempfile::tempdir().expect("tempdir");
    let (dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    dispatcher.announce().expect("announce");

    let announcements = connection.sent_of_type("REGISTRATION_REQUEST");
    assert_eq!(announcements.len(), 1);
    let reg = &announcements[0];
    assert_eq!(reg["uuid"], "node-under-test");
    assert_eq!(reg["hostname"], "test-host");
    assert_eq!(reg["environmentId"], "env-test");
    assert_eq!(reg["ips"], serde_json::json!(["10.0.0.9"]));
}

#[tokio::test]
async fn poll_trouble_triggers_reconnect() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    connection.set_poll_trouble(7);
    dispatcher.iterate().await.expect("iterate");

    assert_eq!(connection.reconnect_count(), 1);
}

#[tokio::test]
async fn registration_done_is_a_no_op() {
    let root = tempfile::tempdir().expect("tempdir");
    let (mut dispatcher, connection, _cancel) = build_dispatcher(root.path()).await;

    connection.push_inbound(r#"{"type": "REGISTRATION_REQUEST_DONE"}"#);
    dispatcher.iterate().await.expect("iterate");

    assert!(connection.sent().is_empty());
    assert!(dispatcher.queue().is_empty());
}
