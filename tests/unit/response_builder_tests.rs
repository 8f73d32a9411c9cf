//! Unit tests for outbound message construction.

use fleet_agent::protocol::{ResponseBuilder, ResponseType, NO_PID};

fn builder_with_identity() -> ResponseBuilder {
    let mut builder = ResponseBuilder::new("node-1");
    builder.set_ips(vec!["10.0.0.5".into()]);
    builder.set_hostname("worker-07");
    builder.set_parent_hostname("rack-02");
    builder.set_mac_address("aa:bb:cc:dd:ee:ff");
    builder
}

#[test]
fn heartbeat_uses_consistent_identity_fields() {
    let builder = builder_with_identity();
    let msg = builder.heartbeat(7, "env-1", "controller", "task-3");

    assert_eq!(msg.response_type, ResponseType::Heartbeat);
    assert_eq!(msg.uuid, "node-1");
    assert_eq!(msg.request_sequence_number, Some(7));
    assert_eq!(msg.environment_id.as_deref(), Some("env-1"));
    // The mac field carries the mac, the parent field the parent hostname.
    assert_eq!(msg.mac_address.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
    assert_eq!(msg.parent_hostname.as_deref(), Some("rack-02"));
    assert_eq!(msg.hostname.as_deref(), Some("worker-07"));
    assert_eq!(msg.source.as_deref(), Some("controller"));
    assert_eq!(msg.task_uuid.as_deref(), Some("task-3"));
}

#[test]
fn clear_resets_caches_but_keeps_watch_points() {
    let mut builder = builder_with_identity();
    builder.add_watch_point("/etc/hosts");
    builder.add_watch_point("/etc/passwd");

    builder.clear();

    let heartbeat = builder.heartbeat(0, "env-1", "", "");
    assert_eq!(heartbeat.hostname.as_deref(), Some(""));
    assert_eq!(heartbeat.mac_address.as_deref(), Some(""));

    let snapshot = builder.watch_list();
    assert_eq!(
        snapshot.watch_points,
        Some(vec!["/etc/hosts".to_owned(), "/etc/passwd".to_owned()])
    );
}

#[test]
fn watch_points_deduplicate_and_remove() {
    let mut builder = ResponseBuilder::new("node-1");
    builder.add_watch_point("/a");
    builder.add_watch_point("/a");
    builder.add_watch_point("/b");
    assert_eq!(builder.watch_points(), &["/a".to_owned(), "/b".to_owned()]);

    builder.remove_watch_point("/a");
    assert_eq!(builder.watch_points(), &["/b".to_owned()]);
}

#[test]
fn terminate_acks_carry_correlation() {
    let builder = ResponseBuilder::new("node-1");

    let done = builder.terminate_done(11, "controller", "task-4");
    assert_eq!(done.response_type, ResponseType::TerminateDone);
    assert_eq!(done.request_sequence_number, Some(11));
    assert_eq!(done.task_uuid.as_deref(), Some("task-4"));

    let failed = builder.terminate_failed(11, "controller", "task-4");
    assert_eq!(failed.response_type, ResponseType::TerminateFailed);
    assert_eq!(failed.source.as_deref(), Some("controller"));
}

#[test]
fn generic_response_carries_code_and_sentinel_pid() {
    let builder = ResponseBuilder::new("node-1");
    let msg = builder.response(3, 1, "bad message", "", "controller", "task-5");

    assert_eq!(msg.response_type, ResponseType::Execute);
    assert_eq!(msg.pid, Some(NO_PID));
    assert_eq!(msg.code, Some(1));
    assert_eq!(msg.std_out.as_deref(), Some("bad message"));
}

#[test]
fn exit_notice_carries_exit_code() {
    let builder = ResponseBuilder::new("node-1");
    let msg = builder.exit(4321, 9, 3, "controller", "task-6", 0);

    assert_eq!(msg.response_type, ResponseType::ExecuteDone);
    assert_eq!(msg.pid, Some(4321));
    assert_eq!(msg.response_number, Some(3));
    assert_eq!(msg.exit_code, Some(0));
}

#[test]
fn wire_form_uses_protocol_field_names() {
    let builder = builder_with_identity();
    let wire = builder
        .heartbeat(7, "env-1", "controller", "task-3")
        .to_wire()
        .expect("serialize");
    let value: serde_json::Value = serde_json::from_str(&wire).expect("json");

    assert_eq!(value["type"], "HEARTBEAT_RESPONSE");
    assert_eq!(value["taskUuid"], "task-3");
    assert_eq!(value["requestSequenceNumber"], 7);
    assert_eq!(value["macAddress"], "aa:bb:cc:dd:ee:ff");
    assert_eq!(value["parentHostname"], "rack-02");
    assert_eq!(value["environmentId"], "env-1");
    // Fields irrelevant to the template stay off the wire.
    assert!(value.get("exitCode").is_none());
    assert!(value.get("watchPoints").is_none());
}

#[test]
fn registration_announces_identity() {
    let builder = ResponseBuilder::new("node-1");
    let msg = builder.registration(
        "aa:bb:cc:dd:ee:ff",
        "worker-07",
        "rack-02",
        "env-1",
        vec!["10.0.0.5".into()],
    );

    assert_eq!(msg.response_type, ResponseType::Registration);
    assert_eq!(msg.uuid, "node-1");
    assert_eq!(msg.ips, Some(vec!["10.0.0.5".to_owned()]));
}
