//! End-to-end exercise of the daemon over its HTTP surface, driven through
//! the fleetd-client library against a spawned daemon binary.

use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use fleet_common::CommandSpec;
use fleetd_client::FleetClient;
use serde_json::{json, Map, Value};
use tokio::process::{Child, Command};
use tokio::time::sleep;

static PORT_OFFSET: AtomicU16 = AtomicU16::new(0);

fn unique_port() -> u16 {
    let base = 49152 + (std::process::id() % 8000) as u16;
    base + PORT_OFFSET.fetch_add(1, Ordering::SeqCst)
}

struct Daemon {
    _child: Child,
    base_url: String,
    data_dir: tempfile::TempDir,
}

impl Daemon {
    async fn spawn() -> Self {
        let data_dir = tempfile::tempdir().expect("tempdir");
        let port = unique_port();

        let child = Command::new(env!("CARGO_BIN_EXE_fleetd"))
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            .arg("--data-dir")
            .arg(data_dir.path())
            .arg("--secret")
            .arg("test-secret")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn fleetd");

        let base_url = format!("http://127.0.0.1:{port}");

        // Wait until the daemon accepts requests
        let probe = FleetClient::new(&base_url);
        let mut ready = false;
        for _ in 0..50 {
            if probe.health().await.unwrap_or(false) {
                ready = true;
                break;
            }
            sleep(Duration::from_millis(100)).await;
        }
        assert!(ready, "daemon should accept connections");

        Self {
            _child: child,
            base_url,
            data_dir,
        }
    }
}

fn attrs(value: Value) -> Map<String, Value> {
    value.as_object().cloned().expect("object attributes")
}

#[tokio::test]
async fn register_dispatch_poll_roundtrip() {
    let daemon = Daemon::spawn().await;

    let agent = FleetClient::connect(
        &daemon.base_url,
        attrs(json!({"computer_name": "BOX1", "user": "alice"})),
    )
    .await
    .expect("register agent");

    let identifier = agent.identifier().expect("identifier").to_string();
    assert!(identifier.contains("BOX1"));
    assert!(identifier.contains("alice"));

    let operator = FleetClient::new(&daemon.base_url);
    let command_id = operator
        .dispatch(&identifier, CommandSpec::shell("whoami"))
        .await
        .expect("dispatch command");
    assert!(command_id > 0);

    let command = agent.poll().await.expect("poll").expect("one command pending");
    assert_eq!(command.kind, "shell");
    assert_eq!(command.payload, "whoami");

    // Delivered commands are gone for good
    assert!(agent.poll().await.expect("second poll").is_none());
}

#[tokio::test]
async fn dispatch_to_unknown_client_is_rejected() {
    let daemon = Daemon::spawn().await;

    let operator = FleetClient::new(&daemon.base_url);
    let err = operator
        .dispatch("GHOST_nobody_0", CommandSpec::shell("whoami"))
        .await
        .expect_err("unknown client must be rejected");
    assert!(err.to_string().contains("Client not found"));

    // The failed dispatch must not have created a queue
    let err = operator
        .dispatch("GHOST_nobody_0", CommandSpec::shell("whoami"))
        .await
        .expect_err("still unknown");
    assert!(err.to_string().contains("Client not found"));
}

#[tokio::test]
async fn data_without_identifier_is_rejected() {
    let daemon = Daemon::spawn().await;

    let response = reqwest::Client::new()
        .post(format!("{}/data", daemon.base_url))
        .json(&json!({"data": {"cpu": 40.0}}))
        .send()
        .await
        .expect("send data");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("error body");
    assert_eq!(body["error"], "Invalid client");
}

#[tokio::test]
async fn data_snapshot_is_persisted() {
    let daemon = Daemon::spawn().await;

    let agent = FleetClient::connect(
        &daemon.base_url,
        attrs(json!({"computer_name": "BOX1", "user": "alice"})),
    )
    .await
    .expect("register agent");

    agent
        .send_data(json!({"cpu": 12.5, "uptime": 4242}))
        .await
        .expect("send data");

    let identifier = agent.identifier().expect("identifier");
    let snapshots: Vec<_> = std::fs::read_dir(daemon.data_dir.path())
        .expect("read data dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(&format!("{identifier}_data_")))
        .collect();
    assert_eq!(snapshots.len(), 1);
}

#[tokio::test]
async fn screenshot_report_round_trips_with_data_uri_prefix() {
    let daemon = Daemon::spawn().await;

    let agent = FleetClient::connect(
        &daemon.base_url,
        attrs(json!({"computer_name": "BOX1", "user": "alice"})),
    )
    .await
    .expect("register agent");

    let original = b"\x89PNG\r\n\x1a\nscreenshot bytes".to_vec();
    agent
        .report_screenshot(&original)
        .await
        .expect("report screenshot");

    let identifier = agent.identifier().expect("identifier");
    let artifact_dir = daemon.data_dir.path().join("screenshots").join(identifier);
    let artifacts: Vec<_> = std::fs::read_dir(&artifact_dir)
        .expect("artifact dir exists")
        .filter_map(|entry| entry.ok())
        .collect();
    assert_eq!(artifacts.len(), 1);

    let written = std::fs::read(artifacts[0].path()).expect("read artifact");
    assert_eq!(written, original);

    // The structured report is persisted alongside the decoded artifact
    let reports: Vec<_> = std::fs::read_dir(daemon.data_dir.path())
        .expect("read data dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(&format!("{identifier}_report_")))
        .collect();
    assert_eq!(reports.len(), 1);
}

#[tokio::test]
async fn corrupt_screenshot_payload_still_accepts_the_report() {
    let daemon = Daemon::spawn().await;

    let agent = FleetClient::connect(
        &daemon.base_url,
        attrs(json!({"computer_name": "BOX1", "user": "alice"})),
    )
    .await
    .expect("register agent");

    agent
        .report("screenshot", "data:image/png;base64,@@not-base64@@")
        .await
        .expect("report must be accepted despite the corrupt payload");

    let identifier = agent.identifier().expect("identifier");
    let reports: Vec<_> = std::fs::read_dir(daemon.data_dir.path())
        .expect("read data dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(&format!("{identifier}_report_")))
        .collect();
    assert_eq!(reports.len(), 1);

    // No artifact was decoded
    let artifact_dir = daemon.data_dir.path().join("screenshots").join(identifier);
    let decoded = std::fs::read_dir(&artifact_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(decoded, 0);
}

#[tokio::test]
async fn broadcast_reaches_every_agent() {
    let daemon = Daemon::spawn().await;

    let first = FleetClient::connect(
        &daemon.base_url,
        attrs(json!({"computer_name": "BOX1", "user": "alice"})),
    )
    .await
    .expect("register first agent");
    let second = FleetClient::connect(
        &daemon.base_url,
        attrs(json!({"computer_name": "BOX2", "user": "bob"})),
    )
    .await
    .expect("register second agent");

    let operator = FleetClient::new(&daemon.base_url);
    operator
        .broadcast("maintenance at noon")
        .await
        .expect("broadcast");

    for agent in [&first, &second] {
        let command = agent.poll().await.expect("poll").expect("broadcast pending");
        assert_eq!(command.kind, "message");
        assert_eq!(command.payload, "maintenance at noon");
        assert!(agent.poll().await.expect("second poll").is_none());
    }
}

#[tokio::test]
async fn registry_snapshot_preserves_attributes() {
    let daemon = Daemon::spawn().await;

    let agent = FleetClient::connect(
        &daemon.base_url,
        attrs(json!({"computer_name": "BOX1", "user": "alice", "os": "linux"})),
    )
    .await
    .expect("register agent");
    let identifier = agent.identifier().expect("identifier");

    let operator = FleetClient::new(&daemon.base_url);
    let clients = operator.clients().await.expect("registry snapshot");

    let record = clients.get(identifier).expect("registered agent listed");
    assert_eq!(record.attributes["computer_name"], "BOX1");
    assert_eq!(record.attributes["user"], "alice");
    assert_eq!(record.attributes["os"], "linux");
    assert_eq!(record.source_address, "127.0.0.1");
    assert!(record.last_seen >= record.first_seen);
}
