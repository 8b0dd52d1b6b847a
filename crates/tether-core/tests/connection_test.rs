#![allow(clippy::unwrap_used)]
// End-to-end tests for `Connection` against a mocked daemon.

use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::time::timeout;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tether_core::{
    Connection, ConnectionSettings, ConnectionUpdate, ErrorCategory, SyncStatus,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn settings_for(server: &MockServer) -> ConnectionSettings {
    ConnectionSettings {
        daemon_url: server.uri(),
        api_key: "test-key".into(),
        ..ConnectionSettings::default()
    }
}

/// Mount the full set of endpoints a fresh connection hits: config and
/// status, then the pollers, then the event long-poll. The first event
/// poll returns one `StateChanged` batch; later polls hang.
async fn mount_daemon(server: &MockServer) {
    let config = json!({
        "folders": [
            { "id": "docs", "label": "Documents", "path": "/home/me/docs" },
            { "id": "music", "label": "", "path": "/home/me/music" }
        ],
        "devices": [
            { "deviceID": "dev-1", "name": "self" },
            { "deviceID": "dev-2", "name": "laptop" }
        ]
    });
    Mock::given(method("GET"))
        .and(path("/rest/system/config"))
        .and(header("X-API-Key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&config))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/system/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "myID": "dev-1" })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/system/connections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": { "inBytesTotal": 1000, "outBytesTotal": 2000 },
            "connections": {
                "dev-2": {
                    "connected": true,
                    "address": "10.0.0.2:22000",
                    "type": "tcp-client",
                    "clientVersion": "v1.27.0"
                }
            }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/stats/folder"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "docs": {
                "lastScan": "2026-08-29T10:00:00Z",
                "lastFile": {
                    "filename": "notes.txt",
                    "at": "2026-08-29T09:00:00Z",
                    "deleted": false
                }
            }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/stats/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "dev-2": { "lastSeen": "2026-08-29T08:00:00Z" }
        })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/system/error"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "errors": null })))
        .mount(server)
        .await;

    // first poll omits `since` and gets a batch
    Mock::given(method("GET"))
        .and(path("/rest/events"))
        .and(query_param_is_missing("since"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 7,
            "time": "2026-08-29T10:00:05Z",
            "type": "StateChanged",
            "data": { "folder": "docs", "to": "scanning" }
        }])))
        .expect(1)
        .mount(server)
        .await;

    // follow-up polls resume from the batch and hang like a long poll
    Mock::given(method("GET"))
        .and(path("/rest/events"))
        .and(query_param("since", "7"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(60)),
        )
        .mount(server)
        .await;
}

/// Receive updates until `done` matches, returning everything seen.
async fn collect_until(
    rx: &mut broadcast::Receiver<ConnectionUpdate>,
    mut done: impl FnMut(&ConnectionUpdate) -> bool,
) -> Vec<ConnectionUpdate> {
    let mut seen = Vec::new();
    loop {
        let update = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for an update")
            .expect("update stream closed");
        let finished = done(&update);
        seen.push(update);
        if finished {
            return seen;
        }
    }
}

fn position_of(
    updates: &[ConnectionUpdate],
    matches: impl Fn(&ConnectionUpdate) -> bool,
) -> usize {
    updates
        .iter()
        .position(matches)
        .unwrap_or_else(|| panic!("expected update missing from {updates:?}"))
}

// ── Startup ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connect_populates_model_and_reaches_derived_status() {
    let server = MockServer::start().await;
    mount_daemon(&server).await;

    let connection = Connection::new(settings_for(&server));
    let mut updates = connection.subscribe();
    connection.connect();

    // the StateChanged batch leaves "docs" scanning, so the aggregate
    // status derived after the batch is Scanning
    let seen = collect_until(&mut updates, |u| {
        matches!(u, ConnectionUpdate::StatusChanged(SyncStatus::Scanning))
    })
    .await;

    let config_at = position_of(&seen, |u| matches!(u, ConnectionUpdate::ConfigReloaded(_)));
    let folders_at = position_of(&seen, |u| matches!(u, ConnectionUpdate::FoldersReplaced));
    let devices_at = position_of(&seen, |u| matches!(u, ConnectionUpdate::DevicesReplaced));
    assert!(config_at < folders_at && folders_at < devices_at);
    position_of(&seen, |u| {
        matches!(u, ConnectionUpdate::MyIdChanged(id) if id == "dev-1")
    });
    position_of(&seen, |u| {
        matches!(
            u,
            ConnectionUpdate::TrafficChanged { total_incoming: 1000, total_outgoing: 2000 }
        )
    });
    assert!(
        !seen
            .iter()
            .any(|u| matches!(u, ConnectionUpdate::Error { .. })),
        "startup produced errors: {seen:?}"
    );

    let mut folders_rx = connection.watch_folders();
    let folders = folders_rx
        .wait_for(|folders| folders.len() == 2)
        .await
        .unwrap()
        .clone();
    assert_eq!(folders[0].id, "docs");
    assert_eq!(folders[0].label, "Documents");
    assert_eq!(folders[1].id, "music");

    let mut devices_rx = connection.watch_devices();
    let devices = devices_rx
        .wait_for(|devices| devices.iter().any(|d| d.is_own_device()))
        .await
        .unwrap()
        .clone();
    let own = devices.iter().find(|d| d.id == "dev-1").unwrap();
    assert!(own.is_own_device());
    let peer = devices.iter().find(|d| d.id == "dev-2").unwrap();
    assert_eq!(peer.connection_address, "10.0.0.2:22000");
    assert_eq!(peer.client_version, "v1.27.0");

    let mut info_rx = connection.watch_info();
    let info = info_rx
        .wait_for(|info| info.total_incoming_traffic == 1000)
        .await
        .unwrap()
        .clone();
    assert_eq!(info.my_id, "dev-1");
    assert_eq!(info.total_outgoing_traffic, 2000);
    assert_eq!(info.last_file_name, "notes.txt");
    assert!(!info.last_file_deleted);

    assert_eq!(connection.status(), SyncStatus::Scanning);
    connection.close();
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_rescan_posts_and_acknowledges() {
    let server = MockServer::start().await;
    mount_daemon(&server).await;

    Mock::given(method("POST"))
        .and(path("/rest/db/scan"))
        .and(query_param("folder", "docs"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let connection = Connection::new(settings_for(&server));
    let mut updates = connection.subscribe();
    connection.connect();
    collect_until(&mut updates, |u| {
        matches!(u, ConnectionUpdate::StatusChanged(SyncStatus::Scanning))
    })
    .await;

    connection.rescan("docs");
    collect_until(&mut updates, |u| {
        matches!(u, ConnectionUpdate::RescanTriggered(id) if id == "docs")
    })
    .await;
    connection.close();
}

#[tokio::test]
async fn test_request_log_delivers_through_callback() {
    let server = MockServer::start().await;
    mount_daemon(&server).await;

    Mock::given(method("GET"))
        .and(path("/rest/system/log"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                { "when": "2026-08-29T10:00:00Z", "message": "daemon started" }
            ]
        })))
        .mount(&server)
        .await;

    let connection = Connection::new(settings_for(&server));
    let mut updates = connection.subscribe();
    connection.connect();
    collect_until(&mut updates, |u| {
        matches!(u, ConnectionUpdate::StatusChanged(SyncStatus::Scanning))
    })
    .await;

    let (tx, rx) = oneshot::channel();
    connection.request_log(move |entries| {
        let _ = tx.send(entries);
    });
    let entries = timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "daemon started");
    connection.close();
}

// ── Failure modes ───────────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_drops_pending_requests_without_errors() {
    let server = MockServer::start().await;

    // the configuration response arrives long after the disconnect
    Mock::given(method("GET"))
        .and(path("/rest/system/config"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "folders": [], "devices": [] }))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/system/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "myID": "dev-1" })))
        .mount(&server)
        .await;
    // a dropped config reply must leave the pollers locked
    Mock::given(method("GET"))
        .and(path("/rest/system/connections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let connection = Connection::new(settings_for(&server));
    let mut updates = connection.subscribe();
    connection.connect();

    tokio::time::sleep(Duration::from_millis(300)).await;
    connection.disconnect();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    let mut seen = Vec::new();
    loop {
        match updates.try_recv() {
            Ok(update) => seen.push(update),
            Err(TryRecvError::Empty) => break,
            Err(err) => panic!("update stream failed: {err}"),
        }
    }
    assert!(
        !seen
            .iter()
            .any(|u| matches!(u, ConnectionUpdate::Error { .. })),
        "dropped request surfaced as an error: {seen:?}"
    );
    assert_eq!(connection.status(), SyncStatus::Disconnected);
    connection.close();
}

#[tokio::test]
async fn test_client_setup_failure_arms_auto_reconnect() {
    let settings = ConnectionSettings {
        daemon_url: "not a url".into(),
        api_key: "test-key".into(),
        reconnect_interval: Duration::from_millis(100),
        ..ConnectionSettings::default()
    };
    let connection = Connection::new(settings);
    let mut updates = connection.subscribe();
    connection.connect();

    // one error per attempt; a second one means the timer fired and
    // the connection retried on its own
    for _ in 0..2 {
        collect_until(&mut updates, |u| {
            matches!(
                u,
                ConnectionUpdate::Error { category: ErrorCategory::OverallConnection, .. }
            )
        })
        .await;
    }
    connection.close();
}

#[tokio::test]
async fn test_connect_with_insufficient_settings_reports_one_error() {
    let connection = Connection::new(ConnectionSettings::default());
    let mut updates = connection.subscribe();
    connection.connect();

    let seen = collect_until(&mut updates, |u| {
        matches!(u, ConnectionUpdate::Error { .. })
    })
    .await;
    let Some(ConnectionUpdate::Error { category, .. }) = seen.last() else {
        panic!("expected an error update");
    };
    assert_eq!(*category, ErrorCategory::OverallConnection);
    assert_eq!(connection.status(), SyncStatus::Disconnected);
    connection.close();
}

#[tokio::test]
async fn test_command_before_connect_fails_as_specific_request() {
    let server = MockServer::start().await;
    let connection = Connection::new(settings_for(&server));
    let mut updates = connection.subscribe();

    connection.pause("dev-2");
    let seen = collect_until(&mut updates, |u| {
        matches!(u, ConnectionUpdate::Error { .. })
    })
    .await;
    let Some(ConnectionUpdate::Error { category, message }) = seen.last() else {
        panic!("expected an error update");
    };
    assert_eq!(*category, ErrorCategory::SpecificRequest);
    assert!(message.contains("not connected"), "message: {message}");
    connection.close();
}
