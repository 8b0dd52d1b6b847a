#![allow(clippy::unwrap_used)]
// Integration tests for `RestClient` using wiremock.

use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tether_api::{Error, RestClient};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, RestClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = RestClient::with_client(reqwest::Client::new(), base_url, "test-key");
    (server, client)
}

// ── Config ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_config_parses_folders_and_devices() {
    let (server, client) = setup().await;

    let body = json!({
        "folders": [{
            "id": "docs",
            "label": "Documents",
            "path": "/home/me/docs",
            "readOnly": true,
            "rescanIntervalS": 60,
            "ignorePerms": false,
            "autoNormalize": true,
            "minDiskFreePct": 1.0,
            "devices": [
                { "deviceID": "dev-a" },
                { "deviceID": "dev-b" }
            ]
        }],
        "devices": [{
            "deviceID": "dev-a",
            "name": "laptop",
            "addresses": ["dynamic"],
            "compression": "metadata",
            "certName": "",
            "introducer": true
        }],
        "version": 15
    });

    Mock::given(method("GET"))
        .and(path("/rest/system/config"))
        .and(header("X-API-Key", "test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let config = client.config().await.unwrap();

    assert_eq!(config.folders.len(), 1);
    let folder = &config.folders[0];
    assert_eq!(folder.id, "docs");
    assert_eq!(folder.label, "Documents");
    assert!(folder.read_only);
    assert_eq!(folder.rescan_interval_s, Some(60));
    assert_eq!(folder.devices.len(), 2);
    assert_eq!(folder.devices[1].device_id, "dev-b");

    assert_eq!(config.devices.len(), 1);
    assert_eq!(config.devices[0].device_id, "dev-a");
    assert_eq!(config.devices[0].name, "laptop");
    assert!(config.devices[0].introducer);
    assert!(config.extra.contains_key("version"));
}

#[tokio::test]
async fn test_config_parse_failure_keeps_body() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/system/config"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .mount(&server)
        .await;

    let result = client.config().await;
    match result {
        Err(Error::Deserialization { body, .. }) => assert_eq!(body, "not json at all"),
        other => panic!("expected Deserialization error, got: {other:?}"),
    }
}

// ── Status & connections ────────────────────────────────────────────

#[tokio::test]
async fn test_status_returns_own_device_id() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/system/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "myID": "OWN-DEVICE",
            "uptime": 1234
        })))
        .mount(&server)
        .await;

    let status = client.status().await.unwrap();
    assert_eq!(status.my_id, "OWN-DEVICE");
}

#[tokio::test]
async fn test_connections_parses_totals_and_peers() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/system/connections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": { "inBytesTotal": 1000, "outBytesTotal": 2000 },
            "connections": {
                "dev-a": {
                    "connected": true,
                    "paused": false,
                    "inBytesTotal": 10,
                    "outBytesTotal": 20,
                    "address": "192.168.1.5:22000",
                    "type": "tcp-client",
                    "clientVersion": "v1.27.0"
                }
            }
        })))
        .mount(&server)
        .await;

    let report = client.connections().await.unwrap();
    assert_eq!(report.total.in_bytes_total, 1000);
    assert_eq!(report.total.out_bytes_total, 2000);
    let peer = report.connections.get("dev-a").unwrap();
    assert!(peer.connected);
    assert_eq!(peer.address, "192.168.1.5:22000");
    assert_eq!(peer.client_version, "v1.27.0");
}

// ── Events ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_events_passes_since_parameter() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/events"))
        .and(query_param("since", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 43, "time": "2024-06-15T10:30:00Z", "type": "StateChanged",
              "data": { "folder": "docs", "to": "scanning" } }
        ])))
        .mount(&server)
        .await;

    let events = client.events(42).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, 43);
    assert_eq!(events[0].event_type, "StateChanged");
    assert_eq!(events[0].data["folder"], "docs");
}

#[tokio::test]
async fn test_events_omits_since_when_zero() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/events"))
        .and(query_param_is_missing("since"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let events = client.events(0).await.unwrap();
    assert!(events.is_empty());
}

// ── Stats & errors ──────────────────────────────────────────────────

#[tokio::test]
async fn test_folder_stats() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/stats/folder"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "docs": {
                "lastScan": "2024-06-15T09:00:00Z",
                "lastFile": {
                    "filename": "notes.txt",
                    "at": "2024-06-15T08:59:00Z",
                    "deleted": false
                }
            }
        })))
        .mount(&server)
        .await;

    let stats = client.folder_stats().await.unwrap();
    let entry = stats.get("docs").unwrap();
    assert_eq!(entry.last_scan.as_deref(), Some("2024-06-15T09:00:00Z"));
    assert_eq!(entry.last_file.as_ref().unwrap().filename, "notes.txt");
}

#[tokio::test]
async fn test_errors_envelope_with_null_errors() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/system/error"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "errors": null })))
        .mount(&server)
        .await;

    let report = client.errors().await.unwrap();
    assert!(report.errors.is_none());
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_pause_posts_device_query() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rest/system/pause"))
        .and(query_param("device", "dev-a"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client.pause("dev-a").await.unwrap();
}

#[tokio::test]
async fn test_rescan_posts_folder_query() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rest/db/scan"))
        .and(query_param("folder", "docs"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client.rescan("docs").await.unwrap();
}

#[tokio::test]
async fn test_restart_failure_is_transport_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/rest/system/restart"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = client.restart().await;
    assert!(matches!(result, Err(Error::Transport(_))));
}

// ── Log & QR ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_log_unwraps_messages() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/system/log"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                { "when": "2024-06-15T10:00:00Z", "message": "hello" },
                { "when": "2024-06-15T10:00:01Z", "message": "world" }
            ]
        })))
        .mount(&server)
        .await;

    let log = client.log().await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].message, "world");
}

#[tokio::test]
async fn test_qr_code_uses_raw_path() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/qr/"))
        .and(query_param("text", "OWN-DEVICE"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PNGDATA".to_vec()))
        .mount(&server)
        .await;

    let bytes = client.qr_code("OWN-DEVICE").await.unwrap();
    assert_eq!(bytes, b"PNGDATA");
}
