// Wire models for the daemon's REST API.
//
// Fields use `#[serde(default)]` liberally because the daemon omits
// fields freely across versions, and `#[serde(flatten)]` catch-alls
// where it sends far more than we model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ── system/config ────────────────────────────────────────────────────

/// Full daemon configuration from `system/config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub folders: Vec<FolderConfig>,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    /// Everything else the daemon sends (GUI options, versioning, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One synced folder as configured on the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub devices: Vec<FolderDeviceRef>,
    #[serde(default, rename = "readOnly")]
    pub read_only: bool,
    #[serde(default, rename = "rescanIntervalS")]
    pub rescan_interval_s: Option<i64>,
    #[serde(default, rename = "ignorePerms")]
    pub ignore_permissions: bool,
    #[serde(default, rename = "autoNormalize")]
    pub auto_normalize: bool,
    #[serde(default, rename = "minDiskFreePct")]
    pub min_disk_free_pct: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Reference to a device sharing a folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderDeviceRef {
    #[serde(default, rename = "deviceID")]
    pub device_id: String,
}

/// One peer device as configured on the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(rename = "deviceID")]
    pub device_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub compression: String,
    #[serde(default, rename = "certName")]
    pub cert_name: String,
    #[serde(default)]
    pub introducer: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── system/status ────────────────────────────────────────────────────

/// Daemon status from `system/status`. Only the own device id is
/// interesting at the moment; the rest lands in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    #[serde(default, rename = "myID")]
    pub my_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── system/connections ───────────────────────────────────────────────

/// Traffic totals and per-device connection info from
/// `system/connections`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionsReport {
    #[serde(default)]
    pub total: TrafficTotals,
    /// Keyed by device id. Absent devices have never connected.
    #[serde(default)]
    pub connections: HashMap<String, PeerConnection>,
}

/// Cumulative transfer counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficTotals {
    #[serde(default, rename = "inBytesTotal")]
    pub in_bytes_total: u64,
    #[serde(default, rename = "outBytesTotal")]
    pub out_bytes_total: u64,
}

/// Connection info for a single peer device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerConnection {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, rename = "inBytesTotal")]
    pub in_bytes_total: u64,
    #[serde(default, rename = "outBytesTotal")]
    pub out_bytes_total: u64,
    #[serde(default)]
    pub address: String,
    #[serde(default, rename = "type")]
    pub connection_type: String,
    #[serde(default, rename = "clientVersion")]
    pub client_version: String,
}

// ── stats/folder, stats/device ───────────────────────────────────────

/// Per-folder statistics from `stats/folder`, keyed by folder id.
pub type FolderStatsReport = HashMap<String, FolderStatsEntry>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FolderStatsEntry {
    #[serde(default, rename = "lastScan")]
    pub last_scan: Option<String>,
    #[serde(default, rename = "lastFile")]
    pub last_file: Option<LastFileEntry>,
}

/// Most recently synced file of a folder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LastFileEntry {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub at: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

/// Per-device statistics from `stats/device`, keyed by device id.
pub type DeviceStatsReport = HashMap<String, DeviceStatsEntry>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceStatsEntry {
    #[serde(default, rename = "lastSeen")]
    pub last_seen: Option<String>,
}

// ── system/error ─────────────────────────────────────────────────────

/// Envelope of `system/error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorReport {
    #[serde(default)]
    pub errors: Option<Vec<DaemonError>>,
}

/// One outstanding daemon error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonError {
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub message: String,
}

// ── events ───────────────────────────────────────────────────────────

/// One entry of the daemon's event stream.
///
/// `data` stays untyped: the shape varies per event type and the
/// consumer dispatches on `event_type` before digging in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: u64,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

// ── system/log ───────────────────────────────────────────────────────

/// Envelope of `system/log`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogReport {
    #[serde(default)]
    pub messages: Vec<LogEntry>,
}

/// One daemon log line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub when: String,
    #[serde(default)]
    pub message: String,
}
