// Protocol state machine.
//
// `DaemonState` holds the entire mirrored model and implements every
// response/event handler as a pure transition: handlers mutate the
// model and queue side effects (updates to broadcast, requests to
// issue, timer changes) which the connection actor drains after each
// call. No IO happens here, which is what makes the reconciliation
// and status-derivation rules unit-testable without a daemon.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use tether_api::models::{
    ConnectionsReport, DeviceStatsReport, ErrorReport, FolderStatsReport, RawEvent, SystemConfig,
    SystemStatus,
};

use crate::connection::ConnectionInfo;
use crate::model::{Device, DeviceStatus, Folder, FolderError, FolderStatus};
use crate::model::{ItemDownloadProgress, parse_timestamp};
use crate::settings::ConnectionSettings;
use crate::update::{ConnectionUpdate, ErrorCategory, Notification, SyncStatus};

/// The daemon exposes no change events for its error list, so it is
/// polled on a fixed interval.
const ERROR_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// A request the state machine wants issued against the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PollRequest {
    Config,
    Status,
    Connections { delay: Duration },
    FolderStats { delay: Duration },
    DeviceStats { delay: Duration },
    Errors { delay: Duration },
    Events { since: u64 },
}

impl PollRequest {
    /// Human-readable name of the fetched resource, used in error
    /// notifications.
    fn describe(&self) -> &'static str {
        match self {
            Self::Config => "daemon configuration",
            Self::Status => "daemon status",
            Self::Connections { .. } => "connections",
            Self::FolderStats { .. } => "folder statistics",
            Self::DeviceStats { .. } => "device statistics",
            Self::Errors { .. } => "daemon errors",
            Self::Events { .. } => "daemon events",
        }
    }
}

/// Side effects queued by state transitions, drained by the actor.
#[derive(Debug, Default)]
pub(crate) struct Effects {
    /// Updates to broadcast, in emission order.
    pub updates: Vec<ConnectionUpdate>,
    /// Requests to issue (possibly delayed).
    pub requests: Vec<PollRequest>,
    /// Drop every in-flight request before issuing new ones.
    pub abort_requests: bool,
    /// Start the auto-reconnect timer.
    pub arm_reconnect: bool,
    /// Stop the auto-reconnect timer.
    pub disarm_reconnect: bool,
}

impl Effects {
    fn is_empty(&self) -> bool {
        self.updates.is_empty()
            && self.requests.is_empty()
            && !self.abort_requests
            && !self.arm_reconnect
            && !self.disarm_reconnect
    }
}

/// The mirrored daemon state plus the connection lifecycle flags.
#[derive(Debug, Default)]
pub(crate) struct DaemonState {
    settings: ConnectionSettings,

    status: SyncStatus,
    keep_polling: bool,
    has_config: bool,
    has_status: bool,
    reconnect_tries: u32,

    last_event_id: u64,
    config_dir: String,
    my_id: String,

    total_incoming_traffic: u64,
    total_outgoing_traffic: u64,
    total_incoming_rate: f64,
    total_outgoing_rate: f64,
    last_connections_update: Option<DateTime<Utc>>,

    // most recently synced file across all folders
    last_file_name: String,
    last_file_time: Option<DateTime<Utc>>,
    last_file_deleted: bool,

    // watermark below which daemon errors predate this connection
    last_error_time: Option<DateTime<Utc>>,
    unread_notifications: bool,

    folders: Vec<Folder>,
    devices: Vec<Device>,

    /// Folders observed synchronizing since the aggregate status last
    /// left `Synchronizing`.
    synced_folders: Vec<String>,
    /// Folders whose synchronization just finished.
    completed_folders: Vec<String>,

    effects: Effects,
}

impl DaemonState {
    pub(crate) fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub(crate) fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub(crate) fn status(&self) -> SyncStatus {
        self.status
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    pub(crate) fn folders(&self) -> &[Folder] {
        &self.folders
    }

    pub(crate) fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub(crate) fn folder_ids(&self) -> Vec<String> {
        self.folders.iter().map(|f| f.id.clone()).collect()
    }

    pub(crate) fn device_ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.id.clone()).collect()
    }

    pub(crate) fn config_dir(&self) -> &str {
        &self.config_dir
    }

    pub(crate) fn reconnect_tries(&self) -> u32 {
        self.reconnect_tries
    }

    /// Incoming and outgoing transfer rate in kbit/s, derived from the
    /// last two connections samples.
    pub(crate) fn transfer_rates(&self) -> (f64, f64) {
        (self.total_incoming_rate, self.total_outgoing_rate)
    }

    pub(crate) fn has_unread_notifications(&self) -> bool {
        self.unread_notifications
    }

    pub(crate) fn mark_notifications_read(&mut self) {
        self.unread_notifications = false;
    }

    /// Snapshot of the connection-level counters and identity.
    pub(crate) fn info(&self) -> ConnectionInfo {
        let (incoming_rate, outgoing_rate) = self.transfer_rates();
        ConnectionInfo {
            my_id: self.my_id.clone(),
            config_dir: self.config_dir.clone(),
            total_incoming_traffic: self.total_incoming_traffic,
            total_outgoing_traffic: self.total_outgoing_traffic,
            incoming_rate,
            outgoing_rate,
            last_file_name: self.last_file_name.clone(),
            last_file_time: self.last_file_time,
            last_file_deleted: self.last_file_deleted,
            unread_notifications: self.has_unread_notifications(),
            reconnect_tries: self.reconnect_tries(),
        }
    }

    /// Queued side effects since the last drain.
    pub(crate) fn take_effects(&mut self) -> Effects {
        std::mem::take(&mut self.effects)
    }

    pub(crate) fn has_effects(&self) -> bool {
        !self.effects.is_empty()
    }

    // ── Lifecycle commands ───────────────────────────────────────────

    /// Start connecting. Does nothing when already connected.
    pub(crate) fn connect(&mut self) {
        self.effects.disarm_reconnect = true;
        self.reconnect_tries = 0;
        if self.is_connected() {
            return;
        }
        self.has_config = false;
        self.has_status = false;
        if !self.settings.is_sufficient() {
            self.push_error(
                "connection configuration is insufficient".to_owned(),
                ErrorCategory::OverallConnection,
            );
            return;
        }
        self.request(PollRequest::Config);
        self.request(PollRequest::Status);
        self.keep_polling = true;
    }

    /// Apply `settings` and reconnect when a transport-relevant field
    /// changed; otherwise the new values take effect on the next poll.
    pub(crate) fn connect_with(&mut self, settings: ConnectionSettings) {
        if self.settings.apply(settings) {
            self.reconnect();
        }
    }

    /// Stop polling and drop all in-flight requests.
    pub(crate) fn disconnect(&mut self) {
        self.has_config = false;
        self.has_status = false;
        self.keep_polling = false;
        self.reconnect_tries = 0;
        self.effects.disarm_reconnect = true;
        self.effects.abort_requests = true;
        self.set_status(SyncStatus::Disconnected);
    }

    /// Tear down the current connection (if any) and establish a new
    /// one from scratch with freshly fetched configuration.
    pub(crate) fn reconnect(&mut self) {
        self.effects.disarm_reconnect = true;
        self.reconnect_tries = 0;
        if self.is_connected() {
            self.has_config = false;
            self.has_status = false;
            self.effects.abort_requests = true;
        }
        self.continue_reconnecting();
    }

    pub(crate) fn reconnect_with(&mut self, settings: ConnectionSettings) {
        self.settings.apply(settings);
        self.reconnect();
    }

    /// Timer-driven reconnect attempt; keeps counting tries across the
    /// `connect()` call which resets the counter.
    pub(crate) fn auto_reconnect(&mut self) {
        let tries = self.reconnect_tries;
        self.connect();
        self.reconnect_tries = tries + 1;
        debug!(tries = self.reconnect_tries, "automatic reconnect");
    }

    /// Enter the terminal state; every later transition is suppressed.
    pub(crate) fn destroy(&mut self) {
        self.status = SyncStatus::BeingDestroyed;
        self.keep_polling = false;
        self.effects.abort_requests = true;
        self.effects.disarm_reconnect = true;
    }

    fn continue_reconnecting(&mut self) {
        self.push_update(ConnectionUpdate::ConfigInvalidated);
        self.set_status(SyncStatus::Reconnecting);
        self.keep_polling = true;
        self.last_event_id = 0;
        self.config_dir.clear();
        self.my_id.clear();
        self.total_incoming_traffic = 0;
        self.total_outgoing_traffic = 0;
        self.total_incoming_rate = 0.0;
        self.total_outgoing_rate = 0.0;
        self.last_connections_update = None;
        self.last_file_name.clear();
        self.last_file_time = None;
        self.last_file_deleted = false;
        self.last_error_time = None;
        self.unread_notifications = false;
        self.has_config = false;
        self.has_status = false;
        self.folders.clear();
        self.devices.clear();
        self.synced_folders.clear();
        self.completed_folders.clear();
        if !self.settings.is_sufficient() {
            self.push_error(
                "connection configuration is insufficient".to_owned(),
                ErrorCategory::OverallConnection,
            );
            return;
        }
        self.request(PollRequest::Config);
        self.request(PollRequest::Status);
    }

    /// Once both configuration and status have been fetched, unlock
    /// the remaining pollers and start consuming events.
    fn continue_connecting(&mut self) {
        if !self.keep_polling || !self.has_config || !self.has_status {
            return;
        }
        self.request(PollRequest::Connections {
            delay: Duration::ZERO,
        });
        self.request(PollRequest::FolderStats {
            delay: Duration::ZERO,
        });
        self.request(PollRequest::DeviceStats {
            delay: Duration::ZERO,
        });
        self.request(PollRequest::Errors {
            delay: Duration::ZERO,
        });
        self.last_event_id = 0;
        self.request(PollRequest::Events { since: 0 });
    }

    // ── Response handlers ────────────────────────────────────────────

    /// Reconcile a freshly fetched configuration against the existing
    /// entity collections. Matching entries are recycled by id so
    /// runtime-only fields (status, errors, counters) survive; static
    /// fields are overwritten from the payload.
    pub(crate) fn apply_config(&mut self, config: SystemConfig) {
        let config = Arc::new(config);

        let mut old_folders = std::mem::take(&mut self.folders);
        for folder_config in &config.folders {
            if folder_config.id.is_empty() {
                continue;
            }
            let mut folder = match old_folders.iter().position(|f| f.id == folder_config.id) {
                Some(index) => old_folders.swap_remove(index),
                None => Folder::new(folder_config.id.clone()),
            };
            folder.label = folder_config.label.clone();
            folder.path = folder_config.path.clone();
            folder.devices = folder_config
                .devices
                .iter()
                .map(|device| device.device_id.clone())
                .filter(|id| !id.is_empty())
                .collect();
            folder.read_only = folder_config.read_only;
            folder.rescan_interval_s = folder_config.rescan_interval_s;
            folder.ignore_permissions = folder_config.ignore_permissions;
            folder.auto_normalize = folder_config.auto_normalize;
            folder.min_disk_free_pct = folder_config.min_disk_free_pct;
            self.folders.push(folder);
        }

        let mut old_devices = std::mem::take(&mut self.devices);
        for device_config in &config.devices {
            if device_config.device_id.is_empty() {
                continue;
            }
            let mut device = match old_devices
                .iter()
                .position(|d| d.id == device_config.device_id)
            {
                Some(index) => old_devices.swap_remove(index),
                None => Device::new(device_config.device_id.clone()),
            };
            device.name = device_config.name.clone();
            device.addresses = device_config.addresses.clone();
            device.compression = device_config.compression.clone();
            device.cert_name = device_config.cert_name.clone();
            device.introducer = device_config.introducer;
            if !self.my_id.is_empty() && device.id == self.my_id {
                device.status = DeviceStatus::OwnDevice;
            }
            self.devices.push(device);
        }

        debug!(
            folders = self.folders.len(),
            devices = self.devices.len(),
            "configuration applied"
        );
        self.push_update(ConnectionUpdate::ConfigReloaded(config));
        self.push_update(ConnectionUpdate::FoldersReplaced);
        self.push_update(ConnectionUpdate::DevicesReplaced);
        self.has_config = true;
        if !self.is_connected() {
            self.continue_connecting();
        }
    }

    pub(crate) fn apply_status(&mut self, status: SystemStatus) {
        if status.my_id != self.my_id {
            self.my_id = status.my_id;
            self.push_update(ConnectionUpdate::MyIdChanged(self.my_id.clone()));
            if let Some(index) = self.devices.iter().position(|d| d.id == self.my_id) {
                self.devices[index].status = DeviceStatus::OwnDevice;
                let id = self.devices[index].id.clone();
                self.push_update(ConnectionUpdate::DeviceStatusChanged { id, index });
            }
        }
        self.has_status = true;
        self.continue_connecting();
    }

    /// Apply a connections sample taken at `now`, updating traffic
    /// totals, transfer rates, and per-device connection info.
    pub(crate) fn apply_connections(&mut self, report: ConnectionsReport, now: DateTime<Utc>) {
        let total_incoming = report.total.in_bytes_total;
        let total_outgoing = report.total.out_bytes_total;

        #[allow(clippy::cast_precision_loss)]
        let elapsed = self
            .last_connections_update
            .map_or(0.0, |previous| (now - previous).num_milliseconds() as f64 / 1000.0);
        if elapsed > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            {
                self.total_incoming_rate =
                    (total_incoming as f64 - self.total_incoming_traffic as f64) * 0.008 / elapsed;
                self.total_outgoing_rate =
                    (total_outgoing as f64 - self.total_outgoing_traffic as f64) * 0.008 / elapsed;
            }
        } else {
            self.total_incoming_rate = 0.0;
            self.total_outgoing_rate = 0.0;
        }
        self.total_incoming_traffic = total_incoming;
        self.total_outgoing_traffic = total_outgoing;
        self.push_update(ConnectionUpdate::TrafficChanged {
            total_incoming,
            total_outgoing,
        });

        let mut changed = Vec::new();
        for (index, device) in self.devices.iter_mut().enumerate() {
            let Some(peer) = report.connections.get(&device.id) else {
                continue;
            };
            match device.status {
                DeviceStatus::OwnDevice => {}
                DeviceStatus::Disconnected | DeviceStatus::Unknown => {
                    device.status = if peer.connected {
                        DeviceStatus::Idle
                    } else {
                        DeviceStatus::Disconnected
                    };
                }
                _ => {
                    if !peer.connected {
                        device.status = DeviceStatus::Disconnected;
                    }
                }
            }
            device.paused = peer.paused;
            device.total_incoming_traffic = peer.in_bytes_total;
            device.total_outgoing_traffic = peer.out_bytes_total;
            device.connection_address = peer.address.clone();
            device.connection_type = peer.connection_type.clone();
            device.client_version = peer.client_version.clone();
            changed.push((device.id.clone(), index));
        }
        for (id, index) in changed {
            self.push_update(ConnectionUpdate::DeviceStatusChanged { id, index });
        }

        self.last_connections_update = Some(now);
        if self.keep_polling {
            self.request(PollRequest::Connections {
                delay: self.settings.traffic_poll_interval,
            });
        }
    }

    pub(crate) fn apply_folder_stats(&mut self, report: FolderStatsReport) {
        let mut changed = Vec::new();
        for (index, folder) in self.folders.iter_mut().enumerate() {
            let Some(entry) = report.get(&folder.id) else {
                continue;
            };
            let mut modified = false;
            folder.last_scan_time = parse_timestamp(entry.last_scan.as_deref());
            if folder.last_scan_time.is_some() {
                modified = true;
            }
            if let Some(last_file) = &entry.last_file {
                folder.last_file_name = last_file.filename.clone();
                modified = true;
                if !folder.last_file_name.is_empty() {
                    folder.last_file_deleted = last_file.deleted;
                    folder.last_file_time = parse_timestamp(last_file.at.as_deref());
                    if folder.last_file_time > self.last_file_time {
                        self.last_file_time = folder.last_file_time;
                        self.last_file_name = folder.last_file_name.clone();
                        self.last_file_deleted = folder.last_file_deleted;
                    }
                }
            }
            if modified {
                changed.push((folder.id.clone(), index));
            }
        }
        for (id, index) in changed {
            self.push_update(ConnectionUpdate::FolderStatusChanged { id, index });
        }
        if self.keep_polling {
            self.request(PollRequest::FolderStats {
                delay: self.settings.device_stats_poll_interval,
            });
        }
    }

    pub(crate) fn apply_device_stats(&mut self, report: DeviceStatsReport) {
        let mut changed = Vec::new();
        for (index, device) in self.devices.iter_mut().enumerate() {
            let Some(entry) = report.get(&device.id) else {
                continue;
            };
            device.last_seen = parse_timestamp(entry.last_seen.as_deref());
            if device.last_seen.is_some() {
                changed.push((device.id.clone(), index));
            }
        }
        for (id, index) in changed {
            self.push_update(ConnectionUpdate::DeviceStatusChanged { id, index });
        }
        if self.keep_polling {
            self.request(PollRequest::DeviceStats {
                delay: self.settings.device_stats_poll_interval,
            });
        }
    }

    /// Apply the outstanding daemon errors. Errors older than the
    /// watermark (initialized to `now` on the first poll) predate this
    /// connection and are dropped silently.
    pub(crate) fn apply_errors(&mut self, report: ErrorReport, now: DateTime<Utc>) {
        if self.last_error_time.is_none() {
            self.last_error_time = Some(now);
        }
        for error in report.errors.unwrap_or_default() {
            let Some(when) = parse_timestamp(error.when.as_deref()) else {
                continue;
            };
            if Some(when) > self.last_error_time {
                self.last_error_time = Some(when);
                self.emit_notification(Some(when), error.message);
            }
        }
        if self.keep_polling {
            self.request(PollRequest::Errors {
                delay: ERROR_POLL_INTERVAL,
            });
        }
    }

    // ── Event stream ─────────────────────────────────────────────────

    /// Process one long-poll batch, then re-arm the poll (or finalize
    /// a disconnect when polling has been stopped meanwhile).
    pub(crate) fn apply_events(&mut self, events: Vec<RawEvent>) {
        let events = Arc::new(events);
        self.push_update(ConnectionUpdate::NewEvents(Arc::clone(&events)));
        for event in events.iter() {
            self.last_event_id = self.last_event_id.max(event.id);
            let time = parse_timestamp(event.time.as_deref());
            match event.event_type.as_str() {
                "Starting" => self.handle_starting(&event.data),
                "StateChanged" => self.handle_state_changed(time, &event.data),
                "DownloadProgress" => self.handle_download_progress(&event.data),
                "ItemStarted" => {}
                "ItemFinished" => self.handle_item_finished(time, &event.data),
                // treat the cached configuration as stale
                "ConfigSaved" => self.request(PollRequest::Config),
                other if other.starts_with("Folder") => {
                    self.handle_folder_event(time, other, &event.data);
                }
                other if other.starts_with("Device") => {
                    self.handle_device_event(other, &event.data);
                }
                _ => {}
            }
        }
        if self.keep_polling {
            self.request(PollRequest::Events {
                since: self.last_event_id,
            });
            self.set_status(SyncStatus::Idle);
        } else {
            self.set_status(SyncStatus::Disconnected);
        }
    }

    fn handle_starting(&mut self, data: &Value) {
        let home = data.get("home").and_then(Value::as_str).unwrap_or_default();
        if home != self.config_dir {
            self.config_dir = home.to_owned();
            self.push_update(ConnectionUpdate::ConfigDirChanged(self.config_dir.clone()));
        }
        let my_id = data.get("myID").and_then(Value::as_str).unwrap_or_default();
        if my_id != self.my_id {
            self.my_id = my_id.to_owned();
            self.push_update(ConnectionUpdate::MyIdChanged(self.my_id.clone()));
        }
    }

    fn handle_state_changed(&mut self, time: Option<DateTime<Utc>>, data: &Value) {
        let Some(folder_id) = data
            .get("folder")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            return;
        };
        let status = FolderStatus::from_daemon_string(
            data.get("to").and_then(Value::as_str).unwrap_or_default(),
        );
        if let Some(index) = self.folders.iter().position(|f| f.id == folder_id) {
            if self.folders[index].assign_status(status, time) {
                self.push_update(ConnectionUpdate::FolderStatusChanged {
                    id: folder_id.to_owned(),
                    index,
                });
            }
        } else {
            // speculative entry; the refetched config backfills it
            let mut folder = Folder::new(folder_id);
            folder.assign_status(status, time);
            self.folders.push(folder);
            self.request(PollRequest::Config);
        }
    }

    /// Rebuild every folder's in-flight item list from the payload. A
    /// folder disappearing from the payload means its downloads have
    /// finished, so all lists are wiped first.
    fn handle_download_progress(&mut self, data: &Value) {
        for folder in &mut self.folders {
            folder.downloading_items.clear();
            folder.blocks_downloaded = 0;
            folder.blocks_to_download = 0;
            if let Some(items) = data.get(folder.id.as_str()).and_then(Value::as_object) {
                folder.downloading_items.reserve(items.len());
                for (file_name, progress) in items {
                    let item = ItemDownloadProgress::from_event(&folder.path, file_name, progress);
                    folder.blocks_downloaded += item.blocks_downloaded;
                    folder.blocks_to_download += item.blocks_total;
                    folder.downloading_items.push(item);
                }
            }
            folder.recompute_download_aggregate();
        }
        self.push_update(ConnectionUpdate::DownloadProgressChanged);
    }

    fn handle_folder_event(&mut self, time: Option<DateTime<Utc>>, event_type: &str, data: &Value) {
        let Some(folder_id) = data
            .get("folder")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            return;
        };
        let Some(index) = self.folders.iter().position(|f| f.id == folder_id) else {
            return;
        };
        match event_type {
            "FolderErrors" => self.handle_folder_errors(time, index, data),
            "FolderSummary" => {
                let Some(summary) = data.get("summary") else {
                    return;
                };
                let field = |name: &str| summary.get(name).and_then(Value::as_u64).unwrap_or(0);
                let folder = &mut self.folders[index];
                folder.global_files = field("globalFiles");
                folder.global_deleted = field("globalDeleted");
                folder.global_bytes = field("globalBytes");
                folder.local_files = field("localFiles");
                folder.local_deleted = field("localDeleted");
                folder.local_bytes = field("localBytes");
                folder.needed_files = field("needFiles");
                folder.needed_bytes = field("needBytes");
                // the summary's own state string is deliberately not
                // applied; status is only ever derived from
                // StateChanged and scan-progress events
                self.push_update(ConnectionUpdate::FolderStatusChanged {
                    id: folder_id.to_owned(),
                    index,
                });
            }
            "FolderCompletion" => {
                // the daemon reports one percentage per remote device;
                // keep the smallest as the folder's overall progress
                let percentage = data
                    .get("completion")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                if percentage > 0.0 && percentage < 100.0 {
                    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                    let percentage = percentage as u8;
                    let folder = &mut self.folders[index];
                    if folder.progress_percentage == 0 || percentage < folder.progress_percentage {
                        folder.progress_percentage = percentage;
                    }
                }
            }
            "FolderScanProgress" => {
                let field = |name: &str| data.get(name).and_then(Value::as_u64).unwrap_or(0);
                let (current, total, rate) = (field("current"), field("total"), field("rate"));
                if current > 0 && total > 0 {
                    let folder = &mut self.folders[index];
                    folder.progress_percentage =
                        u8::try_from(current * 100 / total).unwrap_or(100).min(100);
                    folder.progress_rate = rate;
                    folder.assign_status(FolderStatus::Scanning, time);
                    self.push_update(ConnectionUpdate::FolderStatusChanged {
                        id: folder_id.to_owned(),
                        index,
                    });
                }
            }
            _ => {}
        }
    }

    /// Merge freshly reported folder errors, deduplicating against the
    /// current list and notifying only for errors that were not part of
    /// the previous out-of-sync episode.
    fn handle_folder_errors(&mut self, time: Option<DateTime<Utc>>, index: usize, data: &Value) {
        let Some(errors) = data.get("errors").and_then(Value::as_array) else {
            return;
        };
        let folder = &mut self.folders[index];
        let folder_id = folder.id.clone();
        let mut notifications = Vec::new();
        let mut changed = false;
        for value in errors {
            let error = FolderError {
                message: value
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                path: value
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            };
            if error.message.is_empty() || folder.errors.contains(&error) {
                continue;
            }
            folder.assign_status(FolderStatus::OutOfSync, time);
            if !folder.previous_errors.contains(&error) {
                notifications.push(error.message.clone());
            }
            folder.errors.push(error);
            changed = true;
        }
        if changed {
            self.push_update(ConnectionUpdate::FolderStatusChanged {
                id: folder_id,
                index,
            });
        }
        for message in notifications {
            self.emit_notification(time, message);
        }
    }

    fn handle_device_event(&mut self, event_type: &str, data: &Value) {
        let Some(device_id) = data
            .get("device")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            return;
        };
        let Some(index) = self.devices.iter().position(|d| d.id == device_id) else {
            return;
        };
        let device = &mut self.devices[index];
        let mut status = device.status;
        let mut paused = device.paused;
        match event_type {
            "DeviceConnected" => status = DeviceStatus::Idle,
            "DeviceDisconnected" => status = DeviceStatus::Disconnected,
            "DevicePaused" => paused = true,
            "DeviceRejected" => status = DeviceStatus::Rejected,
            "DeviceResumed" => {
                paused = false;
                // connectivity after a resume is unknown until the
                // next connections poll
                status = DeviceStatus::Disconnected;
            }
            "DeviceDiscovered" => {
                if status == DeviceStatus::Unknown {
                    status = DeviceStatus::Disconnected;
                }
            }
            _ => return,
        }
        if device.status != status || device.paused != paused {
            if device.status != DeviceStatus::OwnDevice {
                device.status = status;
            }
            device.paused = paused;
            self.push_update(ConnectionUpdate::DeviceStatusChanged {
                id: device_id.to_owned(),
                index,
            });
        }
    }

    fn handle_item_finished(&mut self, time: Option<DateTime<Utc>>, data: &Value) {
        let Some(folder_id) = data
            .get("folder")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            return;
        };
        let Some(index) = self.folders.iter().position(|f| f.id == folder_id) else {
            return;
        };
        let item = data.get("item").and_then(Value::as_str).unwrap_or_default();
        let error = data
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let folder = &mut self.folders[index];
        if error.is_empty() {
            if folder.last_file_time.is_none() || time > folder.last_file_time {
                folder.last_file_time = time;
                folder.last_file_name = item.to_owned();
                folder.last_file_deleted =
                    data.get("action").and_then(Value::as_str) == Some("delete");
                if folder.last_file_time > self.last_file_time {
                    self.last_file_time = folder.last_file_time;
                    self.last_file_name = folder.last_file_name.clone();
                    self.last_file_deleted = folder.last_file_deleted;
                }
                self.push_update(ConnectionUpdate::FolderStatusChanged {
                    id: folder_id.to_owned(),
                    index,
                });
            }
        } else if folder.status == FolderStatus::OutOfSync {
            // only relevant while the folder is already failing
            folder.errors.push(FolderError {
                message: error.to_owned(),
                path: item.to_owned(),
            });
            self.push_update(ConnectionUpdate::FolderStatusChanged {
                id: folder_id.to_owned(),
                index,
            });
            self.emit_notification(time, error.to_owned());
        }
    }

    // ── Failure handling ─────────────────────────────────────────────

    /// React to a failed poll request. Canceled requests never reach
    /// this point; they are dropped together with their futures.
    pub(crate) fn handle_poll_failure(&mut self, request: &PollRequest, error: &tether_api::Error) {
        let parsing = error.is_parse_failure();
        let category = if parsing {
            ErrorCategory::Parsing
        } else {
            ErrorCategory::OverallConnection
        };
        let verb = if parsing { "parse" } else { "request" };
        match request {
            PollRequest::Config => {
                self.push_error(format!("unable to {verb} {}: {error}", request.describe()), category);
                if !parsing {
                    self.set_status(SyncStatus::Disconnected);
                    self.arm_reconnect();
                }
            }
            PollRequest::Events { .. } => {
                if error.is_timeout() {
                    // no news before the long poll expired
                    if self.keep_polling {
                        self.request(PollRequest::Events {
                            since: self.last_event_id,
                        });
                        self.set_status(SyncStatus::Idle);
                    } else {
                        self.set_status(SyncStatus::Disconnected);
                    }
                } else {
                    self.push_error(
                        format!("unable to {verb} {}: {error}", request.describe()),
                        category,
                    );
                    self.set_status(SyncStatus::Disconnected);
                    self.arm_reconnect();
                }
            }
            _ => {
                self.push_error(format!("unable to {verb} {}: {error}", request.describe()), category);
            }
        }
    }

    /// Surface a failed one-off command (pause/rescan/restart/...).
    pub(crate) fn handle_command_failure(&mut self, message: String) {
        self.push_error(message, ErrorCategory::SpecificRequest);
    }

    /// Surface a failure that prevents talking to the daemon at all,
    /// such as a malformed URL or an unreadable certificate. Treated
    /// like a failed configuration request: disconnect and retry on
    /// the auto-reconnect interval.
    pub(crate) fn handle_connection_failure(&mut self, message: String) {
        self.push_error(message, ErrorCategory::OverallConnection);
        self.set_status(SyncStatus::Disconnected);
        self.arm_reconnect();
    }

    /// Broadcast a daemon acknowledgement for a one-off command.
    pub(crate) fn acknowledge(&mut self, update: ConnectionUpdate) {
        self.push_update(update);
    }

    // ── Status derivation ────────────────────────────────────────────

    /// Set the connection status. Only `Disconnected`, `Reconnecting`,
    /// and `Idle` are meaningful inputs; connected states are derived
    /// from the folder and device collections, so passing `Idle` asks
    /// for a recomputation.
    pub(crate) fn set_status(&mut self, status: SyncStatus) {
        if self.status == SyncStatus::BeingDestroyed {
            return;
        }
        let status = match status {
            SyncStatus::Disconnected | SyncStatus::Reconnecting => {
                // synchronization is not considered finished here
                self.synced_folders.clear();
                status
            }
            _ => {
                self.reconnect_tries = 0;
                let derived = self.derive_connected_status();
                if derived != SyncStatus::Synchronizing {
                    let completed = std::mem::take(&mut self.synced_folders);
                    if !completed.is_empty() {
                        debug!(folders = ?completed, "synchronization completed");
                        self.push_update(ConnectionUpdate::FoldersCompleted(completed.clone()));
                    }
                    self.completed_folders = completed;
                }
                derived
            }
        };
        if self.status != status {
            self.status = status;
            debug!(%status, "connection status changed");
            self.push_update(ConnectionUpdate::StatusChanged(status));
        }
    }

    fn derive_connected_status(&mut self) -> SyncStatus {
        let mut scanning = false;
        let mut synchronizing = false;
        for folder in &self.folders {
            match folder.status {
                FolderStatus::Synchronizing => {
                    if !self.synced_folders.contains(&folder.id) {
                        self.synced_folders.push(folder.id.clone());
                    }
                    synchronizing = true;
                }
                FolderStatus::Scanning => scanning = true,
                _ => {}
            }
        }
        if synchronizing {
            SyncStatus::Synchronizing
        } else if scanning {
            SyncStatus::Scanning
        } else if self.devices.iter().any(|d| d.paused) {
            // a pause interrupts rather than finishes synchronization
            self.synced_folders.clear();
            SyncStatus::Paused
        } else {
            SyncStatus::Idle
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn emit_notification(&mut self, when: Option<DateTime<Utc>>, message: String) {
        self.unread_notifications = true;
        self.set_status(self.status);
        self.push_update(ConnectionUpdate::NewNotification(Notification {
            when,
            message,
        }));
    }

    fn push_update(&mut self, update: ConnectionUpdate) {
        self.effects.updates.push(update);
    }

    fn push_error(&mut self, message: String, category: ErrorCategory) {
        warn!(?category, "{message}");
        self.push_update(ConnectionUpdate::Error { message, category });
    }

    fn request(&mut self, request: PollRequest) {
        self.effects.requests.push(request);
    }

    fn arm_reconnect(&mut self) {
        if !self.settings.reconnect_interval.is_zero() {
            self.effects.arm_reconnect = true;
        }
    }
}
