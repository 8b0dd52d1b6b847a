// Outbound notification surface.
//
// Collaborators subscribe to a broadcast stream of `ConnectionUpdate`s;
// delivery order matches emission order. All payloads are owned or
// `Arc`-shared — nothing borrows into the live entity collections.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use strum::Display;

use tether_api::models::{RawEvent, SystemConfig};

/// Aggregate connection status, derived from all folder and device
/// states — see [`Connection`](crate::Connection) for the precedence
/// rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Disconnected,
    Reconnecting,
    Idle,
    Scanning,
    Synchronizing,
    Paused,
    /// Terminal state entered on shutdown of the connection itself;
    /// suppresses all further status transitions.
    BeingDestroyed,
}

impl SyncStatus {
    /// Whether this status counts as connected to the daemon.
    pub fn is_connected(self) -> bool {
        !matches!(
            self,
            Self::Disconnected | Self::Reconnecting | Self::BeingDestroyed
        )
    }
}

/// Category of a request error, determining how collaborators present it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Failure of a request the connection depends on
    /// (config/status/connections/stats/errors/events).
    OverallConnection,
    /// Failure of a one-off command (pause/resume/rescan/restart/
    /// shutdown/log/QR).
    SpecificRequest,
    /// A response body could not be parsed.
    Parsing,
}

/// A human-readable notification derived from daemon errors or events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// When the underlying condition occurred; `None` when the daemon
    /// sent a malformed or missing timestamp.
    pub when: Option<DateTime<Utc>>,
    pub message: String,
}

/// Externally observable change notifications emitted by
/// [`Connection`](crate::Connection).
#[derive(Debug, Clone)]
pub enum ConnectionUpdate {
    /// A fresh configuration has been fetched and applied.
    ConfigReloaded(Arc<SystemConfig>),
    /// The cached configuration is stale (reconnect in progress).
    ConfigInvalidated,
    /// The folder list has been rebuilt from configuration.
    FoldersReplaced,
    /// The device list has been rebuilt from configuration.
    DevicesReplaced,
    /// A new batch of daemon events has been received (raw).
    NewEvents(Arc<Vec<RawEvent>>),
    /// A folder's status or statistics changed.
    FolderStatusChanged { id: String, index: usize },
    /// A device's status or statistics changed.
    DeviceStatusChanged { id: String, index: usize },
    /// Download progress of one or more folders changed.
    DownloadProgressChanged,
    /// Cumulative traffic totals changed.
    TrafficChanged {
        total_incoming: u64,
        total_outgoing: u64,
    },
    /// Folders that just finished synchronizing.
    FoldersCompleted(Vec<String>),
    /// A new human-readable notification is available.
    NewNotification(Notification),
    /// A request failed.
    Error {
        message: String,
        category: ErrorCategory,
    },
    /// The aggregate connection status changed.
    StatusChanged(SyncStatus),
    /// The daemon's home/config directory changed.
    ConfigDirChanged(String),
    /// The daemon's own device id changed.
    MyIdChanged(String),
    /// A rescan of the given folder was acknowledged.
    RescanTriggered(String),
    /// Pausing the given device was acknowledged.
    PauseTriggered(String),
    /// Resuming the given device was acknowledged.
    ResumeTriggered(String),
    /// A daemon restart was acknowledged.
    RestartTriggered,
    /// A daemon shutdown was acknowledged.
    ShutdownTriggered,
}
