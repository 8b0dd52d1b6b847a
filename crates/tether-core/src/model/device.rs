use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Status of a peer device.
///
/// `OwnDevice` is sticky: once a device is identified as the daemon's
/// own, no event- or poll-derived transition may replace it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Disconnected,
    #[strum(serialize = "own device")]
    OwnDevice,
    Idle,
    Rejected,
}

/// A peer device: configuration fields overwritten on every config
/// refresh plus runtime-only state that survives refreshes through
/// recycling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Device {
    // ── Configuration ────────────────────────────────────────────────
    pub id: String,
    pub name: String,
    pub addresses: Vec<String>,
    pub compression: String,
    pub cert_name: String,
    pub introducer: bool,

    // ── Runtime state ────────────────────────────────────────────────
    pub status: DeviceStatus,
    pub paused: bool,
    pub total_incoming_traffic: u64,
    pub total_outgoing_traffic: u64,
    pub connection_address: String,
    pub connection_type: String,
    pub client_version: String,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Device {
    /// Create a bare device known only by id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// The name to present to users: the configured name, or a
    /// shortened id for unnamed devices.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.id.chars().take(7).collect()
        } else {
            self.name.clone()
        }
    }

    /// Whether this record represents the daemon's own device.
    pub fn is_own_device(&self) -> bool {
        self.status == DeviceStatus::OwnDevice
    }
}
