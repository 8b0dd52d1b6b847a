// ── Domain model ──
//
// Plain data records for folders and devices plus the small derivation
// logic that belongs with them. All mutation happens in the connection
// state machine; collaborators only ever see cloned snapshots.

pub mod device;
pub mod folder;

pub use device::{Device, DeviceStatus};
pub use folder::{Folder, FolderError, FolderStatus, ItemDownloadProgress};

use chrono::{DateTime, Utc};

/// Parse an ISO-8601/RFC-3339 timestamp as the daemon emits them.
///
/// Malformed or missing timestamps are a normal occurrence and are
/// treated as "no timestamp" rather than an error; callers apply that
/// policy explicitly via the returned `Option`.
pub fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?;
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
