use bytesize::ByteSize;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

/// Size of one sync block. The daemon reports download progress in
/// blocks; this converts them to bytes for the human-readable label.
const BLOCK_SIZE: u64 = 128 * 1024;

/// Status of a single synced folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum FolderStatus {
    #[default]
    Unknown,
    Idle,
    Scanning,
    Synchronizing,
    OutOfSync,
    Unshared,
}

impl FolderStatus {
    /// Map a daemon state string (`StateChanged.to` et al) to a status.
    pub fn from_daemon_string(value: &str) -> Self {
        match value {
            "idle" => Self::Idle,
            "scanning" => Self::Scanning,
            "syncing" => Self::Synchronizing,
            "error" | "outofsync" => Self::OutOfSync,
            "unshared" => Self::Unshared,
            _ => Self::Unknown,
        }
    }
}

/// One folder-scoped error reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderError {
    pub message: String,
    pub path: String,
}

/// In-flight download progress of a single item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDownloadProgress {
    pub file_path: String,
    pub file_name: String,
    pub blocks_downloaded: u64,
    pub blocks_total: u64,
}

impl ItemDownloadProgress {
    /// Build a progress record from one entry of a `DownloadProgress`
    /// event payload. Blocks already present locally (copied or reused)
    /// count as downloaded.
    pub fn from_event(folder_path: &str, file_name: &str, progress: &serde_json::Value) -> Self {
        let field = |name: &str| progress.get(name).and_then(serde_json::Value::as_u64).unwrap_or(0);
        Self {
            file_path: format!("{folder_path}/{file_name}"),
            file_name: file_name.to_owned(),
            blocks_downloaded: field("pulled")
                + field("copiedFromOrigin")
                + field("copiedFromElsewhere")
                + field("reused"),
            blocks_total: field("total"),
        }
    }
}

/// A synced folder: configuration fields overwritten on every config
/// refresh plus runtime-only state (status, errors, counters) that
/// survives refreshes through recycling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Folder {
    // ── Configuration ────────────────────────────────────────────────
    pub id: String,
    pub label: String,
    pub path: String,
    /// Ids of the devices sharing this folder.
    pub devices: Vec<String>,
    pub read_only: bool,
    pub rescan_interval_s: Option<i64>,
    pub ignore_permissions: bool,
    pub auto_normalize: bool,
    pub min_disk_free_pct: Option<f64>,

    // ── Runtime state ────────────────────────────────────────────────
    pub status: FolderStatus,
    /// When the current status was assigned.
    pub status_since: Option<DateTime<Utc>>,
    pub errors: Vec<FolderError>,
    /// Errors from the previous out-of-sync episode; used only to
    /// decide which freshly reported errors are new enough to notify.
    pub previous_errors: Vec<FolderError>,

    // ── Counters ─────────────────────────────────────────────────────
    pub global_files: u64,
    pub global_deleted: u64,
    pub global_bytes: u64,
    pub local_files: u64,
    pub local_deleted: u64,
    pub local_bytes: u64,
    pub needed_files: u64,
    pub needed_bytes: u64,

    // ── Download aggregates ──────────────────────────────────────────
    pub downloading_items: Vec<ItemDownloadProgress>,
    pub blocks_downloaded: u64,
    pub blocks_to_download: u64,
    pub download_percentage: u8,
    pub download_label: String,

    // ── Last synced file ─────────────────────────────────────────────
    pub last_file_name: String,
    pub last_file_time: Option<DateTime<Utc>>,
    pub last_file_deleted: bool,

    // ── Scan/sync progress ───────────────────────────────────────────
    pub last_scan_time: Option<DateTime<Utc>>,
    pub progress_percentage: u8,
    pub progress_rate: u64,
}

impl Folder {
    /// Create a bare folder known only by id, e.g. when an event
    /// references a folder the configuration has not delivered yet.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// The name to present to users: the label, or the id if unlabeled.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() { &self.id } else { &self.label }
    }

    /// Assign a new status, recording the transition time.
    ///
    /// Leaving `OutOfSync` shelves the current error list as the
    /// "previous errors" snapshot, so the next out-of-sync episode only
    /// notifies for errors that were not already known.
    ///
    /// Returns whether the status actually changed.
    pub fn assign_status(&mut self, status: FolderStatus, when: Option<DateTime<Utc>>) -> bool {
        if self.status == status {
            return false;
        }
        if self.status == FolderStatus::OutOfSync {
            self.previous_errors = std::mem::take(&mut self.errors);
        }
        self.status = status;
        self.status_since = when;
        true
    }

    /// Recompute the download percentage and label from the block
    /// counters. Percentage is 0 when nothing is pending.
    pub fn recompute_download_aggregate(&mut self) {
        self.download_percentage = if self.blocks_downloaded > 0 && self.blocks_to_download > 0 {
            u8::try_from(self.blocks_downloaded * 100 / self.blocks_to_download)
                .unwrap_or(100)
                .min(100)
        } else {
            0
        };
        self.download_label = format!(
            "{} / {} - {} %",
            ByteSize(self.blocks_downloaded * BLOCK_SIZE),
            ByteSize(self.blocks_to_download * BLOCK_SIZE),
            self.download_percentage
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_name_falls_back_to_id() {
        let mut folder = Folder::new("docs");
        assert_eq!(folder.display_name(), "docs");
        folder.label = "Documents".into();
        assert_eq!(folder.display_name(), "Documents");
    }

    #[test]
    fn status_strings_map_to_variants() {
        assert_eq!(
            FolderStatus::from_daemon_string("syncing"),
            FolderStatus::Synchronizing
        );
        assert_eq!(FolderStatus::from_daemon_string("idle"), FolderStatus::Idle);
        assert_eq!(
            FolderStatus::from_daemon_string("whatever"),
            FolderStatus::Unknown
        );
    }

    #[test]
    fn assign_status_records_transition_and_change() {
        let mut folder = Folder::new("docs");
        let when = Some(chrono::Utc::now());
        assert!(folder.assign_status(FolderStatus::Scanning, when));
        assert_eq!(folder.status_since, when);
        // same status again is not a change
        assert!(!folder.assign_status(FolderStatus::Scanning, None));
        assert_eq!(folder.status_since, when);
    }

    #[test]
    fn leaving_out_of_sync_shelves_errors() {
        let mut folder = Folder::new("docs");
        folder.assign_status(FolderStatus::OutOfSync, None);
        folder.errors.push(FolderError {
            message: "permission denied".into(),
            path: "a.txt".into(),
        });

        folder.assign_status(FolderStatus::Idle, None);
        assert!(folder.errors.is_empty());
        assert_eq!(folder.previous_errors.len(), 1);
        assert_eq!(folder.previous_errors[0].path, "a.txt");
    }

    #[test]
    fn download_percentage_is_zero_without_pending_blocks() {
        let mut folder = Folder::new("docs");
        folder.recompute_download_aggregate();
        assert_eq!(folder.download_percentage, 0);

        folder.blocks_downloaded = 0;
        folder.blocks_to_download = 100;
        folder.recompute_download_aggregate();
        assert_eq!(folder.download_percentage, 0);
    }

    #[test]
    fn download_percentage_stays_within_bounds() {
        let mut folder = Folder::new("docs");
        folder.blocks_downloaded = 50;
        folder.blocks_to_download = 200;
        folder.recompute_download_aggregate();
        assert_eq!(folder.download_percentage, 25);

        // downloaded can transiently exceed the pending total
        folder.blocks_downloaded = 300;
        folder.recompute_download_aggregate();
        assert_eq!(folder.download_percentage, 100);
    }

    #[test]
    fn item_progress_counts_local_blocks_as_downloaded() {
        let progress = serde_json::json!({
            "total": 10,
            "pulled": 3,
            "copiedFromOrigin": 1,
            "copiedFromElsewhere": 1,
            "reused": 2,
            "bytesTotal": 1310720
        });
        let item = ItemDownloadProgress::from_event("/data/docs", "big.iso", &progress);
        assert_eq!(item.blocks_total, 10);
        assert_eq!(item.blocks_downloaded, 7);
        assert_eq!(item.file_path, "/data/docs/big.iso");
    }
}
