//! Reactive state mirror for a running Syncthing daemon.
//!
//! This crate turns the daemon's ephemeral JSON responses into a
//! consistent, change-notifying in-memory model that applications
//! observe and drive:
//!
//! - **[`Connection`]** — the orchestrator. Owns the entity model,
//!   issues all HTTP requests through `tether-api`, runs the event
//!   long-poll, and is the only thing that emits externally observable
//!   [`ConnectionUpdate`]s. Commands (`connect`, `pause`, `rescan`, ...)
//!   are fire-and-forget; success and failure surface as updates.
//!
//! - **Entity model** ([`model`]) — [`Folder`] and [`Device`] records
//!   with status enums, error lists, traffic counters, and download
//!   progress. Entities are recycled across configuration refreshes so
//!   runtime-only fields survive; collaborators observe them as
//!   `Arc<Vec<_>>` snapshots that stay valid forever (they are simply
//!   replaced, never mutated in place).
//!
//! - **[`ConnectionSettings`]** — inbound configuration (URL, API key,
//!   credentials, certificate exceptions, poll intervals); applying it
//!   reports whether a reconnect is required.

pub mod connection;
pub mod error;
pub mod model;
pub mod settings;
pub mod update;

mod state;

// ── Primary re-exports ──────────────────────────────────────────────
pub use connection::{Connection, ConnectionInfo};
pub use error::CoreError;
pub use model::{
    Device, DeviceStatus, Folder, FolderError, FolderStatus, ItemDownloadProgress,
};
pub use settings::ConnectionSettings;
pub use update::{ConnectionUpdate, ErrorCategory, Notification, SyncStatus};

// Re-export the wire models consumers see through updates and
// callbacks.
pub use tether_api::models::{LogEntry, RawEvent, SystemConfig};
