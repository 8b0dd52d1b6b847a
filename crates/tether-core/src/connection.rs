// ── Connection orchestrator ──
//
// `Connection` is the public handle: a cheaply cloneable set of channel
// ends. All real work happens in a single actor task that owns the
// `DaemonState` state machine and the in-flight request futures.
// Commands are fire-and-forget; success and failure surface as
// `ConnectionUpdate`s on the broadcast stream.
//
// Cancellation works by dropping futures: aborting the poll set simply
// clears it, so an aborted request can never report an error or flip a
// readiness flag. One-off commands (pause, rescan, log, ...) live in a
// separate future set that aborts never touch.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Sleep;
use tracing::debug;
use url::Url;

use tether_api::models::{
    ConnectionsReport, DeviceStatsReport, ErrorReport, FolderStatsReport, LogEntry, RawEvent,
    SystemConfig, SystemStatus,
};
use tether_api::{RestClient, TransportConfig};

use crate::error::CoreError;
use crate::model::{Device, Folder};
use crate::settings::ConnectionSettings;
use crate::state::{DaemonState, PollRequest};
use crate::update::{ConnectionUpdate, SyncStatus};

const UPDATE_CHANNEL_SIZE: usize = 256;

/// Callback invoked with the daemon log once fetched.
pub type LogCallback = Box<dyn FnOnce(Vec<LogEntry>) + Send>;
/// Callback invoked with the rendered QR code PNG once fetched.
pub type QrCodeCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Connection-level state beside the folder and device collections:
/// identity, traffic counters, and the most recently synced file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionInfo {
    /// Own device id as reported by the daemon.
    pub my_id: String,
    /// The daemon's configuration directory.
    pub config_dir: String,
    /// Cumulative received bytes across all peers.
    pub total_incoming_traffic: u64,
    /// Cumulative sent bytes across all peers.
    pub total_outgoing_traffic: u64,
    /// Incoming transfer rate in kbit/s from the last two samples.
    pub incoming_rate: f64,
    /// Outgoing transfer rate in kbit/s from the last two samples.
    pub outgoing_rate: f64,
    /// Most recently synced file across all folders.
    pub last_file_name: String,
    pub last_file_time: Option<DateTime<Utc>>,
    pub last_file_deleted: bool,
    /// Set by new notifications, cleared by
    /// [`mark_notifications_read`](Connection::mark_notifications_read).
    pub unread_notifications: bool,
    /// Automatic reconnect attempts since the last successful connect.
    pub reconnect_tries: u32,
}

enum Command {
    Connect,
    ConnectWith(Box<ConnectionSettings>),
    Disconnect,
    Reconnect,
    ReconnectWith(Box<ConnectionSettings>),
    Pause(String),
    PauseAll,
    Resume(String),
    ResumeAll,
    Rescan(String),
    RescanAll,
    Restart,
    Shutdown,
    RequestLog(LogCallback),
    RequestQrCode(String, QrCodeCallback),
    MarkNotificationsRead,
    Close,
}

/// Handle to a daemon connection.
///
/// Cloning is cheap; all clones drive the same actor. The connection
/// shuts down when [`close`](Self::close) is called or the last handle
/// is dropped.
#[derive(Clone)]
pub struct Connection {
    command_tx: mpsc::UnboundedSender<Command>,
    update_tx: broadcast::Sender<ConnectionUpdate>,
    status_rx: watch::Receiver<SyncStatus>,
    info_rx: watch::Receiver<ConnectionInfo>,
    folders_rx: watch::Receiver<Arc<Vec<Folder>>>,
    devices_rx: watch::Receiver<Arc<Vec<Device>>>,
}

impl Connection {
    /// Create a connection with the given settings and spawn its actor.
    /// Nothing is fetched until [`connect`](Self::connect) is called.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(settings: ConnectionSettings) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        let (status_tx, status_rx) = watch::channel(SyncStatus::Disconnected);
        let (info_tx, info_rx) = watch::channel(ConnectionInfo::default());
        let (folders_tx, folders_rx) = watch::channel(Arc::new(Vec::new()));
        let (devices_tx, devices_rx) = watch::channel(Arc::new(Vec::new()));

        let actor = ConnectionActor {
            state: DaemonState::new(settings),
            client: None,
            command_rx,
            polls: FuturesUnordered::new(),
            commands: FuturesUnordered::new(),
            reconnect_timer: None,
            update_tx: update_tx.clone(),
            status_tx,
            info_tx,
            folders_tx,
            devices_tx,
        };
        tokio::spawn(actor.run());

        Self {
            command_tx,
            update_tx,
            status_rx,
            info_rx,
            folders_rx,
            devices_rx,
        }
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Subscribe to the update broadcast stream. Delivery order matches
    /// emission order.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionUpdate> {
        self.update_tx.subscribe()
    }

    /// The current aggregate status.
    pub fn status(&self) -> SyncStatus {
        *self.status_rx.borrow()
    }

    /// Watch aggregate status changes.
    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status_rx.clone()
    }

    /// Snapshot of the connection-level counters and identity.
    pub fn info(&self) -> ConnectionInfo {
        self.info_rx.borrow().clone()
    }

    /// Watch connection-level counter changes.
    pub fn watch_info(&self) -> watch::Receiver<ConnectionInfo> {
        self.info_rx.clone()
    }

    /// Snapshot of the current folder collection. Snapshots are
    /// replaced, never mutated, so a held `Arc` stays valid forever
    /// (but goes stale at the next reconciliation).
    pub fn folders(&self) -> Arc<Vec<Folder>> {
        self.folders_rx.borrow().clone()
    }

    /// Watch folder collection replacements.
    pub fn watch_folders(&self) -> watch::Receiver<Arc<Vec<Folder>>> {
        self.folders_rx.clone()
    }

    /// Snapshot of the current device collection.
    pub fn devices(&self) -> Arc<Vec<Device>> {
        self.devices_rx.borrow().clone()
    }

    /// Watch device collection replacements.
    pub fn watch_devices(&self) -> watch::Receiver<Arc<Vec<Device>>> {
        self.devices_rx.clone()
    }

    // ── Lifecycle commands ───────────────────────────────────────────

    /// Start connecting. Does nothing when already connected.
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// Apply `settings`, reconnecting only when a transport-relevant
    /// field changed.
    pub fn connect_with(&self, settings: ConnectionSettings) {
        self.send(Command::ConnectWith(Box::new(settings)));
    }

    /// Stop polling and drop all in-flight requests.
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Tear down the current connection and establish a new one.
    pub fn reconnect(&self) {
        self.send(Command::Reconnect);
    }

    /// Apply `settings`, then reconnect unconditionally.
    pub fn reconnect_with(&self, settings: ConnectionSettings) {
        self.send(Command::ReconnectWith(Box::new(settings)));
    }

    /// Shut the connection down for good. Idempotent.
    pub fn close(&self) {
        self.send(Command::Close);
    }

    // ── Daemon commands ──────────────────────────────────────────────

    /// Pause the given device.
    pub fn pause(&self, device_id: impl Into<String>) {
        self.send(Command::Pause(device_id.into()));
    }

    /// Pause every known device.
    pub fn pause_all(&self) {
        self.send(Command::PauseAll);
    }

    /// Resume the given device.
    pub fn resume(&self, device_id: impl Into<String>) {
        self.send(Command::Resume(device_id.into()));
    }

    /// Resume every known device.
    pub fn resume_all(&self) {
        self.send(Command::ResumeAll);
    }

    /// Trigger a rescan of the given folder.
    pub fn rescan(&self, folder_id: impl Into<String>) {
        self.send(Command::Rescan(folder_id.into()));
    }

    /// Trigger a rescan of every known folder.
    pub fn rescan_all(&self) {
        self.send(Command::RescanAll);
    }

    /// Ask the daemon to restart itself.
    pub fn restart(&self) {
        self.send(Command::Restart);
    }

    /// Ask the daemon to exit and not restart.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Fetch the daemon log; `callback` runs on success, a
    /// [`ConnectionUpdate::Error`] surfaces on failure.
    pub fn request_log(&self, callback: impl FnOnce(Vec<LogEntry>) + Send + 'static) {
        self.send(Command::RequestLog(Box::new(callback)));
    }

    /// Fetch a QR code PNG for `text` (typically a device id).
    pub fn request_qr_code(
        &self,
        text: impl Into<String>,
        callback: impl FnOnce(Vec<u8>) + Send + 'static,
    ) {
        self.send(Command::RequestQrCode(text.into(), Box::new(callback)));
    }

    /// Clear the unread-notifications flag.
    pub fn mark_notifications_read(&self) {
        self.send(Command::MarkNotificationsRead);
    }

    fn send(&self, command: Command) {
        // the actor only goes away after Close; later sends are no-ops
        let _ = self.command_tx.send(command);
    }
}

// ── Actor ────────────────────────────────────────────────────────────

/// Successful poll payloads, tagged with their originating request.
enum PollResponse {
    Config(SystemConfig),
    Status(SystemStatus),
    Connections(ConnectionsReport),
    FolderStats(FolderStatsReport),
    DeviceStats(DeviceStatsReport),
    Errors(ErrorReport),
    Events(Vec<RawEvent>),
}

type PollOutcome = (PollRequest, Result<PollResponse, tether_api::Error>);

/// Outcome of a one-off command future.
enum CommandOutcome {
    /// The daemon acknowledged; broadcast this update.
    Triggered(ConnectionUpdate),
    /// The result was delivered through a callback already.
    Done,
    /// Surface a `SpecificRequest` error with this message.
    Failed(String),
}

struct ConnectionActor {
    state: DaemonState,
    client: Option<Arc<RestClient>>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    /// In-flight poll requests. Cleared wholesale on abort; dropping a
    /// future cancels its request.
    polls: FuturesUnordered<BoxFuture<'static, PollOutcome>>,
    /// In-flight one-off commands; these survive aborts.
    commands: FuturesUnordered<BoxFuture<'static, CommandOutcome>>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    update_tx: broadcast::Sender<ConnectionUpdate>,
    status_tx: watch::Sender<SyncStatus>,
    info_tx: watch::Sender<ConnectionInfo>,
    folders_tx: watch::Sender<Arc<Vec<Folder>>>,
    devices_tx: watch::Sender<Arc<Vec<Device>>>,
}

impl ConnectionActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.command_rx.recv() => {
                    match command {
                        Some(Command::Close) | None => break,
                        Some(command) => self.handle_command(command),
                    }
                }
                () = wait_for(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    self.state.auto_reconnect();
                    // the settings may have become viable since the
                    // last failed attempt
                    self.rebuild_client();
                }
                Some((request, result)) = self.polls.next(), if !self.polls.is_empty() => {
                    self.handle_poll_outcome(&request, result);
                }
                Some(outcome) = self.commands.next(), if !self.commands.is_empty() => {
                    self.handle_command_outcome(outcome);
                }
            }
            self.drain_effects();
        }
        self.state.destroy();
        self.drain_effects();
        debug!("connection actor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => {
                self.rebuild_client();
                self.state.connect();
            }
            Command::ConnectWith(settings) => {
                self.state.connect_with(*settings);
                self.rebuild_client();
            }
            Command::Disconnect => self.state.disconnect(),
            Command::Reconnect => {
                self.rebuild_client();
                self.state.reconnect();
            }
            Command::ReconnectWith(settings) => {
                self.state.reconnect_with(*settings);
                self.rebuild_client();
            }
            Command::Pause(device_id) => self.spawn_pause(device_id),
            Command::PauseAll => {
                for device_id in self.state.device_ids() {
                    self.spawn_pause(device_id);
                }
            }
            Command::Resume(device_id) => self.spawn_resume(device_id),
            Command::ResumeAll => {
                for device_id in self.state.device_ids() {
                    self.spawn_resume(device_id);
                }
            }
            Command::Rescan(folder_id) => self.spawn_rescan(folder_id),
            Command::RescanAll => {
                for folder_id in self.state.folder_ids() {
                    self.spawn_rescan(folder_id);
                }
            }
            Command::Restart => self.spawn_command("restart", |client| {
                async move {
                    match client.restart().await {
                        Ok(()) => CommandOutcome::Triggered(ConnectionUpdate::RestartTriggered),
                        Err(err) => {
                            CommandOutcome::Failed(format!("unable to request restart: {err}"))
                        }
                    }
                }
                .boxed()
            }),
            Command::Shutdown => self.spawn_command("shutdown", |client| {
                async move {
                    match client.shutdown().await {
                        Ok(()) => CommandOutcome::Triggered(ConnectionUpdate::ShutdownTriggered),
                        Err(err) => {
                            CommandOutcome::Failed(format!("unable to request shutdown: {err}"))
                        }
                    }
                }
                .boxed()
            }),
            Command::RequestLog(callback) => self.spawn_command("log", move |client| {
                async move {
                    match client.log().await {
                        Ok(entries) => {
                            callback(entries);
                            CommandOutcome::Done
                        }
                        Err(err) => {
                            CommandOutcome::Failed(format!("unable to request log: {err}"))
                        }
                    }
                }
                .boxed()
            }),
            Command::RequestQrCode(text, callback) => {
                self.spawn_command("QR code", move |client| {
                    async move {
                        match client.qr_code(&text).await {
                            Ok(bytes) => {
                                callback(bytes);
                                CommandOutcome::Done
                            }
                            Err(err) => {
                                CommandOutcome::Failed(format!("unable to request QR code: {err}"))
                            }
                        }
                    }
                    .boxed()
                });
            }
            Command::MarkNotificationsRead => self.state.mark_notifications_read(),
            Command::Close => unreachable!("handled in the select loop"),
        }
    }

    fn handle_poll_outcome(
        &mut self,
        request: &PollRequest,
        result: Result<PollResponse, tether_api::Error>,
    ) {
        match result {
            Ok(PollResponse::Config(config)) => self.state.apply_config(config),
            Ok(PollResponse::Status(status)) => self.state.apply_status(status),
            Ok(PollResponse::Connections(report)) => {
                self.state.apply_connections(report, Utc::now());
            }
            Ok(PollResponse::FolderStats(report)) => self.state.apply_folder_stats(report),
            Ok(PollResponse::DeviceStats(report)) => self.state.apply_device_stats(report),
            Ok(PollResponse::Errors(report)) => self.state.apply_errors(report, Utc::now()),
            Ok(PollResponse::Events(events)) => self.state.apply_events(events),
            Err(error) => self.state.handle_poll_failure(request, &error),
        }
    }

    fn handle_command_outcome(&mut self, outcome: CommandOutcome) {
        match outcome {
            CommandOutcome::Triggered(update) => self.state.acknowledge(update),
            CommandOutcome::Done => {}
            CommandOutcome::Failed(message) => self.state.handle_command_failure(message),
        }
    }

    /// Apply queued side effects: timers, aborts, broadcasts, new
    /// requests, and refreshed snapshots, in that order.
    fn drain_effects(&mut self) {
        let mut model_changed = false;
        if self.state.has_effects() {
            let effects = self.state.take_effects();
            model_changed = !effects.updates.is_empty();
            if effects.disarm_reconnect {
                self.reconnect_timer = None;
            }
            if effects.abort_requests {
                // dropping the futures cancels the requests; nothing
                // ever observes them as failed
                self.polls.clear();
            }
            for update in effects.updates {
                let _ = self.update_tx.send(update);
            }
            for request in effects.requests {
                self.spawn_poll(request);
            }
            if effects.arm_reconnect && self.reconnect_timer.is_none() {
                let interval = self.state.settings().reconnect_interval;
                if !interval.is_zero() {
                    self.reconnect_timer = Some(Box::pin(tokio::time::sleep(interval)));
                }
            }
        }

        self.status_tx.send_if_modified(|status| {
            let new = self.state.status();
            if *status == new {
                false
            } else {
                *status = new;
                true
            }
        });
        self.info_tx.send_if_modified(|info| {
            let new = self.state.info();
            if *info == new {
                false
            } else {
                *info = new;
                true
            }
        });
        // entity snapshots are replaced, not diffed; any emitted update
        // may have touched them
        if model_changed {
            self.folders_tx
                .send_replace(Arc::new(self.state.folders().to_vec()));
            self.devices_tx
                .send_replace(Arc::new(self.state.devices().to_vec()));
        }
    }

    /// (Re)build the REST client from the current settings. Certificate
    /// trust is resolved here: explicit exceptions win, otherwise the
    /// local daemon's own HTTPS certificate is looked up.
    fn rebuild_client(&mut self) {
        let settings = self.state.settings().clone();
        let config_dir = self.state.config_dir().to_owned();
        match build_client(&settings, &config_dir) {
            Ok(client) => self.client = Some(Arc::new(client)),
            Err(CoreError::InsufficientConfiguration) => {
                // the state machine reports this one itself
                self.client = None;
            }
            Err(err) => {
                self.client = None;
                self.state
                    .handle_connection_failure(format!("unable to set up HTTP client: {err}"));
            }
        }
    }

    fn spawn_poll(&mut self, request: PollRequest) {
        let Some(client) = self.client.clone() else {
            return;
        };
        self.polls.push(
            async move {
                let result = match &request {
                    PollRequest::Config => client.config().await.map(PollResponse::Config),
                    PollRequest::Status => client.status().await.map(PollResponse::Status),
                    PollRequest::Connections { delay } => {
                        sleep_if_nonzero(*delay).await;
                        client.connections().await.map(PollResponse::Connections)
                    }
                    PollRequest::FolderStats { delay } => {
                        sleep_if_nonzero(*delay).await;
                        client.folder_stats().await.map(PollResponse::FolderStats)
                    }
                    PollRequest::DeviceStats { delay } => {
                        sleep_if_nonzero(*delay).await;
                        client.device_stats().await.map(PollResponse::DeviceStats)
                    }
                    PollRequest::Errors { delay } => {
                        sleep_if_nonzero(*delay).await;
                        client.errors().await.map(PollResponse::Errors)
                    }
                    PollRequest::Events { since } => {
                        client.events(*since).await.map(PollResponse::Events)
                    }
                };
                (request, result)
            }
            .boxed(),
        );
    }

    fn spawn_pause(&mut self, device_id: String) {
        self.spawn_command("pause", move |client| {
            async move {
                match client.pause(&device_id).await {
                    Ok(()) => {
                        CommandOutcome::Triggered(ConnectionUpdate::PauseTriggered(device_id))
                    }
                    Err(err) => {
                        CommandOutcome::Failed(format!("unable to request pause: {err}"))
                    }
                }
            }
            .boxed()
        });
    }

    fn spawn_resume(&mut self, device_id: String) {
        self.spawn_command("resume", move |client| {
            async move {
                match client.resume(&device_id).await {
                    Ok(()) => {
                        CommandOutcome::Triggered(ConnectionUpdate::ResumeTriggered(device_id))
                    }
                    Err(err) => {
                        CommandOutcome::Failed(format!("unable to request resume: {err}"))
                    }
                }
            }
            .boxed()
        });
    }

    fn spawn_rescan(&mut self, folder_id: String) {
        self.spawn_command("rescan", move |client| {
            async move {
                match client.rescan(&folder_id).await {
                    Ok(()) => {
                        CommandOutcome::Triggered(ConnectionUpdate::RescanTriggered(folder_id))
                    }
                    Err(err) => {
                        CommandOutcome::Failed(format!("unable to request rescan: {err}"))
                    }
                }
            }
            .boxed()
        });
    }

    /// Start a one-off command future, or surface an error right away
    /// when no client has ever been set up.
    fn spawn_command<F>(&mut self, what: &str, build: F)
    where
        F: FnOnce(Arc<RestClient>) -> BoxFuture<'static, CommandOutcome>,
    {
        match self.client.clone() {
            Some(client) => self.commands.push(build(client)),
            None => self
                .state
                .handle_command_failure(format!("unable to request {what}: not connected")),
        }
    }
}

fn build_client(settings: &ConnectionSettings, config_dir: &str) -> Result<RestClient, CoreError> {
    if !settings.is_sufficient() {
        return Err(CoreError::InsufficientConfiguration);
    }
    let base_url = Url::parse(&settings.daemon_url)?;
    let mut transport = TransportConfig::default();
    transport
        .trusted_certificates
        .clone_from(&settings.cert_exceptions);
    if transport.trusted_certificates.is_empty() {
        if let Some(cert) = settings.local_certificate(Some(config_dir)) {
            debug!(cert = %cert.display(), "trusting local daemon certificate");
            transport.trusted_certificates.push(cert);
        }
    }
    let client = RestClient::new(base_url, settings.api_key.clone(), &transport)?;
    Ok(if settings.user.is_empty() {
        client
    } else {
        client.with_basic_auth(settings.user.clone(), settings.password.clone())
    })
}

async fn wait_for(timer: &mut Option<Pin<Box<Sleep>>>) {
    if let Some(sleep) = timer {
        sleep.as_mut().await;
    } else {
        std::future::pending::<()>().await;
    }
}

async fn sleep_if_nonzero(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
