// Daemon REST client
//
// Wraps `reqwest::Client` with daemon-specific URL construction and
// credential injection. One inherent method per endpoint; all methods
// return typed payloads with the response body preserved on parse
// failures. The client holds no connection state — polling cadence and
// retry policy live in `tether-core`.

use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::models::{
    ConnectionsReport, DeviceStatsReport, ErrorReport, FolderStatsReport, LogEntry, LogReport,
    RawEvent, SystemConfig, SystemStatus,
};
use crate::transport::TransportConfig;

/// Raw HTTP client for the daemon's REST control API.
///
/// Credentials are injected as an `X-API-Key` header plus optional HTTP
/// basic auth. REST endpoints live under `{base}/rest/`; the QR code
/// endpoint is the one exception served from the daemon's raw path.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: String,
    basic_auth: Option<(String, String)>,
    timeout: Duration,
    long_poll_timeout: Duration,
}

impl RestClient {
    /// Create a new client from a [`TransportConfig`].
    pub fn new(
        base_url: Url,
        api_key: impl Into<String>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self {
            http,
            base_url,
            api_key: api_key.into(),
            basic_auth: None,
            timeout: transport.timeout,
            long_poll_timeout: transport.long_poll_timeout,
        })
    }

    /// Create a client with a pre-built `reqwest::Client` (tests).
    pub fn with_client(http: reqwest::Client, base_url: Url, api_key: impl Into<String>) -> Self {
        let transport = TransportConfig::default();
        Self {
            http,
            base_url,
            api_key: api_key.into(),
            basic_auth: None,
            timeout: transport.timeout,
            long_poll_timeout: transport.long_poll_timeout,
        }
    }

    /// Attach HTTP basic-auth credentials sent alongside the API key.
    pub fn with_basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    /// The daemon base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build a full URL for a REST path: `{base}/rest/{path}`.
    fn rest_url(&self, path: &str) -> Result<Url, Error> {
        let full = format!(
            "{}/rest/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path
        );
        Ok(Url::parse(&full)?)
    }

    /// Build a full URL for a raw (non-REST) path: `{base}{path}`.
    fn raw_url(&self, path: &str) -> Result<Url, Error> {
        let full = format!(
            "{}{path}",
            self.base_url.as_str().trim_end_matches('/')
        );
        Ok(Url::parse(&full)?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn prepare(&self, builder: reqwest::RequestBuilder, timeout: Duration) -> reqwest::RequestBuilder {
        let builder = builder.timeout(timeout).header("X-API-Key", &self.api_key);
        match &self.basic_auth {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    /// Send a GET request and deserialize the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, url: Url, timeout: Duration) -> Result<T, Error> {
        debug!("GET {url}");

        let resp = self
            .prepare(self.http.get(url), timeout)
            .send()
            .await?
            .error_for_status()?;

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    /// Send a GET request and return the raw body bytes.
    async fn get_bytes(&self, url: Url) -> Result<Vec<u8>, Error> {
        debug!("GET {url}");

        let resp = self
            .prepare(self.http.get(url), self.timeout)
            .send()
            .await?
            .error_for_status()?;

        Ok(resp.bytes().await?.to_vec())
    }

    /// Send a POST request with an empty body, discarding the response.
    async fn post_empty(&self, url: Url) -> Result<(), Error> {
        debug!("POST {url}");

        self.prepare(self.http.post(url), self.timeout)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    // ── Fetch endpoints ──────────────────────────────────────────────

    /// Fetch the daemon configuration.
    ///
    /// `GET /rest/system/config`
    pub async fn config(&self) -> Result<SystemConfig, Error> {
        let url = self.rest_url("system/config")?;
        self.get_json(url, self.timeout).await
    }

    /// Fetch the daemon status (own device id et al).
    ///
    /// `GET /rest/system/status`
    pub async fn status(&self) -> Result<SystemStatus, Error> {
        let url = self.rest_url("system/status")?;
        self.get_json(url, self.timeout).await
    }

    /// Fetch traffic totals and per-device connection info.
    ///
    /// `GET /rest/system/connections`
    pub async fn connections(&self) -> Result<ConnectionsReport, Error> {
        let url = self.rest_url("system/connections")?;
        self.get_json(url, self.timeout).await
    }

    /// Fetch per-folder statistics (last scan, last synced file).
    ///
    /// `GET /rest/stats/folder`
    pub async fn folder_stats(&self) -> Result<FolderStatsReport, Error> {
        let url = self.rest_url("stats/folder")?;
        self.get_json(url, self.timeout).await
    }

    /// Fetch per-device statistics (last seen).
    ///
    /// `GET /rest/stats/device`
    pub async fn device_stats(&self) -> Result<DeviceStatsReport, Error> {
        let url = self.rest_url("stats/device")?;
        self.get_json(url, self.timeout).await
    }

    /// Fetch outstanding daemon errors.
    ///
    /// `GET /rest/system/error`
    pub async fn errors(&self) -> Result<ErrorReport, Error> {
        let url = self.rest_url("system/error")?;
        self.get_json(url, self.timeout).await
    }

    /// Long-poll the event stream for events after `since`.
    ///
    /// `GET /rest/events?since=<id>` — the `since` parameter is omitted
    /// when zero, which asks the daemon for the whole backlog. Blocks up
    /// to the long-poll timeout when no new events are available.
    pub async fn events(&self, since: u64) -> Result<Vec<RawEvent>, Error> {
        let mut url = self.rest_url("events")?;
        if since != 0 {
            url.query_pairs_mut()
                .append_pair("since", &since.to_string());
        }
        self.get_json(url, self.long_poll_timeout).await
    }

    /// Fetch the daemon log.
    ///
    /// `GET /rest/system/log`
    pub async fn log(&self) -> Result<Vec<LogEntry>, Error> {
        let url = self.rest_url("system/log")?;
        let report: LogReport = self.get_json(url, self.timeout).await?;
        Ok(report.messages)
    }

    /// Fetch a QR code image for the given text.
    ///
    /// `GET /qr/?text=<t>` — served from the daemon's raw path, not
    /// under `/rest/`.
    pub async fn qr_code(&self, text: &str) -> Result<Vec<u8>, Error> {
        let mut url = self.raw_url("/qr/")?;
        url.query_pairs_mut().append_pair("text", text);
        self.get_bytes(url).await
    }

    // ── Command endpoints ────────────────────────────────────────────

    /// Pause the device with the given id.
    ///
    /// `POST /rest/system/pause?device=<id>`
    pub async fn pause(&self, device_id: &str) -> Result<(), Error> {
        let mut url = self.rest_url("system/pause")?;
        url.query_pairs_mut().append_pair("device", device_id);
        self.post_empty(url).await
    }

    /// Resume the device with the given id.
    ///
    /// `POST /rest/system/resume?device=<id>`
    pub async fn resume(&self, device_id: &str) -> Result<(), Error> {
        let mut url = self.rest_url("system/resume")?;
        url.query_pairs_mut().append_pair("device", device_id);
        self.post_empty(url).await
    }

    /// Trigger a rescan of the folder with the given id.
    ///
    /// `POST /rest/db/scan?folder=<id>`
    pub async fn rescan(&self, folder_id: &str) -> Result<(), Error> {
        let mut url = self.rest_url("db/scan")?;
        url.query_pairs_mut().append_pair("folder", folder_id);
        self.post_empty(url).await
    }

    /// Ask the daemon to restart.
    ///
    /// `POST /rest/system/restart`
    pub async fn restart(&self) -> Result<(), Error> {
        let url = self.rest_url("system/restart")?;
        self.post_empty(url).await
    }

    /// Ask the daemon to exit without restarting.
    ///
    /// `POST /rest/system/shutdown`
    pub async fn shutdown(&self) -> Result<(), Error> {
        let url = self.rest_url("system/shutdown")?;
        self.post_empty(url).await
    }
}
