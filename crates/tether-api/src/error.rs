use thiserror::Error;

/// Top-level error type for the `tether-api` crate.
///
/// Covers every failure mode of talking to the daemon: transport,
/// HTTP status, malformed bodies, and client construction.
/// `tether-core` maps these into user-facing error notifications.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout,
    /// or a non-success status raised via `error_for_status`).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error while building the client.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the request timed out on the client side.
    ///
    /// A timed-out event long-poll means "no news", not a failure —
    /// the consumer is expected to simply poll again.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }

    /// Returns `true` for malformed response bodies.
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, Self::Deserialization { .. })
    }
}
