// Transport configuration for building reqwest::Client instances.
//
// The daemon's GUI listener commonly uses a self-signed certificate, so
// the config carries a list of PEM files to trust as additional roots.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;

/// Transport configuration for the daemon HTTP client.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Per-request timeout for ordinary REST calls.
    pub timeout: Duration,
    /// Per-request timeout for the event long-poll. Must comfortably
    /// exceed the daemon's own long-poll window (60 s by default) so a
    /// quiet daemon answers with an empty batch before we give up.
    pub long_poll_timeout: Duration,
    /// Additional trusted root certificates (PEM files), typically the
    /// daemon's own `https-cert.pem` for local instances.
    pub trusted_certificates: Vec<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            long_poll_timeout: Duration::from_secs(120),
            trusted_certificates: Vec::new(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    ///
    /// No default timeout is set on the client itself; the per-request
    /// timeouts above are applied by [`RestClient`](crate::RestClient)
    /// so the long-poll can outlive ordinary requests.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder().user_agent(concat!(
            "tether/",
            env!("CARGO_PKG_VERSION")
        ));

        for path in &self.trusted_certificates {
            let pem = std::fs::read(path).map_err(|e| {
                Error::Tls(format!("failed to read certificate {}: {e}", path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                Error::Tls(format!("invalid certificate {}: {e}", path.display()))
            })?;
            builder = builder.add_root_certificate(cert);
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}
