use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// Everything needed to reach a daemon plus the polling cadence.
///
/// Applying a new settings value with [`ConnectionSettings::apply`]
/// reports whether the change touches the transport (URL, credentials,
/// trusted certificates) and therefore requires a reconnect; interval
/// changes take effect on the next poll without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Base URL of the daemon, e.g. `http://127.0.0.1:8384`.
    pub daemon_url: String,
    /// API key sent as `X-API-Key` on every request.
    pub api_key: String,
    /// Optional HTTP basic auth user.
    pub user: String,
    /// Optional HTTP basic auth password.
    pub password: String,
    /// PEM certificates to trust in addition to the system roots.
    pub cert_exceptions: Vec<PathBuf>,
    /// Interval between traffic (connections) polls.
    pub traffic_poll_interval: Duration,
    /// Interval between device and folder statistics polls.
    pub device_stats_poll_interval: Duration,
    /// Delay before automatic reconnect attempts. Zero disables them.
    pub reconnect_interval: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            daemon_url: String::new(),
            api_key: String::new(),
            user: String::new(),
            password: String::new(),
            cert_exceptions: Vec::new(),
            traffic_poll_interval: Duration::from_secs(2),
            device_stats_poll_interval: Duration::from_secs(60),
            reconnect_interval: Duration::ZERO,
        }
    }
}

impl ConnectionSettings {
    /// Whether enough is configured to attempt a connection.
    pub fn is_sufficient(&self) -> bool {
        !self.daemon_url.is_empty() && !self.api_key.is_empty()
    }

    /// Replace these settings with `new`, returning `true` when the
    /// transport changed and the connection must be re-established.
    pub fn apply(&mut self, new: ConnectionSettings) -> bool {
        let reconnect_required = self.daemon_url != new.daemon_url
            || self.api_key != new.api_key
            || self.user != new.user
            || self.password != new.password
            || self.cert_exceptions != new.cert_exceptions;
        *self = new;
        reconnect_required
    }

    /// Locate the daemon's own HTTPS certificate for local TLS
    /// connections. Only applies when the URL is HTTPS and points at
    /// this host; remote daemons are expected to present a certificate
    /// the system already trusts or one listed in `cert_exceptions`.
    ///
    /// `config_dir` is the daemon's reported configuration directory,
    /// preferred when known; otherwise the default Syncthing location
    /// for the current user is tried.
    pub fn local_certificate(&self, config_dir: Option<&str>) -> Option<PathBuf> {
        let url = Url::parse(&self.daemon_url).ok()?;
        if url.scheme() != "https" || !is_local(&url) {
            return None;
        }
        let candidate = match config_dir {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("https-cert.pem"),
            _ => {
                let dirs = directories::BaseDirs::new()?;
                dirs.config_local_dir().join("syncthing/https-cert.pem")
            }
        };
        candidate.is_file().then_some(candidate)
    }
}

/// Whether a URL points at the machine we are running on.
pub(crate) fn is_local(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(host)) => host.eq_ignore_ascii_case("localhost"),
        Some(url::Host::Ipv4(addr)) => addr.is_loopback(),
        Some(url::Host::Ipv6(addr)) => addr.is_loopback(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sufficiency_needs_url_and_key() {
        let mut settings = ConnectionSettings::default();
        assert!(!settings.is_sufficient());
        settings.daemon_url = "http://127.0.0.1:8384".into();
        assert!(!settings.is_sufficient());
        settings.api_key = "abc".into();
        assert!(settings.is_sufficient());
    }

    #[test]
    fn apply_flags_transport_changes_only() {
        let mut settings = ConnectionSettings {
            daemon_url: "http://127.0.0.1:8384".into(),
            api_key: "abc".into(),
            ..ConnectionSettings::default()
        };

        let mut faster = settings.clone();
        faster.traffic_poll_interval = Duration::from_secs(1);
        assert!(!settings.apply(faster));
        assert_eq!(settings.traffic_poll_interval, Duration::from_secs(1));

        let mut moved = settings.clone();
        moved.daemon_url = "http://127.0.0.1:8385".into();
        assert!(settings.apply(moved));

        let mut rekeyed = settings.clone();
        rekeyed.api_key = "def".into();
        assert!(settings.apply(rekeyed));
    }

    #[test]
    fn local_detection() {
        assert!(is_local(&Url::parse("https://localhost:8384").unwrap()));
        assert!(is_local(&Url::parse("https://127.0.0.1:8384").unwrap()));
        assert!(is_local(&Url::parse("https://[::1]:8384").unwrap()));
        assert!(!is_local(&Url::parse("https://syncthing.example:8384").unwrap()));
    }

    #[test]
    fn local_certificate_prefers_reported_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("https-cert.pem");
        std::fs::write(&cert, "---").unwrap();

        let settings = ConnectionSettings {
            daemon_url: "https://localhost:8384".into(),
            api_key: "abc".into(),
            ..ConnectionSettings::default()
        };
        assert_eq!(
            settings.local_certificate(Some(dir.path().to_str().unwrap())),
            Some(cert)
        );

        let remote = ConnectionSettings {
            daemon_url: "https://syncthing.example:8384".into(),
            ..settings
        };
        assert_eq!(
            remote.local_certificate(Some(dir.path().to_str().unwrap())),
            None
        );
    }
}
