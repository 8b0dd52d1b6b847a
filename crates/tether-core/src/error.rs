use thiserror::Error;

/// Top-level error type for the `tether-core` crate.
///
/// Command failures are not returned to callers — they surface as
/// [`ConnectionUpdate::Error`](crate::ConnectionUpdate::Error)
/// notifications — so this type mostly shows up internally and in the
/// few fallible constructors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from the daemon API client.
    #[error(transparent)]
    Api(#[from] tether_api::Error),

    /// The daemon URL could not be parsed.
    #[error("Invalid daemon URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Connection configuration is insufficient (missing URL or API key).
    #[error("Connection configuration is insufficient")]
    InsufficientConfiguration,
}
