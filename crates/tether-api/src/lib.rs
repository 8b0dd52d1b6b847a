// tether-api: async client for the Syncthing REST control API

pub mod client;
pub mod error;
pub mod models;
pub mod transport;

pub use client::RestClient;
pub use error::Error;
pub use transport::TransportConfig;
