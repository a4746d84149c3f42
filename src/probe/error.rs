//! Error types for probing and descriptor decoding

use std::io;
use thiserror::Error;

/// Failure of a single probe operation.
///
/// The `Display` text is what a failed result carries as its error message.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Connection failed: {0}")]
    Connect(#[source] io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("Could not resolve {0}")]
    Resolve(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid server name: {0}")]
    InvalidServerName(String),
}

impl ProbeError {
    /// Whether the probe ran out of time rather than being refused or rejected
    pub fn is_timeout(&self) -> bool {
        match self {
            ProbeError::Timeout => true,
            ProbeError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Failure to turn a descriptor URI into a [`Descriptor`](super::Descriptor).
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unsupported scheme in {0}")]
    UnsupportedScheme(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),
}
