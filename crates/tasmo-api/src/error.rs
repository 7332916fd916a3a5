use std::net::Ipv4Addr;

use thiserror::Error;

/// Top-level error type for the `tasmo-api` crate.
///
/// Covers the HTTP command channel. The in-process broker never fails.
/// `tasmo-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Device ──────────────────────────────────────────────────────
    /// A strict command got no answer (timeout, refused, unreachable).
    #[error("Device at {address} is not responding")]
    DeviceUnresponsive { address: Ipv4Addr },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error outside of a device invocation
    /// (client construction, TLS backend initialization).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL construction error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the device behind a command stopped answering.
    pub fn is_unresponsive(&self) -> bool {
        matches!(self, Self::DeviceUnresponsive { .. })
    }

    /// Build a deserialization error, keeping the body for diagnostics.
    pub fn deserialization(err: &serde_json::Error, body: &str) -> Self {
        Self::Deserialization {
            message: err.to_string(),
            body: body.to_owned(),
        }
    }
}
