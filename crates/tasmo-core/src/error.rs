// ── Core error types ──
//
// Errors surfaced by the orchestration layer. Consumers never see HTTP
// or JSON failures directly: the `From<tasmo_api::Error>` impl folds
// transport-layer errors into domain variants.

use std::net::Ipv4Addr;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Device errors ────────────────────────────────────────────────
    /// A strict device call got no answer. Orchestrator entry points turn
    /// this into "mark offline" instead of surfacing it.
    #[error("Device at {address} is not responding")]
    DeviceUnresponsive { address: Ipv4Addr },

    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    #[error("Invalid device status: {message}")]
    InvalidStatus { message: String },

    // ── Collaborator errors ──────────────────────────────────────────
    #[error("API error: {message}")]
    Api { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Orchestrator is not running")]
    NotRunning,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn is_unresponsive(&self) -> bool {
        matches!(self, Self::DeviceUnresponsive { .. })
    }

    pub(crate) fn device_not_found(identifier: impl ToString) -> Self {
        Self::DeviceNotFound {
            identifier: identifier.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tasmo_api::Error> for CoreError {
    fn from(err: tasmo_api::Error) -> Self {
        match err {
            tasmo_api::Error::DeviceUnresponsive { address } => {
                CoreError::DeviceUnresponsive { address }
            }
            tasmo_api::Error::Deserialization { message, body: _ } => {
                CoreError::InvalidStatus { message }
            }
            tasmo_api::Error::Transport(e) => CoreError::Api {
                message: e.to_string(),
            },
            tasmo_api::Error::InvalidUrl(e) => CoreError::Api {
                message: format!("Invalid URL: {e}"),
            },
        }
    }
}
