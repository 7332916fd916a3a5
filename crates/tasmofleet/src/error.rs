//! Daemon error types with miette diagnostics.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use tasmo_config::{ConfigError, SeedError};
use tasmo_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────
    #[error("Invalid configuration")]
    #[diagnostic(
        code(tasmofleet::config),
        help("Check the config file at {path} and any TASMOFLEET_* variables.")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Seed file {} is invalid", path.display())]
    #[diagnostic(
        code(tasmofleet::seed),
        help("Every device needs a 'mac' and every templateName a key under 'templates'.")
    )]
    Seed {
        path: PathBuf,
        #[source]
        source: SeedError,
    },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(tasmofleet::core))]
    Core(#[from] CoreError),

    #[error("Could not set up the device client")]
    #[diagnostic(code(tasmofleet::client))]
    Client(#[source] tasmo_api::Error),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(tasmofleet::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. }
            | Self::Seed { .. }
            | Self::Core(CoreError::ValidationFailed { .. }) => exit_code::USAGE,
            Self::Core(CoreError::DeviceUnresponsive { .. }) | Self::Client(_) => {
                exit_code::CONNECTION
            }
            Self::Core(_) | Self::Io(_) | Self::Yaml(_) => exit_code::GENERAL,
        }
    }
}
