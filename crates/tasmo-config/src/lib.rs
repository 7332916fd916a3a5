//! Configuration for the tasmofleet daemon.
//!
//! Layered TOML + environment loading, broker password resolution, and
//! translation to `tasmo_core::OrchestratorConfig`. The YAML seed that
//! pre-loads templates and device configurations lives in [`seed`].

pub mod seed;

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tasmo_api::PubSubSettings;
use tasmo_api::pubsub::{DEFAULT_PORT, DEFAULT_USER};
use tasmo_core::config::DEFAULT_FLEET_PREFIX;
use tasmo_core::{OrchestratorConfig, Timings};

pub use seed::{Seed, SeedError, load_seed, parse_seed};

/// Prefix of the environment overrides (`TASMOFLEET_PUBSUB__HOST`).
pub const ENV_PREFIX: &str = "TASMOFLEET_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Seed(#[from] SeedError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkSection,

    #[serde(default)]
    pub pubsub: PubSubSection,

    #[serde(default)]
    pub timings: TimingsSection,

    /// YAML seed applied to the store at startup.
    pub seed_file: Option<PathBuf>,

    /// Oldest firmware accepted without a warning. Defaults to the
    /// release the command set was written against.
    pub required_firmware: Option<String>,
}

/// The managed subnet and how hard to scan it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NetworkSection {
    /// Any address in the managed /24.
    pub subnet: Ipv4Addr,
    pub first: u8,
    pub last: u8,
    pub scan_concurrency: usize,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            subnet: Ipv4Addr::new(192, 168, 1, 0),
            first: 1,
            last: 254,
            scan_concurrency: 64,
        }
    }
}

/// Broker the devices are pointed at during adoption.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PubSubSection {
    pub host: String,
    pub port: u16,
    pub username: String,

    /// Plaintext password. Prefer `password_env`.
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    pub fleet_prefix: String,
}

impl Default for PubSubSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            username: DEFAULT_USER.to_owned(),
            password: None,
            password_env: None,
            fleet_prefix: DEFAULT_FLEET_PREFIX.to_owned(),
        }
    }
}

/// Flow delays, all in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimingsSection {
    pub command_timeout: u64,
    pub scan_timeout: u64,
    pub adoption_settle: u64,
    pub restart_settle: u64,
    pub upgrade_settle: u64,
    pub poll_interval: u64,
    pub poll_attempts: u32,
    pub liveness_interval: u64,
    pub liveness_probe_timeout: u64,
}

impl Default for TimingsSection {
    fn default() -> Self {
        Self {
            command_timeout: 5,
            scan_timeout: 5,
            adoption_settle: 5,
            restart_settle: 5,
            upgrade_settle: 120,
            poll_interval: 1,
            poll_attempts: 5,
            liveness_interval: 60,
            liveness_probe_timeout: 5,
        }
    }
}

impl From<&TimingsSection> for Timings {
    fn from(t: &TimingsSection) -> Self {
        Self {
            command_timeout: Duration::from_secs(t.command_timeout),
            scan_timeout: Duration::from_secs(t.scan_timeout),
            adoption_settle: Duration::from_secs(t.adoption_settle),
            restart_settle: Duration::from_secs(t.restart_settle),
            upgrade_settle: Duration::from_secs(t.upgrade_settle),
            poll_interval: Duration::from_secs(t.poll_interval),
            poll_attempts: t.poll_attempts,
            liveness_interval: Duration::from_secs(t.liveness_interval),
            liveness_probe_timeout: Duration::from_secs(t.liveness_probe_timeout),
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "tasmofleet", "tasmofleet").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("tasmofleet");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `TASMOFLEET_*` variables.
/// A missing file is not an error.
pub fn figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the config from `path`, or from [`config_path`] when `None`.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config: Config = figment(&path).extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

impl PubSubSection {
    /// Password from the variable named by `password_env`, then the
    /// plaintext value, then empty.
    pub fn resolve_password(&self) -> SecretString {
        if let Some(value) = self
            .password_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
        {
            return SecretString::from(value);
        }
        SecretString::from(self.password.clone().unwrap_or_default())
    }

    pub fn settings(&self) -> PubSubSettings {
        PubSubSettings {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: self.resolve_password(),
        }
    }
}

impl Config {
    /// Validate and build the orchestrator's runtime configuration.
    pub fn to_orchestrator_config(&self) -> Result<OrchestratorConfig, ConfigError> {
        let network = &self.network;
        if network.first == 0 {
            return Err(ConfigError::validation("network.first", "must be at least 1"));
        }
        if network.first > network.last {
            return Err(ConfigError::validation(
                "network.first",
                format!("{} is above network.last ({})", network.first, network.last),
            ));
        }
        if network.scan_concurrency == 0 {
            return Err(ConfigError::validation(
                "network.scan_concurrency",
                "must be at least 1",
            ));
        }
        let prefix = self.pubsub.fleet_prefix.trim();
        if prefix.is_empty() {
            return Err(ConfigError::validation("pubsub.fleet_prefix", "must not be empty"));
        }
        if self.timings.poll_attempts == 0 {
            return Err(ConfigError::validation("timings.poll_attempts", "must be at least 1"));
        }

        let mut config = OrchestratorConfig {
            subnet: network.subnet,
            scan_first: network.first,
            scan_last: network.last,
            scan_concurrency: network.scan_concurrency,
            pubsub: self.pubsub.settings(),
            fleet_prefix: prefix.to_owned(),
            timings: Timings::from(&self.timings),
            ..OrchestratorConfig::default()
        };
        if let Some(required) = &self.required_firmware {
            config.required_firmware = required.trim().to_owned();
        }
        // Anything the core checks beyond the above (topic wildcards).
        config
            .validate()
            .map_err(|e| ConfigError::validation("config", e.to_string()))?;
        Ok(config)
    }
}
