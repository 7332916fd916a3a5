// ── Runtime orchestration configuration ──
//
// Built by the config crate (or by tests) and handed to the
// `Orchestrator`. Core never reads config files. Every delay the
// lifecycle flows wait on lives in `Timings`, so tests and emulated
// fleets can shorten them without touching global state.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::time::Duration;

use tasmo_api::PubSubSettings;

use crate::error::CoreError;
use crate::model::REQUIRED_FIRMWARE_VERSION;

/// Default topic namespace for connectivity test pings.
pub const DEFAULT_FLEET_PREFIX: &str = "tasmofleet";

/// Delays and bounds for every network-facing flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Per-command HTTP timeout.
    pub command_timeout: Duration,
    /// Bound on one whole network scan.
    pub scan_timeout: Duration,
    /// Wait before polling a device that was just adopted.
    pub adoption_settle: Duration,
    /// Wait before polling a device that was restarted or reset.
    pub restart_settle: Duration,
    /// Wait before polling a device that is flashing new firmware.
    pub upgrade_settle: Duration,
    /// Pause between poll attempts.
    pub poll_interval: Duration,
    pub poll_attempts: u32,
    pub liveness_interval: Duration,
    pub liveness_probe_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(5),
            scan_timeout: Duration::from_secs(5),
            adoption_settle: Duration::from_secs(5),
            restart_settle: Duration::from_secs(5),
            upgrade_settle: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
            poll_attempts: 5,
            liveness_interval: Duration::from_secs(60),
            liveness_probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Configuration for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Any address in the managed /24; only the first three octets are used.
    pub subnet: Ipv4Addr,
    pub scan_first: u8,
    pub scan_last: u8,
    /// Upper bound on concurrent scan probes.
    pub scan_concurrency: usize,
    /// Broker settings pushed to devices during adoption.
    pub pubsub: PubSubSettings,
    pub fleet_prefix: String,
    pub required_firmware: String,
    pub timings: Timings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            subnet: Ipv4Addr::new(192, 168, 1, 0),
            scan_first: 1,
            scan_last: 254,
            scan_concurrency: 64,
            pubsub: PubSubSettings::default(),
            fleet_prefix: DEFAULT_FLEET_PREFIX.to_owned(),
            required_firmware: REQUIRED_FIRMWARE_VERSION.to_owned(),
            timings: Timings::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn scan_range(&self) -> RangeInclusive<u8> {
        self.scan_first..=self.scan_last
    }

    /// Address of host `octet` inside the managed subnet.
    pub fn host_address(&self, octet: u8) -> Ipv4Addr {
        let [a, b, c, _] = self.subnet.octets();
        Ipv4Addr::new(a, b, c, octet)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.scan_first == 0 || self.scan_first > self.scan_last {
            return Err(CoreError::ValidationFailed {
                message: format!(
                    "scan range {}..={} must be non-empty and start at 1 or above",
                    self.scan_first, self.scan_last
                ),
            });
        }
        if self.scan_concurrency == 0 {
            return Err(CoreError::ValidationFailed {
                message: "scan concurrency must be at least 1".into(),
            });
        }
        if self.fleet_prefix.trim().is_empty() || self.fleet_prefix.contains(['/', '+', '#']) {
            return Err(CoreError::ValidationFailed {
                message: format!("invalid fleet prefix '{}'", self.fleet_prefix),
            });
        }
        if self.timings.poll_attempts == 0 {
            return Err(CoreError::ValidationFailed {
                message: "poll attempts must be at least 1".into(),
            });
        }
        Ok(())
    }
}
