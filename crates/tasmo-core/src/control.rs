// ── Device control service ──
//
// Typed wrappers over the command protocol: each operation owns its exact
// command string and its failure mode (strict or lenient). Also hosts the
// polling primitives the lifecycle flows wait on.

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tasmo_api::{CommandClient, Invocation, PowerState, PubSubSettings, StatusReport};

use crate::config::Timings;
use crate::error::CoreError;
use crate::model::MacAddress;

/// What to do with an output channel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerAction {
    On,
    Off,
    Toggle,
}

impl From<PowerState> for PowerAction {
    fn from(state: PowerState) -> Self {
        match state {
            PowerState::On => Self::On,
            PowerState::Off => Self::Off,
        }
    }
}

// ── Polling ──────────────────────────────────────────────────────────

/// Result of a completed poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOutcome {
    pub succeeded: bool,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

/// Evaluate `predicate` up to `max_attempts` times, pausing `interval`
/// between attempts, until it yields `true`. An error counts as `false`.
///
/// Returns `None` when `cancel` fires first.
pub async fn poll_until<F, Fut>(
    mut predicate: F,
    max_attempts: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> Option<PollOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, CoreError>>,
{
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return None;
        }
        match predicate().await {
            Ok(true) => {
                return Some(PollOutcome {
                    succeeded: true,
                    attempts: attempt,
                });
            }
            Ok(false) => {}
            Err(e) => debug!(attempt, error = %e, "poll attempt failed"),
        }
        if attempt < max_attempts {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }
    Some(PollOutcome {
        succeeded: false,
        attempts: max_attempts,
    })
}

// ── DeviceControl ────────────────────────────────────────────────────

/// Issues lifecycle commands to devices.
pub struct DeviceControl {
    client: Arc<dyn CommandClient>,
    fleet_prefix: String,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl DeviceControl {
    pub fn new(
        client: Arc<dyn CommandClient>,
        fleet_prefix: impl Into<String>,
        timings: &Timings,
    ) -> Self {
        Self {
            client,
            fleet_prefix: fleet_prefix.into(),
            poll_interval: timings.poll_interval,
            poll_attempts: timings.poll_attempts,
        }
    }

    /// Point the device at the broker and enable telemetry.
    ///
    /// An empty `Backlog` goes first to flush anything still queued on the
    /// device from an earlier flow.
    pub async fn configure_pubsub(
        &self,
        address: Ipv4Addr,
        topic: &str,
        settings: &PubSubSettings,
    ) -> Result<(), CoreError> {
        self.strict(address, "Backlog", None).await?;
        let params = format!(
            "Topic {topic}; Delay 20; MqttHost {}; MqttPort {}; MqttUser {}; MqttPassword {}; SetOption3 1; SetOption19 1",
            settings.host,
            settings.port,
            settings.username,
            settings.password.expose_secret(),
        );
        self.strict(address, "Backlog", Some(&params)).await?;
        Ok(())
    }

    /// Restore broker defaults and stop telemetry. Best effort.
    pub async fn clear_pubsub(&self, address: Ipv4Addr) -> Result<(), CoreError> {
        self.lenient(
            address,
            "Backlog",
            Some("MqttHost 1; MqttPort 1; MqttUser 1; MqttPassword 1; SetOption19 0; SetOption59 0"),
        )
        .await?;
        Ok(())
    }

    /// Send a `;`-joined list of commands as one backlog.
    pub async fn configure_device(
        &self,
        address: Ipv4Addr,
        commands: &str,
    ) -> Result<(), CoreError> {
        self.strict(address, "Backlog", Some(commands)).await?;
        Ok(())
    }

    /// Factory reset. `keep_wifi` preserves the network credentials.
    pub async fn reset(&self, address: Ipv4Addr, keep_wifi: bool) -> Result<(), CoreError> {
        let mode = if keep_wifi { "4" } else { "1" };
        self.strict(address, "Reset", Some(mode)).await?;
        Ok(())
    }

    pub async fn restart(&self, address: Ipv4Addr) -> Result<(), CoreError> {
        self.strict(address, "Restart", Some("1")).await?;
        Ok(())
    }

    /// Switch output `index` (0 addresses every channel).
    pub async fn set_power(
        &self,
        address: Ipv4Addr,
        index: u8,
        action: PowerAction,
    ) -> Result<(), CoreError> {
        let command = format!("Power{index}");
        self.strict(address, &command, Some(&action.to_string())).await?;
        Ok(())
    }

    /// Ask the device to publish its id on the fleet's test topic. The
    /// message only reaches us if its broker settings work.
    pub async fn test_pubsub(
        &self,
        address: Ipv4Addr,
        topic: &str,
        id: &MacAddress,
    ) -> Result<(), CoreError> {
        let params = format!("{}/{topic}/mqttWorks {id}", self.fleet_prefix);
        self.lenient(address, "Publish", Some(&params)).await?;
        Ok(())
    }

    /// `Status 0` plus the active template. `None` if the device does not
    /// answer either call or the status does not parse.
    pub async fn fetch_full_status(
        &self,
        address: Ipv4Addr,
    ) -> Result<Option<StatusReport>, CoreError> {
        let Some(body) = self.lenient(address, "Status", Some("0")).await? else {
            return Ok(None);
        };
        let Some(template) = self.lenient(address, "Template", None).await? else {
            return Ok(None);
        };
        match StatusReport::from_body(&body) {
            Ok(mut report) => {
                report.template = template;
                Ok(Some(report))
            }
            Err(e) => {
                warn!(address = %address, error = %e, "unparseable status report");
                Ok(None)
            }
        }
    }

    /// Whether the device answers a trivial query.
    pub async fn is_responding(&self, address: Ipv4Addr) -> bool {
        matches!(self.lenient(address, "Power", None).await, Ok(Some(_)))
    }

    pub async fn upgrade(&self, address: Ipv4Addr) -> Result<(), CoreError> {
        self.strict(address, "Upgrade", Some("1")).await?;
        Ok(())
    }

    /// Sleep `settle`, then poll [`is_responding`](Self::is_responding).
    /// Returns `None` if cancelled at any point.
    pub async fn wait_for_responding(
        &self,
        address: Ipv4Addr,
        settle: Duration,
        cancel: &CancellationToken,
    ) -> Option<PollOutcome> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(settle) => {}
        }
        poll_until(
            || async move { Ok::<_, CoreError>(self.is_responding(address).await) },
            self.poll_attempts,
            self.poll_interval,
            cancel,
        )
        .await
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn strict(
        &self,
        address: Ipv4Addr,
        command: &str,
        params: Option<&str>,
    ) -> Result<Option<String>, CoreError> {
        Ok(self
            .client
            .invoke(address, command, params, Invocation::Strict)
            .await?)
    }

    async fn lenient(
        &self,
        address: Ipv4Addr,
        command: &str,
        params: Option<&str>,
    ) -> Result<Option<String>, CoreError> {
        Ok(self
            .client
            .invoke(address, command, params, Invocation::Lenient)
            .await?)
    }
}
