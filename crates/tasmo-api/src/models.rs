//! Wire types for device responses.
//!
//! Field names follow the firmware's own JSON keys. Aliases cover the
//! casing differences between firmware releases.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Highest channel index the firmware reports as `POWERn`.
pub const MAX_CHANNELS: u8 = 8;

/// Generic command response: an ordered map that keeps the firmware's
/// partial-fields JSON shape (`{"POWER1":"ON"}`, `{"Command":"Unknown"}`).
pub type CommandResponse = IndexMap<String, Value>;

// ── PowerState ──────────────────────────────────────────────────────

/// Output state of one relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PowerState {
    On,
    #[default]
    Off,
}

impl PowerState {
    pub fn toggled(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("ON"),
            Self::Off => f.write_str("OFF"),
        }
    }
}

impl FromStr for PowerState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" | "1" => Ok(Self::On),
            "OFF" | "0" => Ok(Self::Off),
            other => Err(Error::Deserialization {
                message: format!("unknown power state '{other}'"),
                body: s.to_owned(),
            }),
        }
    }
}

// ── Status 0 ────────────────────────────────────────────────────────

/// Full status dump returned by `Status 0`.
///
/// `template` is not part of the response; it is attached from the
/// follow-up `Template` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "Status", default)]
    pub status: DeviceSection,

    #[serde(rename = "StatusPRM", alias = "StatusPrm", default)]
    pub parameters: ParametersSection,

    #[serde(rename = "StatusFWR", alias = "StatusFwr", default)]
    pub firmware: FirmwareSection,

    #[serde(rename = "StatusLOG", alias = "StatusLog", default)]
    pub log: LogSection,

    #[serde(rename = "StatusMEM", alias = "StatusMem", default)]
    pub memory: MemorySection,

    #[serde(rename = "StatusNET", alias = "StatusNet", default)]
    pub network: NetworkSection,

    #[serde(rename = "StatusSTS", alias = "StatusSts", default)]
    pub telemetry: TelemetryState,

    #[serde(skip)]
    pub template: String,
}

impl StatusReport {
    /// Parse a `Status 0` body.
    pub fn from_body(body: &str) -> Result<Self, Error> {
        serde_json::from_str(body).map_err(|e| Error::deserialization(&e, body))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceSection {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub friendly_name: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParametersSection {
    #[serde(default)]
    pub restart_reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FirmwareSection {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub hardware: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogSection {
    #[serde(default)]
    pub tele_period: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MemorySection {
    #[serde(default)]
    pub program_size: u32,
    #[serde(default)]
    pub flash_size: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(rename = "Hostname", alias = "HostName", default)]
    pub host_name: String,
    #[serde(rename = "IPAddress", alias = "IpAddress", default)]
    pub ip_address: String,
    #[serde(rename = "Gateway", default)]
    pub gateway: String,
    #[serde(rename = "Subnetmask", alias = "SubnetMask", default)]
    pub subnet_mask: String,
    #[serde(rename = "DNSServer", alias = "DnsServer", alias = "DNSServer1", default)]
    pub dns_server: String,
    #[serde(rename = "Mac", default)]
    pub mac: String,
}

// ── Telemetry ───────────────────────────────────────────────────────

/// Periodic state report (`StatusSTS`, and the `tele/<topic>/STATE` payload).
///
/// Channel states live in `channels` under their firmware keys:
/// `POWER` on single-channel devices, `POWER1`..`POWER8` otherwise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryState {
    #[serde(rename = "UptimeSec", default)]
    pub uptime_sec: u64,
    #[serde(rename = "Heap", default)]
    pub heap: u32,
    #[serde(rename = "LoadAvg", default)]
    pub load_avg: u32,
    #[serde(rename = "MqttCount", default)]
    pub mqtt_count: u32,
    #[serde(rename = "Wifi", alias = "WiFi", default)]
    pub wifi: WifiState,
    #[serde(flatten)]
    pub channels: IndexMap<String, Value>,
}

impl TelemetryState {
    /// Parse a telemetry payload.
    pub fn from_body(body: &str) -> Result<Self, Error> {
        serde_json::from_str(body).map_err(|e| Error::deserialization(&e, body))
    }

    /// Firmware key for a channel: `POWER` for `None`, `POWERn` otherwise.
    pub fn power_key(index: Option<u8>) -> String {
        match index {
            Some(i) => format!("POWER{i}"),
            None => "POWER".to_owned(),
        }
    }

    /// State of one channel, if reported.
    pub fn power(&self, index: Option<u8>) -> Option<PowerState> {
        self.channels
            .get(&Self::power_key(index))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn set_power(&mut self, index: Option<u8>, state: PowerState) {
        self.channels
            .insert(Self::power_key(index), Value::String(state.to_string()));
    }

    /// All reported channel states in channel order.
    pub fn power_states(&self) -> Vec<PowerState> {
        std::iter::once(None)
            .chain((1..=MAX_CHANNELS).map(Some))
            .filter_map(|index| self.power(index))
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WifiState {
    #[serde(rename = "RSSI", alias = "Rssi", default)]
    pub rssi: i32,
    #[serde(rename = "Signal", default)]
    pub signal: i32,
    #[serde(rename = "LinkCount", default)]
    pub link_count: u32,
    /// Cumulative downtime as `DdThh:mm:ss`.
    #[serde(rename = "Downtime", default)]
    pub downtime: String,
}
