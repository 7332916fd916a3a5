// ── API-to-domain type conversions ──
//
// Bridges raw `tasmo_api` response types into canonical `tasmo_core::model`
// domain types. Parses address strings into strong types, strips firmware
// decorations, and fills defaults for anything the device left out.

use std::net::Ipv4Addr;

use serde_json::Value;
use tracing::warn;

use tasmo_api::{StatusReport, TelemetryState};

use crate::error::CoreError;
use crate::model::{DeviceStatus, DeviceUpdate, MacAddress};

// ── Helpers ────────────────────────────────────────────────────────

/// Parse an address, falling back to `0.0.0.0` for blanks and garbage.
fn parse_ip_or_unspecified(raw: &str) -> Ipv4Addr {
    raw.trim().parse().unwrap_or(Ipv4Addr::UNSPECIFIED)
}

/// Subnet prefix length from a dotted mask (`255.255.255.0` → 24).
pub fn prefix_length(mask: Ipv4Addr) -> u8 {
    u8::try_from(u32::from(mask).count_ones()).unwrap_or(32)
}

/// The `NAME` a template definition carries, if the definition parses.
pub fn template_name(definition: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(definition).ok()?;
    parsed.get("NAME")?.as_str().map(str::to_owned)
}

/// Cumulative downtime in `DdThh:mm:ss` form, as seconds.
pub fn parse_downtime(raw: &str) -> Option<u64> {
    let (days, clock) = raw.trim().split_once('T')?;
    let mut parts = clock.split(':').map(|p| p.parse::<u64>().ok());
    let hours = parts.next()??;
    let minutes = parts.next()??;
    let seconds = parts.next()??;
    let days: u64 = days.parse().ok()?;
    days.checked_mul(86_400)?
        .checked_add(hours.checked_mul(3_600)?)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}

/// Firmware version without the build flavour suffix (`9.1.0(tasmota)` → `9.1.0`).
pub fn firmware_version(raw: &str) -> String {
    raw.replace("(tasmota)", "").trim().to_owned()
}

// ── Telemetry → DeviceStatus ───────────────────────────────────────

impl From<&TelemetryState> for DeviceStatus {
    fn from(t: &TelemetryState) -> Self {
        Self {
            uptime_seconds: t.uptime_sec,
            heap_kb: t.heap,
            cpu_load: t.load_avg,
            mqtt_retries: t.mqtt_count,
            wifi_rssi: t.wifi.rssi,
            wifi_dbm: t.wifi.signal,
            wifi_retries: t.wifi.link_count,
            wifi_downtime_seconds: parse_downtime(&t.wifi.downtime).unwrap_or(0),
            power_states: t.power_states(),
        }
    }
}

// ── Status report → DeviceUpdate ───────────────────────────────────

impl TryFrom<&StatusReport> for DeviceUpdate {
    type Error = CoreError;

    /// Build the upsert a scan writes for a discovered device.
    ///
    /// Lifecycle fields (`state`, `adopted_at`, `provisioned_at`) are left
    /// untouched so a re-scan never disturbs an in-flight operation.
    fn try_from(report: &StatusReport) -> Result<Self, Self::Error> {
        let net = &report.network;
        if net.mac.trim().is_empty() {
            return Err(CoreError::InvalidStatus {
                message: "status report carries no MAC address".into(),
            });
        }
        let address: Ipv4Addr =
            net.ip_address
                .trim()
                .parse()
                .map_err(|_| CoreError::InvalidStatus {
                    message: format!("invalid IPAddress '{}'", net.ip_address),
                })?;

        let id = MacAddress::new(&net.mac);
        let template_name = template_name(&report.template);
        if template_name.is_none() && !report.template.trim().is_empty() {
            warn!(id = %id, "template definition has no NAME");
        }

        let mut update = DeviceUpdate::new(id);
        update.host_name = Some(net.host_name.clone());
        update.ipv4_address = Some(address);
        update.ipv4_subnet_prefix = Some(prefix_length(parse_ip_or_unspecified(&net.subnet_mask)));
        update.ipv4_gateway = Some(parse_ip_or_unspecified(&net.gateway));
        update.ipv4_name_server = Some(parse_ip_or_unspecified(&net.dns_server));
        update.topic_name = Some(report.status.topic.clone());
        update.friendly_names = Some(report.status.friendly_name.clone());
        update.firmware_version = Some(firmware_version(&report.firmware.version));
        update.firmware_size_kb = Some(report.memory.program_size);
        update.flash_size_kb = Some(report.memory.flash_size);
        update.hardware = Some(report.firmware.hardware.clone());
        update.restart_reason = Some(report.parameters.restart_reason.clone());
        update.telemetry_period_secs = report.log.tele_period;
        update.template_definition = Some(report.template.clone());
        update.template_name = template_name;
        update.status = Some(DeviceStatus::from(&report.telemetry));
        update.offline = Some(false);
        Ok(update)
    }
}
