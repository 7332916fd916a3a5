// ── Device domain types ──

use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use tasmo_api::PowerState;

use super::entity_id::MacAddress;

/// Oldest firmware release the fleet manages without flagging.
pub const REQUIRED_FIRMWARE_VERSION: &str = "8.2.0";

/// Pending lifecycle operation on a device. `None` on the device means
/// steady state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum DeviceState {
    AdoptionPending,
    Adopting,
    ProvisionPending,
    Provisioning,
    Restarting,
    Upgrading,
}

/// Live status a device reports, persisted with the device record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub uptime_seconds: u64,
    pub heap_kb: u32,
    pub cpu_load: u32,
    pub mqtt_retries: u32,
    pub wifi_rssi: i32,
    pub wifi_dbm: i32,
    pub wifi_retries: u32,
    pub wifi_downtime_seconds: u64,
    pub power_states: Vec<PowerState>,
}

/// One physical relay device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: MacAddress,
    pub host_name: String,
    pub ipv4_address: Ipv4Addr,
    pub ipv4_subnet_prefix: u8,
    pub ipv4_gateway: Ipv4Addr,
    pub ipv4_name_server: Ipv4Addr,
    pub topic_name: String,
    pub friendly_names: Vec<String>,
    pub firmware_version: String,
    pub firmware_size_kb: u32,
    pub flash_size_kb: u32,
    pub hardware: String,
    pub restart_reason: String,
    pub telemetry_period_secs: Option<u32>,
    pub template_definition: String,
    pub template_name: Option<String>,
    pub status: DeviceStatus,
    #[serde(default)]
    pub offline: bool,
    pub state: Option<DeviceState>,
    pub adopted_at: Option<DateTime<Utc>>,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Device {
    /// Empty record for `id`, the base an upsert writes onto.
    pub fn new(id: MacAddress) -> Self {
        Self {
            id,
            host_name: String::new(),
            ipv4_address: Ipv4Addr::UNSPECIFIED,
            ipv4_subnet_prefix: 0,
            ipv4_gateway: Ipv4Addr::UNSPECIFIED,
            ipv4_name_server: Ipv4Addr::UNSPECIFIED,
            topic_name: String::new(),
            friendly_names: Vec::new(),
            firmware_version: String::new(),
            firmware_size_kb: 0,
            flash_size_kb: 0,
            hardware: String::new(),
            restart_reason: String::new(),
            telemetry_period_secs: None,
            template_definition: String::new(),
            template_name: None,
            status: DeviceStatus::default(),
            offline: false,
            state: None,
            adopted_at: None,
            provisioned_at: None,
            updated_at: Utc::now(),
        }
    }

    /// Managed devices have completed adoption at least once.
    pub fn is_adopted(&self) -> bool {
        self.adopted_at.is_some()
    }

    /// Whether the running firmware is at least `required`.
    pub fn firmware_supported(&self, required: &str) -> bool {
        firmware_supported(&self.firmware_version, required)
    }
}

/// Compare dotted numeric versions. Trailing non-digits in a component
/// (`"1b"`, `"0(tasmota)"`) are ignored; missing components count as 0.
pub fn firmware_supported(version: &str, required: &str) -> bool {
    let parse = |raw: &str| -> [u32; 3] {
        let mut parts = [0u32; 3];
        for (slot, component) in parts.iter_mut().zip(raw.trim().split('.')) {
            let digits: String = component.chars().take_while(char::is_ascii_digit).collect();
            *slot = digits.parse().unwrap_or(0);
        }
        parts
    };
    parse(version) >= parse(required)
}

// ── Partial updates ──────────────────────────────────────────────

/// Fields a [`DeviceUpdate`] can remove.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum DeviceField {
    State,
    AdoptedAt,
    ProvisionedAt,
    Offline,
    TelemetryPeriod,
    TemplateName,
}

/// A field-level write: every `Some` is set, every entry in `unset` is
/// cleared, everything else is left alone.
#[derive(Debug, Clone)]
pub struct DeviceUpdate {
    pub id: MacAddress,
    pub host_name: Option<String>,
    pub ipv4_address: Option<Ipv4Addr>,
    pub ipv4_subnet_prefix: Option<u8>,
    pub ipv4_gateway: Option<Ipv4Addr>,
    pub ipv4_name_server: Option<Ipv4Addr>,
    pub topic_name: Option<String>,
    pub friendly_names: Option<Vec<String>>,
    pub firmware_version: Option<String>,
    pub firmware_size_kb: Option<u32>,
    pub flash_size_kb: Option<u32>,
    pub hardware: Option<String>,
    pub restart_reason: Option<String>,
    pub telemetry_period_secs: Option<u32>,
    pub template_definition: Option<String>,
    pub template_name: Option<String>,
    pub status: Option<DeviceStatus>,
    pub offline: Option<bool>,
    pub state: Option<DeviceState>,
    pub adopted_at: Option<DateTime<Utc>>,
    pub provisioned_at: Option<DateTime<Utc>>,
    pub unset: Vec<DeviceField>,
}

impl DeviceUpdate {
    pub fn new(id: MacAddress) -> Self {
        Self {
            id,
            host_name: None,
            ipv4_address: None,
            ipv4_subnet_prefix: None,
            ipv4_gateway: None,
            ipv4_name_server: None,
            topic_name: None,
            friendly_names: None,
            firmware_version: None,
            firmware_size_kb: None,
            flash_size_kb: None,
            hardware: None,
            restart_reason: None,
            telemetry_period_secs: None,
            template_definition: None,
            template_name: None,
            status: None,
            offline: None,
            state: None,
            adopted_at: None,
            provisioned_at: None,
            unset: Vec::new(),
        }
    }

    pub fn state(mut self, state: DeviceState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn topic_name(mut self, topic: impl Into<String>) -> Self {
        self.topic_name = Some(topic.into());
        self
    }

    pub fn status(mut self, status: DeviceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = Some(offline);
        self
    }

    pub fn adopted_at(mut self, at: DateTime<Utc>) -> Self {
        self.adopted_at = Some(at);
        self
    }

    pub fn provisioned_at(mut self, at: DateTime<Utc>) -> Self {
        self.provisioned_at = Some(at);
        self
    }

    pub fn unset(mut self, field: DeviceField) -> Self {
        if !self.unset.contains(&field) {
            self.unset.push(field);
        }
        self
    }

    /// Write this update onto `device`, stamping `updated_at`.
    ///
    /// A field that is both set and listed in `unset` ends up unset.
    pub fn apply(self, device: &mut Device) {
        let Self {
            id: _,
            host_name,
            ipv4_address,
            ipv4_subnet_prefix,
            ipv4_gateway,
            ipv4_name_server,
            topic_name,
            friendly_names,
            firmware_version,
            firmware_size_kb,
            flash_size_kb,
            hardware,
            restart_reason,
            telemetry_period_secs,
            template_definition,
            template_name,
            status,
            offline,
            state,
            adopted_at,
            provisioned_at,
            unset,
        } = self;

        if let Some(v) = host_name {
            device.host_name = v;
        }
        if let Some(v) = ipv4_address {
            device.ipv4_address = v;
        }
        if let Some(v) = ipv4_subnet_prefix {
            device.ipv4_subnet_prefix = v;
        }
        if let Some(v) = ipv4_gateway {
            device.ipv4_gateway = v;
        }
        if let Some(v) = ipv4_name_server {
            device.ipv4_name_server = v;
        }
        if let Some(v) = topic_name {
            device.topic_name = v;
        }
        if let Some(v) = friendly_names {
            device.friendly_names = v;
        }
        if let Some(v) = firmware_version {
            device.firmware_version = v;
        }
        if let Some(v) = firmware_size_kb {
            device.firmware_size_kb = v;
        }
        if let Some(v) = flash_size_kb {
            device.flash_size_kb = v;
        }
        if let Some(v) = hardware {
            device.hardware = v;
        }
        if let Some(v) = restart_reason {
            device.restart_reason = v;
        }
        if telemetry_period_secs.is_some() {
            device.telemetry_period_secs = telemetry_period_secs;
        }
        if let Some(v) = template_definition {
            device.template_definition = v;
        }
        if template_name.is_some() {
            device.template_name = template_name;
        }
        if let Some(v) = status {
            device.status = v;
        }
        if let Some(v) = offline {
            device.offline = v;
        }
        if state.is_some() {
            device.state = state;
        }
        if adopted_at.is_some() {
            device.adopted_at = adopted_at;
        }
        if provisioned_at.is_some() {
            device.provisioned_at = provisioned_at;
        }

        for field in unset {
            match field {
                DeviceField::State => device.state = None,
                DeviceField::AdoptedAt => device.adopted_at = None,
                DeviceField::ProvisionedAt => device.provisioned_at = None,
                DeviceField::Offline => device.offline = false,
                DeviceField::TelemetryPeriod => device.telemetry_period_secs = None,
                DeviceField::TemplateName => device.template_name = None,
            }
        }

        device.updated_at = Utc::now();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device::new(MacAddress::new("aa:bb:cc:dd:ee:ff"))
    }

    #[test]
    fn firmware_below_required_is_unsupported() {
        assert!(!firmware_supported("8.1.0", REQUIRED_FIRMWARE_VERSION));
        assert!(firmware_supported("8.2.0", REQUIRED_FIRMWARE_VERSION));
        assert!(firmware_supported("8.3.1", REQUIRED_FIRMWARE_VERSION));
        assert!(firmware_supported("9.1.0(tasmota)", REQUIRED_FIRMWARE_VERSION));
        assert!(!firmware_supported("", REQUIRED_FIRMWARE_VERSION));
    }

    #[test]
    fn device_firmware_flag() {
        let mut d = device();
        d.firmware_version = "8.1.0".into();
        assert!(!d.firmware_supported(REQUIRED_FIRMWARE_VERSION));
        d.firmware_version = "8.2.0".into();
        assert!(d.firmware_supported(REQUIRED_FIRMWARE_VERSION));
        assert!(!d.firmware_supported("9.0"));
    }

    #[test]
    fn state_names_round_trip() {
        assert_eq!(DeviceState::ProvisionPending.to_string(), "ProvisionPending");
        assert_eq!(
            "AdoptionPending".parse::<DeviceState>().unwrap(),
            DeviceState::AdoptionPending
        );
    }

    #[test]
    fn update_sets_only_provided_fields() {
        let mut d = device();
        d.host_name = "kept".into();
        let before = d.updated_at;

        DeviceUpdate::new(d.id.clone())
            .state(DeviceState::Adopting)
            .offline(true)
            .apply(&mut d);

        assert_eq!(d.host_name, "kept");
        assert_eq!(d.state, Some(DeviceState::Adopting));
        assert!(d.offline);
        assert!(d.updated_at >= before);
    }

    #[test]
    fn unset_wins_over_set() {
        let mut d = device();
        d.adopted_at = Some(Utc::now());

        DeviceUpdate::new(d.id.clone())
            .state(DeviceState::Provisioning)
            .unset(DeviceField::State)
            .unset(DeviceField::AdoptedAt)
            .apply(&mut d);

        assert_eq!(d.state, None);
        assert_eq!(d.adopted_at, None);
    }

    #[test]
    fn unset_offline_reads_as_online() {
        let mut d = device();
        d.offline = true;
        DeviceUpdate::new(d.id.clone())
            .unset(DeviceField::Offline)
            .apply(&mut d);
        assert!(!d.offline);
    }
}
