// ── Desired-state overlay, template catalog, and the read-side join ──

use serde::{Deserialize, Serialize};

use super::device::Device;

/// Key of the fleet-wide configuration record.
pub const COMMON_CONFIGURATION_ID: &str = "common";

/// Template that always exists in the catalog.
pub const GENERIC_TEMPLATE: &str = "Generic";

/// Operator-desired settings for one device, or for the whole fleet
/// when keyed [`COMMON_CONFIGURATION_ID`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfiguration {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_commands: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,
}

impl DeviceConfiguration {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            id: normalize_id(id.as_ref()),
            ..Self::default()
        }
    }

    pub fn is_common(&self) -> bool {
        self.id == COMMON_CONFIGURATION_ID
    }

    /// Desired topic, if one is set and not blank.
    pub fn desired_topic(&self) -> Option<&str> {
        self.topic_name
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Setup commands split on `;`, trimmed, empties dropped.
    pub fn setup_command_list(&self) -> Vec<&str> {
        self.setup_commands
            .as_deref()
            .map(|commands| {
                commands
                    .split(';')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Configuration keys are lower-cased hardware addresses (or `common`).
pub fn normalize_id(id: &str) -> String {
    id.trim().to_lowercase().replace('-', ":")
}

/// A hardware pin-mapping template, keyed by the `NAME` inside its definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    pub id: String,
    #[serde(default)]
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

impl Template {
    /// The catalog's always-present entry. It has no definition, so
    /// provisioning against it leaves the device module alone.
    pub fn generic() -> Self {
        Self {
            id: GENERIC_TEMPLATE.to_owned(),
            ..Self::default()
        }
    }

    pub fn has_definition(&self) -> bool {
        !self.definition.trim().is_empty()
    }
}

/// Device joined with its configuration and template. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAggregate {
    pub device: Device,
    pub configuration: Option<DeviceConfiguration>,
    pub template: Option<Template>,
}
