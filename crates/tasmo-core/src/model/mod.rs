// ── Domain model ──
//
// Canonical types for devices, their desired-state overlay and the
// template catalog. Wire types live in `tasmo_api::models`; `convert`
// bridges the two.

pub mod configuration;
pub mod device;
pub mod entity_id;

pub use configuration::{
    COMMON_CONFIGURATION_ID, DeviceAggregate, DeviceConfiguration, GENERIC_TEMPLATE, Template,
    normalize_id,
};
pub use device::{
    Device, DeviceField, DeviceState, DeviceStatus, DeviceUpdate, REQUIRED_FIRMWARE_VERSION,
    firmware_supported,
};
pub use entity_id::MacAddress;
pub use tasmo_api::PowerState;
