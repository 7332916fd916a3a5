// ── Device store contract ──
//
// Persistence for devices, configurations and templates, plus change
// streams the monitors react to. Field-level updates on one device are
// atomic; nothing above the store takes a lock on device state.

pub mod adoption;
pub(crate) mod collection;
pub mod memory;

use std::net::Ipv4Addr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::model::{
    Device, DeviceAggregate, DeviceConfiguration, DeviceField, DeviceState, DeviceUpdate,
    MacAddress, Template,
};
use crate::stream::ChangeStream;

pub use adoption::wait_for_adoption;
pub use memory::MemoryStore;

#[async_trait]
pub trait DeviceStore: Send + Sync {
    // ── Devices ──────────────────────────────────────────────────────

    async fn device(&self, id: &MacAddress) -> Result<Option<Device>, CoreError>;

    async fn device_by_topic(&self, topic: &str) -> Result<Option<Device>, CoreError>;

    async fn devices(&self) -> Result<Vec<Device>, CoreError>;

    /// Apply a field-level update. With `upsert`, a missing device is
    /// created from [`Device::new`] first; without it, a missing device
    /// yields `Ok(None)`.
    async fn update_device(
        &self,
        update: DeviceUpdate,
        upsert: bool,
    ) -> Result<Option<Device>, CoreError>;

    /// Set (or, with `None`, clear) the lifecycle state and clear `unset`.
    async fn update_device_state(
        &self,
        id: &MacAddress,
        state: Option<DeviceState>,
        unset: &[DeviceField],
    ) -> Result<Option<Device>, CoreError> {
        let mut update = DeviceUpdate::new(id.clone());
        match state {
            Some(state) => update = update.state(state),
            None => update = update.unset(DeviceField::State),
        }
        for field in unset {
            update = update.unset(*field);
        }
        self.update_device(update, false).await
    }

    async fn delete_device(&self, id: &MacAddress) -> Result<Option<Device>, CoreError>;

    /// Flag (`true`) or clear (`false`) the offline marker of the devices at
    /// `address`. Returns how many records changed.
    async fn set_device_offline(&self, address: Ipv4Addr, offline: bool)
    -> Result<u64, CoreError>;

    /// Flag every online device not written since `not_updated_since`.
    async fn set_devices_offline(
        &self,
        not_updated_since: DateTime<Utc>,
    ) -> Result<u64, CoreError>;

    /// Device joined with its configuration and template. The template
    /// comes from the configuration when `template_from_configuration`,
    /// otherwise from what the device itself reports.
    async fn device_aggregate(
        &self,
        id: &MacAddress,
        template_from_configuration: bool,
    ) -> Result<Option<DeviceAggregate>, CoreError>;

    /// Every device joined the same way as `device_aggregate(id, false)`.
    async fn device_aggregates(&self) -> Result<Vec<DeviceAggregate>, CoreError>;

    // ── Configurations ───────────────────────────────────────────────

    async fn configuration(&self, id: &str) -> Result<Option<DeviceConfiguration>, CoreError>;

    async fn replace_configuration(
        &self,
        configuration: DeviceConfiguration,
    ) -> Result<DeviceConfiguration, CoreError>;

    async fn delete_configuration(
        &self,
        id: &str,
    ) -> Result<Option<DeviceConfiguration>, CoreError>;

    /// Insert the configurations whose ids are not yet stored. Returns the
    /// number inserted.
    async fn insert_configurations(
        &self,
        configurations: Vec<DeviceConfiguration>,
    ) -> Result<usize, CoreError>;

    // ── Templates ────────────────────────────────────────────────────

    async fn template(&self, name: &str) -> Result<Option<Template>, CoreError>;

    async fn templates(&self) -> Result<Vec<Template>, CoreError>;

    /// Insert-if-absent, then make sure the `Generic` template exists.
    async fn insert_templates(&self, templates: Vec<Template>) -> Result<usize, CoreError>;

    // ── Change streams ───────────────────────────────────────────────

    fn watch_devices(&self) -> ChangeStream<Device>;

    fn watch_configurations(&self) -> ChangeStream<DeviceConfiguration>;

    fn watch_templates(&self) -> ChangeStream<Template>;
}
