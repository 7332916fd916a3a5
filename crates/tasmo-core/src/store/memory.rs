// ── In-memory device store ──

use std::net::Ipv4Addr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::DeviceStore;
use super::collection::{Document, DocumentCollection};
use crate::error::CoreError;
use crate::model::{
    Device, DeviceAggregate, DeviceConfiguration, DeviceUpdate, MacAddress, Template,
};
use crate::stream::ChangeStream;

impl Document for Device {
    fn key(&self) -> &str {
        self.id.as_str()
    }
}

impl Document for DeviceConfiguration {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Document for Template {
    fn key(&self) -> &str {
        &self.id
    }
}

/// [`DeviceStore`] backed by three [`DocumentCollection`]s. Not durable.
pub struct MemoryStore {
    devices: DocumentCollection<Device>,
    configurations: DocumentCollection<DeviceConfiguration>,
    templates: DocumentCollection<Template>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            devices: DocumentCollection::new(),
            configurations: DocumentCollection::new(),
            templates: DocumentCollection::new(),
        }
    }

    fn aggregate(&self, device: Device, template_from_configuration: bool) -> DeviceAggregate {
        let configuration = self.configurations.get(device.id.as_str());
        let template_name = if template_from_configuration {
            configuration
                .as_ref()
                .and_then(|c| c.template_name.clone())
        } else {
            device.template_name.clone()
        };
        let template = template_name.and_then(|name| self.templates.get(&name));
        DeviceAggregate {
            device,
            configuration,
            template,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn device(&self, id: &MacAddress) -> Result<Option<Device>, CoreError> {
        Ok(self.devices.get(id.as_str()))
    }

    async fn device_by_topic(&self, topic: &str) -> Result<Option<Device>, CoreError> {
        Ok(self.devices.find(|d| d.topic_name == topic))
    }

    async fn devices(&self) -> Result<Vec<Device>, CoreError> {
        Ok(self.devices.values())
    }

    async fn update_device(
        &self,
        update: DeviceUpdate,
        upsert: bool,
    ) -> Result<Option<Device>, CoreError> {
        let key = update.id.as_str().to_owned();
        let seed = upsert.then(|| Device::new(update.id.clone()));
        Ok(self
            .devices
            .update_with(&key, seed, move |device| update.apply(device)))
    }

    async fn delete_device(&self, id: &MacAddress) -> Result<Option<Device>, CoreError> {
        Ok(self.devices.remove(id.as_str()))
    }

    async fn set_device_offline(
        &self,
        address: Ipv4Addr,
        offline: bool,
    ) -> Result<u64, CoreError> {
        Ok(self.devices.update_where(
            |d| d.ipv4_address == address && d.offline != offline,
            |d| {
                d.offline = offline;
                d.updated_at = Utc::now();
            },
        ))
    }

    async fn set_devices_offline(
        &self,
        not_updated_since: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        Ok(self.devices.update_where(
            |d| !d.offline && d.updated_at < not_updated_since,
            |d| {
                d.offline = true;
                d.updated_at = Utc::now();
            },
        ))
    }

    async fn device_aggregate(
        &self,
        id: &MacAddress,
        template_from_configuration: bool,
    ) -> Result<Option<DeviceAggregate>, CoreError> {
        Ok(self
            .devices
            .get(id.as_str())
            .map(|device| self.aggregate(device, template_from_configuration)))
    }

    async fn device_aggregates(&self) -> Result<Vec<DeviceAggregate>, CoreError> {
        Ok(self
            .devices
            .values()
            .into_iter()
            .map(|device| self.aggregate(device, false))
            .collect())
    }

    async fn configuration(&self, id: &str) -> Result<Option<DeviceConfiguration>, CoreError> {
        Ok(self.configurations.get(id))
    }

    async fn replace_configuration(
        &self,
        configuration: DeviceConfiguration,
    ) -> Result<DeviceConfiguration, CoreError> {
        self.configurations.replace(configuration.clone());
        Ok(configuration)
    }

    async fn delete_configuration(
        &self,
        id: &str,
    ) -> Result<Option<DeviceConfiguration>, CoreError> {
        Ok(self.configurations.remove(id))
    }

    async fn insert_configurations(
        &self,
        configurations: Vec<DeviceConfiguration>,
    ) -> Result<usize, CoreError> {
        Ok(configurations
            .into_iter()
            .filter(|c| self.configurations.insert_if_absent(c.clone()))
            .count())
    }

    async fn template(&self, name: &str) -> Result<Option<Template>, CoreError> {
        Ok(self.templates.get(name))
    }

    async fn templates(&self) -> Result<Vec<Template>, CoreError> {
        Ok(self.templates.values())
    }

    async fn insert_templates(&self, templates: Vec<Template>) -> Result<usize, CoreError> {
        let inserted = templates
            .into_iter()
            .filter(|t| self.templates.insert_if_absent(t.clone()))
            .count();
        self.templates.insert_if_absent(Template::generic());
        Ok(inserted)
    }

    fn watch_devices(&self) -> ChangeStream<Device> {
        self.devices.subscribe()
    }

    fn watch_configurations(&self) -> ChangeStream<DeviceConfiguration> {
        self.configurations.subscribe()
    }

    fn watch_templates(&self) -> ChangeStream<Template> {
        self.templates.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{DeviceField, DeviceState, GENERIC_TEMPLATE};
    use crate::stream::{ChangeKind, DocumentChange};

    fn mac() -> MacAddress {
        MacAddress::new("AA:BB:CC:DD:EE:01")
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let mut update = DeviceUpdate::new(mac()).topic_name("kitchen");
        update.ipv4_address = Some(Ipv4Addr::new(10, 0, 0, 7));
        update.template_name = Some("Sonoff Basic".into());
        store.update_device(update, true).await.unwrap();
        store
    }

    #[tokio::test]
    async fn update_without_upsert_skips_missing_device() {
        let store = MemoryStore::new();
        let result = store
            .update_device(DeviceUpdate::new(mac()).offline(true), false)
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(store.devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_creates_and_finds_by_topic() {
        let store = seeded().await;
        let found = store.device_by_topic("kitchen").await.unwrap().unwrap();
        assert_eq!(found.id, mac());
        assert!(store.device_by_topic("garage").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn state_update_with_none_clears_state() {
        let store = seeded().await;
        store
            .update_device_state(&mac(), Some(DeviceState::Adopting), &[])
            .await
            .unwrap();
        let cleared = store
            .update_device_state(&mac(), None, &[DeviceField::AdoptedAt])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cleared.state, None);
        assert_eq!(cleared.adopted_at, None);
    }

    #[tokio::test]
    async fn set_device_offline_matches_address() {
        let store = seeded().await;
        let other = Ipv4Addr::new(10, 0, 0, 8);
        assert_eq!(store.set_device_offline(other, true).await.unwrap(), 0);
        assert_eq!(
            store
                .set_device_offline(Ipv4Addr::new(10, 0, 0, 7), true)
                .await
                .unwrap(),
            1
        );
        assert!(store.device(&mac()).await.unwrap().unwrap().offline);
    }

    #[tokio::test]
    async fn stale_devices_go_offline() {
        let store = seeded().await;
        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.set_devices_offline(cutoff).await.unwrap(), 1);
        // Already offline: not counted again.
        assert_eq!(store.set_devices_offline(cutoff).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn insert_templates_ensures_generic() {
        let store = MemoryStore::new();
        let inserted = store.insert_templates(Vec::new()).await.unwrap();
        assert_eq!(inserted, 0);
        assert!(store.template(GENERIC_TEMPLATE).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn aggregate_resolves_template_source() {
        let store = seeded().await;
        store
            .insert_templates(vec![
                Template {
                    id: "Sonoff Basic".into(),
                    definition: r#"{"NAME":"Sonoff Basic"}"#.into(),
                    ..Template::default()
                },
                Template {
                    id: "Shelly 1".into(),
                    definition: r#"{"NAME":"Shelly 1"}"#.into(),
                    ..Template::default()
                },
            ])
            .await
            .unwrap();
        let mut cfg = DeviceConfiguration::new(mac().as_str());
        cfg.template_name = Some("Shelly 1".into());
        store.replace_configuration(cfg).await.unwrap();

        let reported = store.device_aggregate(&mac(), false).await.unwrap().unwrap();
        assert_eq!(reported.template.unwrap().id, "Sonoff Basic");

        let desired = store.device_aggregate(&mac(), true).await.unwrap().unwrap();
        assert_eq!(desired.template.unwrap().id, "Shelly 1");
        assert!(desired.configuration.is_some());
    }

    #[tokio::test]
    async fn aggregates_list_every_device_and_templates_emit_changes() {
        let store = seeded().await;
        let mut changes = store.watch_templates();
        store.insert_templates(Vec::new()).await.unwrap();

        let aggregates = store.device_aggregates().await.unwrap();
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].device.id, mac());
        assert!(aggregates[0].template.is_none());

        let templates = store.templates().await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(changes.next().await.unwrap().kind(), ChangeKind::Insert);
    }

    #[tokio::test]
    async fn insert_configurations_keeps_existing() {
        let store = MemoryStore::new();
        let mut existing = DeviceConfiguration::new("common");
        existing.setup_commands = Some("SetOption1 1".into());
        store.replace_configuration(existing).await.unwrap();

        let inserted = store
            .insert_configurations(vec![
                DeviceConfiguration::new("common"),
                DeviceConfiguration::new(mac().as_str()),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        let common = store.configuration("common").await.unwrap().unwrap();
        assert_eq!(common.setup_commands.as_deref(), Some("SetOption1 1"));
    }

    #[tokio::test]
    async fn delete_emits_change() {
        let store = seeded().await;
        let mut changes = store.watch_devices();
        store.delete_device(&mac()).await.unwrap();
        assert_eq!(
            changes.next().await.unwrap(),
            DocumentChange::Delete {
                id: mac().as_str().to_owned()
            }
        );
    }
}
