// Background monitor tests: telemetry, store changes and liveness.

#![allow(clippy::unwrap_used)]

mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use serde_json::json;

use tasmo_api::{MemoryBroker, Message, PubSubTransport};
use tasmo_core::{
    ChangeKind, ChangeStream, CoreError, Device, DeviceAggregate, DeviceConfiguration,
    DeviceNotification, DeviceState, DeviceStatus, DeviceStore, DeviceUpdate, MacAddress,
    MemoryStore, Orchestrator, Template,
};
use tasmo_emulator::{EmulatedNetwork, RestartDelays};

use common::{FLEET_SIZE, Fleet, NetworkProbe, SUBNET, address, config, eventually, mac};

fn state_payload(uptime: u64) -> String {
    json!({
        "UptimeSec": uptime,
        "Heap": 24,
        "LoadAvg": 12,
        "MqttCount": 1,
        "POWER": "ON",
        "Wifi": { "RSSI": 70, "Signal": -65, "LinkCount": 2, "Downtime": "0T00:00:10" }
    })
    .to_string()
}

// ── Telemetry ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_state_report_updates_status() {
    let fleet = Fleet::start(config()).await;
    fleet.orchestrator.scan_network().await.unwrap();

    fleet
        .broker
        .publish(Message::new("tele/tasmota_000001/STATE", state_payload(100_000)))
        .await
        .unwrap();

    let updated = fleet
        .wait_for_device(1, |d| d.status.wifi_downtime_seconds == 10)
        .await;
    assert!(updated);
    assert_eq!(fleet.device(1).await.status.wifi_retries, 2);

    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_state_from_unknown_topic_is_dropped() {
    let fleet = Fleet::start(config()).await;
    fleet.orchestrator.scan_network().await.unwrap();
    let mut before = fleet.store.devices().await.unwrap();
    before.sort_by(|a, b| a.id.cmp(&b.id));

    fleet
        .broker
        .publish(Message::new("tele/ghost/STATE", state_payload(5)))
        .await
        .unwrap();
    fleet
        .broker
        .publish(Message::new("tele/tasmota_000002/STATE", "not json"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let mut after = fleet.store.devices().await.unwrap();
    after.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(after.len(), usize::from(FLEET_SIZE));
    assert_eq!(before, after);

    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_uptime_drop_triggers_resync() {
    let fleet = Fleet::start(config()).await;
    fleet.orchestrator.scan_network().await.unwrap();

    fleet
        .store
        .update_device(
            DeviceUpdate::new(mac(1)).status(DeviceStatus {
                uptime_seconds: 10_000,
                ..DeviceStatus::default()
            }),
            false,
        )
        .await
        .unwrap();

    // Renamed behind the orchestrator's back; only a re-scan picks it up.
    let relay = fleet.network.device(address(1)).unwrap();
    relay.execute("FriendlyName1 Porch").await.unwrap();

    fleet
        .broker
        .publish(Message::new("tele/tasmota_000001/STATE", state_payload(3)))
        .await
        .unwrap();

    let resynced = fleet
        .wait_for_device(1, |d| d.friendly_names == vec!["Porch"])
        .await;
    assert!(resynced);

    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_state_report_completes_provisioning() {
    let fleet = Fleet::start(config()).await;
    fleet.orchestrator.scan_network().await.unwrap();
    fleet
        .store
        .update_device_state(&mac(2), Some(DeviceState::Provisioning), &[])
        .await
        .unwrap();

    fleet
        .broker
        .publish(Message::new("tele/tasmota_000002/STATE", state_payload(60)))
        .await
        .unwrap();

    let done = fleet
        .wait_for_device(2, |d| d.state.is_none() && d.provisioned_at.is_some())
        .await;
    assert!(done);

    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_test_ping_adopts_and_provisions() {
    let fleet = Fleet::start(config()).await;
    fleet.orchestrator.scan_network().await.unwrap();

    fleet
        .broker
        .publish(Message::new(
            "fleet/tasmota_000003/mqttWorks",
            mac(3).to_string(),
        ))
        .await
        .unwrap();

    let adopted = fleet
        .wait_for_device(3, |d| d.is_adopted() && d.state == Some(DeviceState::Provisioning))
        .await;
    assert!(adopted);

    fleet.shutdown().await;
}

// ── Store changes ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_configuration_change_reprovisions_adopted_device() {
    let fleet = Fleet::start(config()).await;
    fleet.orchestrator.scan_network().await.unwrap();
    fleet
        .store
        .update_device(DeviceUpdate::new(mac(1)).adopted_at(chrono::Utc::now()), false)
        .await
        .unwrap();

    fleet
        .orchestrator
        .set_configuration(
            &mac(1),
            DeviceConfiguration {
                friendly_names: Some(vec!["Heater".into()]),
                ..DeviceConfiguration::default()
            },
        )
        .await
        .unwrap();

    let relay = fleet.network.device(address(1)).unwrap();
    let applied = eventually(|| {
        let relay = relay.clone();
        async move { relay.friendly_names().await == vec!["Heater"] }
    })
    .await;
    assert!(applied);
    assert_eq!(fleet.device(1).await.state, Some(DeviceState::Provisioning));

    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_configuration_change_on_unmanaged_device_only_notifies() {
    let fleet = Fleet::start(config()).await;
    fleet.orchestrator.scan_network().await.unwrap();
    let mut notifications = fleet.orchestrator.notifications();

    fleet
        .orchestrator
        .set_configuration(
            &mac(2),
            DeviceConfiguration {
                friendly_names: Some(vec!["Fan".into()]),
                ..DeviceConfiguration::default()
            },
        )
        .await
        .unwrap();

    // Scan inserts may still be draining; skip to the configuration update.
    let aggregate = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let DeviceNotification::Changed { aggregate, kind } =
                notifications.recv().await.unwrap().as_ref()
            {
                if *kind == ChangeKind::Update && aggregate.configuration.is_some() {
                    break aggregate.clone();
                }
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(aggregate.device.id, mac(2));
    assert_eq!(
        aggregate.configuration.and_then(|c| c.friendly_names),
        Some(vec!["Fan".to_owned()])
    );
    assert_eq!(fleet.device(2).await.state, None);

    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_template_change_reannounces_devices_using_it() {
    let fleet = Fleet::start(config()).await;
    fleet.orchestrator.scan_network().await.unwrap();
    let mut notifications = fleet.orchestrator.notifications();

    // Every emulated device reports the "Generic" template.
    fleet.store.insert_templates(Vec::new()).await.unwrap();

    let mut refreshed = tokio::time::timeout(Duration::from_secs(5), async {
        let mut ids = Vec::new();
        while ids.len() < usize::from(FLEET_SIZE) {
            if let DeviceNotification::Changed { aggregate, .. } =
                notifications.recv().await.unwrap().as_ref()
            {
                if aggregate.template.is_some() {
                    ids.push(aggregate.device.id.clone());
                }
            }
        }
        ids
    })
    .await
    .unwrap();
    refreshed.sort();
    assert_eq!(refreshed, vec![mac(1), mac(2), mac(3)]);

    fleet.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_deleted_device_is_announced() {
    let fleet = Fleet::start(config()).await;
    fleet.orchestrator.scan_network().await.unwrap();
    let mut notifications = fleet.orchestrator.notifications();

    fleet.orchestrator.forget(&mac(1)).await.unwrap();

    let removed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let DeviceNotification::Removed { id } =
                notifications.recv().await.unwrap().as_ref()
            {
                break id.clone();
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(removed, mac(1));

    fleet.shutdown().await;
}

// ── Liveness ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_liveness_sweep_tracks_reachability() {
    let mut config = config();
    config.timings.liveness_interval = Duration::from_secs(5);
    let fleet = Fleet::start(config).await;
    fleet.orchestrator.scan_network().await.unwrap();

    let relay = fleet.network.device(address(2)).unwrap();
    relay.unplug();
    let offline = fleet.wait_for_device(2, |d| d.offline).await;
    assert!(offline);
    assert!(!fleet.device(1).await.offline);

    relay.plug();
    let online = fleet.wait_for_device(2, |d| !d.offline).await;
    assert!(online);

    fleet.shutdown().await;
}

/// Delegates to a [`MemoryStore`] but refuses to touch the offline flag
/// of one address.
struct StubbornStore {
    inner: MemoryStore,
    refuse: Ipv4Addr,
}

#[async_trait]
impl DeviceStore for StubbornStore {
    async fn device(&self, id: &MacAddress) -> Result<Option<Device>, CoreError> {
        self.inner.device(id).await
    }

    async fn device_by_topic(&self, topic: &str) -> Result<Option<Device>, CoreError> {
        self.inner.device_by_topic(topic).await
    }

    async fn devices(&self) -> Result<Vec<Device>, CoreError> {
        self.inner.devices().await
    }

    async fn update_device(
        &self,
        update: DeviceUpdate,
        upsert: bool,
    ) -> Result<Option<Device>, CoreError> {
        self.inner.update_device(update, upsert).await
    }

    async fn delete_device(&self, id: &MacAddress) -> Result<Option<Device>, CoreError> {
        self.inner.delete_device(id).await
    }

    async fn set_device_offline(
        &self,
        address: Ipv4Addr,
        offline: bool,
    ) -> Result<u64, CoreError> {
        if address == self.refuse {
            return Err(CoreError::Internal("write refused".into()));
        }
        self.inner.set_device_offline(address, offline).await
    }

    async fn set_devices_offline(
        &self,
        not_updated_since: DateTime<Utc>,
    ) -> Result<u64, CoreError> {
        self.inner.set_devices_offline(not_updated_since).await
    }

    async fn device_aggregate(
        &self,
        id: &MacAddress,
        template_from_configuration: bool,
    ) -> Result<Option<DeviceAggregate>, CoreError> {
        self.inner
            .device_aggregate(id, template_from_configuration)
            .await
    }

    async fn device_aggregates(&self) -> Result<Vec<DeviceAggregate>, CoreError> {
        self.inner.device_aggregates().await
    }

    async fn configuration(&self, id: &str) -> Result<Option<DeviceConfiguration>, CoreError> {
        self.inner.configuration(id).await
    }

    async fn replace_configuration(
        &self,
        configuration: DeviceConfiguration,
    ) -> Result<DeviceConfiguration, CoreError> {
        self.inner.replace_configuration(configuration).await
    }

    async fn delete_configuration(
        &self,
        id: &str,
    ) -> Result<Option<DeviceConfiguration>, CoreError> {
        self.inner.delete_configuration(id).await
    }

    async fn insert_configurations(
        &self,
        configurations: Vec<DeviceConfiguration>,
    ) -> Result<usize, CoreError> {
        self.inner.insert_configurations(configurations).await
    }

    async fn template(&self, name: &str) -> Result<Option<Template>, CoreError> {
        self.inner.template(name).await
    }

    async fn templates(&self) -> Result<Vec<Template>, CoreError> {
        self.inner.templates().await
    }

    async fn insert_templates(&self, templates: Vec<Template>) -> Result<usize, CoreError> {
        self.inner.insert_templates(templates).await
    }

    fn watch_devices(&self) -> ChangeStream<Device> {
        self.inner.watch_devices()
    }

    fn watch_configurations(&self) -> ChangeStream<DeviceConfiguration> {
        self.inner.watch_configurations()
    }

    fn watch_templates(&self) -> ChangeStream<Template> {
        self.inner.watch_templates()
    }
}

#[tokio::test(start_paused = true)]
async fn test_liveness_sweep_survives_failed_write() {
    let broker = Arc::new(MemoryBroker::new());
    let network = Arc::new(
        EmulatedNetwork::fleet(FLEET_SIZE, SUBNET, &broker, RestartDelays::quick()).await,
    );
    let store = Arc::new(StubbornStore {
        inner: MemoryStore::new(),
        refuse: address(1),
    });
    let mut config = config();
    config.timings.liveness_interval = Duration::from_secs(5);
    let orchestrator =
        Orchestrator::new(config, Arc::clone(&network) as _, Arc::clone(&store) as _).unwrap();
    orchestrator
        .start(
            Arc::clone(&broker) as _,
            Arc::new(NetworkProbe(Arc::clone(&network))),
        )
        .await
        .unwrap();
    orchestrator.scan_network().await.unwrap();

    for n in 1..=FLEET_SIZE {
        network.device(address(n)).unwrap().unplug();
    }
    let others_offline = eventually(|| {
        let store = Arc::clone(&store);
        async move {
            let mut offline = Vec::new();
            for n in 2..=FLEET_SIZE {
                offline.push(store.device(&mac(n)).await.unwrap().unwrap().offline);
            }
            offline.iter().all(|o| *o)
        }
    })
    .await;
    assert!(others_offline);
    assert!(!store.device(&mac(1)).await.unwrap().unwrap().offline);

    orchestrator.shutdown().await;
    network.shutdown();
}
