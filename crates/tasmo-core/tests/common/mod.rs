// Shared fixture: an orchestrator wired to an emulated fleet, an in-process
// broker and the in-memory store.

#![allow(dead_code, clippy::unwrap_used)]

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use tasmo_api::{MemoryBroker, PubSubSettings};
use tasmo_core::{
    Device, DeviceStore, EchoProbe, MacAddress, MemoryStore, Orchestrator, OrchestratorConfig,
    Timings,
};
use tasmo_emulator::{EmulatedNetwork, RestartDelays};

pub const SUBNET: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 0);
pub const FLEET_SIZE: u8 = 3;

/// Reachability answered by the emulated network.
pub struct NetworkProbe(pub Arc<EmulatedNetwork>);

#[async_trait]
impl EchoProbe for NetworkProbe {
    async fn probe(&self, address: Ipv4Addr, _timeout: Duration) -> bool {
        self.0.is_reachable(address)
    }
}

pub fn broker_settings(password: &str) -> PubSubSettings {
    PubSubSettings {
        host: "broker.local".to_owned(),
        password: SecretString::from(password.to_owned()),
        ..PubSubSettings::default()
    }
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        subnet: SUBNET,
        scan_first: 100,
        scan_last: 110,
        scan_concurrency: 4,
        pubsub: broker_settings("secret"),
        fleet_prefix: "fleet".to_owned(),
        timings: Timings {
            command_timeout: Duration::from_secs(1),
            scan_timeout: Duration::from_secs(5),
            adoption_settle: Duration::from_secs(1),
            restart_settle: Duration::from_secs(1),
            upgrade_settle: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            poll_attempts: 5,
            liveness_interval: Duration::from_secs(3600),
            liveness_probe_timeout: Duration::from_millis(100),
        },
        ..OrchestratorConfig::default()
    }
}

pub struct Fleet {
    pub orchestrator: Orchestrator,
    pub network: Arc<EmulatedNetwork>,
    pub broker: Arc<MemoryBroker>,
    pub store: Arc<MemoryStore>,
}

impl Fleet {
    /// A started orchestrator over `FLEET_SIZE` emulated devices.
    pub async fn start(config: OrchestratorConfig) -> Self {
        Self::start_with_broker(config, Arc::new(MemoryBroker::new())).await
    }

    pub async fn start_with_broker(config: OrchestratorConfig, broker: Arc<MemoryBroker>) -> Self {
        let network = Arc::new(
            EmulatedNetwork::fleet(FLEET_SIZE, SUBNET, &broker, RestartDelays::quick()).await,
        );
        let store = Arc::new(MemoryStore::new());
        let orchestrator =
            Orchestrator::new(config, Arc::clone(&network) as _, Arc::clone(&store) as _).unwrap();
        orchestrator
            .start(
                Arc::clone(&broker) as _,
                Arc::new(NetworkProbe(Arc::clone(&network))),
            )
            .await
            .unwrap();
        Self {
            orchestrator,
            network,
            broker,
            store,
        }
    }

    pub async fn device(&self, n: u8) -> Device {
        self.store.device(&mac(n)).await.unwrap().unwrap()
    }

    /// Re-read device `n` every 100ms (of paused time) until `condition`
    /// holds.
    pub async fn wait_for_device<F>(&self, n: u8, condition: F) -> bool
    where
        F: Fn(&Device) -> bool,
    {
        for _ in 0..600 {
            if condition(&self.device(n).await) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        false
    }

    pub async fn shutdown(self) {
        self.orchestrator.shutdown().await;
        self.network.shutdown();
    }
}

/// Hardware address of the `n`-th emulated device.
pub fn mac(n: u8) -> MacAddress {
    MacAddress::new(format!("dc:4f:22:00:00:{n:02x}"))
}

pub fn address(n: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 100 + n)
}

/// Re-check `condition` every 100ms (of paused time) until it holds.
/// The closure must hand back an owning future.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..600 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}
