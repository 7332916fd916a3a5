// ── Emulated network ──
//
// A set of emulated devices keyed by address, reachable through the same
// `CommandClient` seam the HTTP client implements.

use std::net::Ipv4Addr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use tasmo_api::client::command_line;
use tasmo_api::{CommandClient, Error, Invocation, MemoryBroker};

use crate::device::{DeviceEmulator, DeviceProfile, RestartDelays};

#[derive(Default)]
pub struct EmulatedNetwork {
    devices: DashMap<Ipv4Addr, DeviceEmulator>,
}

impl EmulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` single-channel devices at `subnet.101` onwards, all talking
    /// to `broker` once configured.
    pub async fn fleet(
        count: u8,
        subnet: Ipv4Addr,
        broker: &Arc<MemoryBroker>,
        delays: RestartDelays,
    ) -> Self {
        let network = Self::new();
        for n in 1..=count {
            let profile = DeviceProfile::numbered(n, subnet);
            network.insert(DeviceEmulator::start(&profile, Arc::clone(broker), delays).await);
        }
        network
    }

    /// Add a device, replacing whatever answered at its address before.
    pub fn insert(&self, device: DeviceEmulator) {
        if let Some(previous) = self.devices.insert(device.address(), device) {
            previous.shutdown();
        }
    }

    pub fn device(&self, address: Ipv4Addr) -> Option<DeviceEmulator> {
        self.devices.get(&address).map(|entry| entry.value().clone())
    }

    /// Every device, ordered by address.
    pub fn devices(&self) -> Vec<DeviceEmulator> {
        let mut devices: Vec<_> = self.devices.iter().map(|e| e.value().clone()).collect();
        devices.sort_by_key(DeviceEmulator::address);
        devices
    }

    /// Addresses of every device, ordered.
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.devices().iter().map(DeviceEmulator::address).collect()
    }

    /// Whether something at `address` would answer right now.
    pub fn is_reachable(&self, address: Ipv4Addr) -> bool {
        self.device(address).is_some_and(|d| d.is_online())
    }

    pub fn shutdown(&self) {
        for entry in &self.devices {
            entry.value().shutdown();
        }
    }
}

#[async_trait]
impl CommandClient for EmulatedNetwork {
    async fn invoke(
        &self,
        address: Ipv4Addr,
        command: &str,
        params: Option<&str>,
        mode: Invocation,
    ) -> Result<Option<String>, Error> {
        let line = command_line(command, params);
        // Clone the handle out so no map guard is held across the await.
        let device = self.device(address);
        let body = match device {
            Some(device) => device.execute(&line).await,
            None => None,
        };
        match (body, mode) {
            (Some(body), _) => Ok(Some(body)),
            (None, Invocation::Strict) => Err(Error::DeviceUnresponsive { address }),
            (None, Invocation::Lenient) => {
                debug!(%address, command = %line, "no emulated device answered");
                Ok(None)
            }
        }
    }
}
