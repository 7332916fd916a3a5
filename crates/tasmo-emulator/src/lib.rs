// tasmo-emulator: In-process Tasmota relays for demos and tests. Devices
// answer the command protocol through `EmulatedNetwork` and publish
// telemetry onto a shared `MemoryBroker`.

pub mod device;
pub mod network;

pub use device::{DeviceEmulator, DeviceProfile, RestartDelays};
pub use network::EmulatedNetwork;
