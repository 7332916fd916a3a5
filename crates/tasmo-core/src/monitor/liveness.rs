// ── Liveness monitor ──
//
// Periodically probes every known device and flips its offline flag when
// reachability changes.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::orchestrator::Orchestrator;

/// Reachability check for one address.
#[async_trait]
pub trait EchoProbe: Send + Sync {
    async fn probe(&self, address: Ipv4Addr, timeout: Duration) -> bool;
}

/// Probe by opening a TCP connection to the device's web port. Needs no
/// raw-socket privileges.
#[derive(Debug, Clone, Copy)]
pub struct TcpEchoProbe {
    port: u16,
}

impl TcpEchoProbe {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Default for TcpEchoProbe {
    fn default() -> Self {
        Self::new(80)
    }
}

#[async_trait]
impl EchoProbe for TcpEchoProbe {
    async fn probe(&self, address: Ipv4Addr, timeout: Duration) -> bool {
        let target = SocketAddr::from((address, self.port));
        matches!(
            tokio::time::timeout(timeout, TcpStream::connect(target)).await,
            Ok(Ok(_))
        )
    }
}

pub(crate) async fn run(
    orchestrator: Orchestrator,
    probe: Arc<dyn EchoProbe>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(orchestrator.config().timings.liveness_interval);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = sweep(&orchestrator, &probe).await {
                    warn!(error = %e, "liveness sweep failed");
                }
            }
        }
    }
    debug!("liveness monitor stopped");
}

/// Probe every device once, concurrently, and record transitions. Only
/// listing the devices can fail the sweep as a whole.
pub(crate) async fn sweep(
    orchestrator: &Orchestrator,
    probe: &Arc<dyn EchoProbe>,
) -> Result<(), CoreError> {
    let store = orchestrator.store();
    let timeout = orchestrator.config().timings.liveness_probe_timeout;

    let mut probes = JoinSet::new();
    for device in store.devices().await? {
        let probe = Arc::clone(probe);
        probes.spawn(async move {
            let alive = probe.probe(device.ipv4_address, timeout).await;
            (device, alive)
        });
    }

    while let Some(joined) = probes.join_next().await {
        let Ok((device, alive)) = joined else {
            continue;
        };
        if device.offline != alive {
            continue;
        }
        // A failed write skips only this device.
        if let Err(e) = store.set_device_offline(device.ipv4_address, !alive).await {
            warn!(id = %device.id, error = %e, "recording reachability failed");
            continue;
        }
        if alive {
            info!(id = %device.id, address = %device.ipv4_address, "device back online");
        } else {
            warn!(id = %device.id, address = %device.ipv4_address, "device went offline");
        }
    }
    Ok(())
}
