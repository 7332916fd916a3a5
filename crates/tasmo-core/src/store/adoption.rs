// ── Adoption wait ──

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::DeviceStore;
use crate::control::PollOutcome;
use crate::error::CoreError;
use crate::model::MacAddress;

/// Repeatedly fire `probe` and check whether the device has been marked
/// adopted (the telemetry monitor stamps `adopted_at` when the device's
/// test ping arrives).
///
/// Each attempt runs the probe (errors ignored), waits `interval`, then
/// reads the device. Returns `None` if cancelled.
pub async fn wait_for_adoption<F, Fut>(
    store: &dyn DeviceStore,
    id: &MacAddress,
    mut probe: F,
    attempts: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> Option<PollOutcome>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<(), CoreError>> + Send,
{
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return None;
        }
        if let Err(e) = probe().await {
            debug!(id = %id, error = %e, "adoption probe failed");
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            () = tokio::time::sleep(interval) => {}
        }
        match store.device(id).await {
            Ok(Some(device)) if device.is_adopted() => {
                return Some(PollOutcome {
                    succeeded: true,
                    attempts: attempt,
                });
            }
            Ok(_) => {}
            Err(e) => debug!(id = %id, error = %e, "adoption check failed"),
        }
    }
    Some(PollOutcome {
        succeeded: false,
        attempts,
    })
}
