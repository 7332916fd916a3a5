// ── Network scanner ──
//
// Probes every host in a range with `Status 0`, bounded by a semaphore,
// and hands each answer to the caller as soon as it lands.

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tasmo_api::StatusReport;

use crate::control::DeviceControl;

/// What one scan covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub probed: usize,
    pub found: usize,
    pub elapsed: Duration,
}

pub struct Scanner {
    control: Arc<DeviceControl>,
    concurrency: usize,
    probe_timeout: Duration,
}

impl Scanner {
    pub fn new(control: Arc<DeviceControl>, concurrency: usize, probe_timeout: Duration) -> Self {
        Self {
            control,
            concurrency: concurrency.max(1),
            probe_timeout,
        }
    }

    /// Probe `addresses` concurrently and call `on_found` for every device
    /// that answers, in completion order.
    ///
    /// Stops at `deadline` or on cancellation, including while `on_found`
    /// is still running; probes still in flight are aborted. A failing probe
    /// never affects the others.
    pub async fn scan<I, F, Fut>(
        &self,
        addresses: I,
        deadline: Duration,
        cancel: &CancellationToken,
        mut on_found: F,
    ) -> ScanSummary
    where
        I: IntoIterator<Item = Ipv4Addr>,
        F: FnMut(StatusReport) -> Fut,
        Fut: Future<Output = ()>,
    {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut probes = JoinSet::new();

        for address in addresses {
            let control = Arc::clone(&self.control);
            let semaphore = Arc::clone(&semaphore);
            let timeout = self.probe_timeout;
            probes.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                match tokio::time::timeout(timeout, control.fetch_full_status(address)).await {
                    Ok(Ok(report)) => report,
                    Ok(Err(e)) => {
                        debug!(address = %address, error = %e, "probe failed");
                        None
                    }
                    Err(_) => None,
                }
            });
        }
        let probed = probes.len();

        let mut found = 0;
        let expiry = tokio::time::sleep(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("scan cancelled");
                    break;
                }
                () = &mut expiry => {
                    debug!(remaining = probes.len(), "scan deadline reached");
                    break;
                }
                joined = probes.join_next() => match joined {
                    None => break,
                    Some(Ok(Some(report))) => {
                        found += 1;
                        // The callback shares the scan deadline.
                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = &mut expiry => {
                                debug!("scan deadline reached while handling a result");
                                break;
                            }
                            () = on_found(report) => {}
                        }
                    }
                    Some(Ok(None)) => {}
                    Some(Err(e)) => debug!(error = %e, "probe task aborted"),
                },
            }
        }
        probes.abort_all();

        let summary = ScanSummary {
            probed,
            found,
            elapsed: started.elapsed(),
        };
        info!(
            probed = summary.probed,
            found = summary.found,
            elapsed_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
            "network scan finished"
        );
        summary
    }
}
