// Scanner tests against an emulated fleet.

#![allow(clippy::unwrap_used)]

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use tasmo_api::{CommandClient, Invocation, MemoryBroker};
use tasmo_core::{DeviceControl, Scanner, Timings};
use tasmo_emulator::{EmulatedNetwork, RestartDelays};

const SUBNET: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 0);

fn hosts() -> impl Iterator<Item = Ipv4Addr> {
    (95..=110).map(|octet| Ipv4Addr::new(10, 0, 0, octet))
}

fn scanner(client: Arc<dyn CommandClient>, concurrency: usize) -> Scanner {
    let control = Arc::new(DeviceControl::new(client, "fleet", &Timings::default()));
    Scanner::new(control, concurrency, Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn test_scan_reports_every_answering_host() {
    let broker = Arc::new(MemoryBroker::new());
    let network =
        Arc::new(EmulatedNetwork::fleet(4, SUBNET, &broker, RestartDelays::quick()).await);
    network.device(Ipv4Addr::new(10, 0, 0, 103)).unwrap().unplug();

    let found = Arc::new(Mutex::new(Vec::new()));
    let summary = scanner(network, 3)
        .scan(hosts(), Duration::from_secs(10), &CancellationToken::new(), |report| {
            let found = Arc::clone(&found);
            async move { found.lock().unwrap().push(report.network.ip_address) }
        })
        .await;

    assert_eq!(summary.probed, 16);
    assert_eq!(summary.found, 3);
    let mut found = found.lock().unwrap().clone();
    found.sort();
    assert_eq!(found, vec!["10.0.0.101", "10.0.0.102", "10.0.0.104"]);
}

/// Never answers; every invocation hangs until the caller gives up.
struct Blackhole;

#[async_trait]
impl CommandClient for Blackhole {
    async fn invoke(
        &self,
        _address: Ipv4Addr,
        _command: &str,
        _params: Option<&str>,
        _mode: Invocation,
    ) -> Result<Option<String>, tasmo_api::Error> {
        std::future::pending().await
    }
}

#[tokio::test(start_paused = true)]
async fn test_scan_stops_at_deadline() {
    let scanner = Scanner::new(
        Arc::new(DeviceControl::new(Arc::new(Blackhole), "fleet", &Timings::default())),
        2,
        Duration::from_secs(60),
    );

    let started = tokio::time::Instant::now();
    let summary = scanner
        .scan(hosts(), Duration::from_secs(3), &CancellationToken::new(), |_| async {})
        .await;

    assert_eq!(summary.found, 0);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_slow_result_handler_cannot_outlast_deadline() {
    let broker = Arc::new(MemoryBroker::new());
    let network =
        Arc::new(EmulatedNetwork::fleet(3, SUBNET, &broker, RestartDelays::quick()).await);

    let started = tokio::time::Instant::now();
    let summary = scanner(network, 4)
        .scan(hosts(), Duration::from_secs(3), &CancellationToken::new(), |_| {
            tokio::time::sleep(Duration::from_secs(30))
        })
        .await;

    assert!(summary.found >= 1);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_scan_returns_immediately() {
    let broker = Arc::new(MemoryBroker::new());
    let network =
        Arc::new(EmulatedNetwork::fleet(2, SUBNET, &broker, RestartDelays::quick()).await);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = scanner(network, 4)
        .scan(hosts(), Duration::from_secs(10), &cancel, |_| async {})
        .await;

    assert_eq!(summary.found, 0);
}
