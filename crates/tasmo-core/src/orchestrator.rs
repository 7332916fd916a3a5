// ── Orchestrator ──
//
// Drives the device lifecycle: discovery, adoption, provisioning,
// restart/reset/upgrade with their settle-and-poll continuations, and the
// background monitors that reconcile store state with what devices report.

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tasmo_api::{CommandClient, PubSubTransport, StatusReport};

use crate::command::{Command, CommandEnvelope, CommandResult};
use crate::config::OrchestratorConfig;
use crate::control::{DeviceControl, PowerAction};
use crate::error::CoreError;
use crate::model::{
    COMMON_CONFIGURATION_ID, Device, DeviceAggregate, DeviceConfiguration, DeviceField,
    DeviceState, DeviceUpdate, MacAddress, Template,
};
use crate::monitor::{self, EchoProbe};
use crate::provision::{provisioning_commands, topic_change};
use crate::scanner::{ScanSummary, Scanner};
use crate::store::{DeviceStore, wait_for_adoption};
use crate::stream::ChangeKind;

const COMMAND_CHANNEL_SIZE: usize = 64;
const NOTIFICATION_CHANNEL_SIZE: usize = 256;

// ── Notifications ────────────────────────────────────────────────

/// Pushed to observers whenever a device's joined view changes.
#[derive(Debug, Clone)]
pub enum DeviceNotification {
    Changed {
        aggregate: Box<DeviceAggregate>,
        kind: ChangeKind,
    },
    Removed {
        id: MacAddress,
    },
}

/// Every device's joined view plus the template catalog.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetSnapshot {
    pub devices: Vec<DeviceAggregate>,
    pub templates: Vec<Template>,
}

// ── Orchestrator ─────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<OrchestratorInner>`. Every operation
/// re-reads the store before acting; the store's per-device atomic
/// update is the only serialization between concurrent flows.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    control: Arc<DeviceControl>,
    scanner: Scanner,
    store: Arc<dyn DeviceStore>,
    notification_tx: broadcast::Sender<Arc<DeviceNotification>>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    command_rx: Mutex<Option<mpsc::Receiver<CommandEnvelope>>>,
    running: AtomicBool,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Create an orchestrator. Does NOT start background work; call
    /// [`start()`](Self::start) for the command processor and monitors.
    pub fn new(
        config: OrchestratorConfig,
        client: Arc<dyn CommandClient>,
        store: Arc<dyn DeviceStore>,
    ) -> Result<Self, CoreError> {
        config.validate()?;

        let control = Arc::new(DeviceControl::new(
            client,
            config.fleet_prefix.clone(),
            &config.timings,
        ));
        let scanner = Scanner::new(
            Arc::clone(&control),
            config.scan_concurrency,
            config.timings.command_timeout,
        );
        let (notification_tx, _) = broadcast::channel(NOTIFICATION_CHANNEL_SIZE);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);

        Ok(Self {
            inner: Arc::new(OrchestratorInner {
                config,
                control,
                scanner,
                store,
                notification_tx,
                command_tx,
                command_rx: Mutex::new(Some(command_rx)),
                running: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn DeviceStore> {
        &self.inner.store
    }

    /// Subscribe to device change notifications.
    pub fn notifications(&self) -> broadcast::Receiver<Arc<DeviceNotification>> {
        self.inner.notification_tx.subscribe()
    }

    /// The state an observer starts from before following
    /// [`notifications`](Self::notifications). Devices are ordered by
    /// address, templates by name.
    pub async fn snapshot(&self) -> Result<FleetSnapshot, CoreError> {
        let mut devices = self.inner.store.device_aggregates().await?;
        devices.sort_by_key(|a| a.device.ipv4_address);
        let mut templates = self.inner.store.templates().await?;
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(FleetSnapshot { devices, templates })
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the command processor and the telemetry, store-change and
    /// liveness monitors.
    ///
    /// Subscriptions are taken before anything is spawned, so nothing
    /// published after `start` returns is missed.
    pub async fn start(
        &self,
        transport: Arc<dyn PubSubTransport>,
        probe: Arc<dyn EchoProbe>,
    ) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::NotRunning);
        }
        let Some(command_rx) = self.inner.command_rx.lock().await.take() else {
            return Err(CoreError::Internal("orchestrator already started".into()));
        };

        let test_filter = format!("{}/#", self.inner.config.fleet_prefix);
        let telemetry =
            transport.subscribe(&[monitor::telemetry::STATE_FILTER, test_filter.as_str()]);
        let device_changes = self.inner.store.watch_devices();
        let configuration_changes = self.inner.store.watch_configurations();
        let template_changes = self.inner.store.watch_templates();
        let cancel = self.inner.cancel.clone();

        let handles = vec![
            tokio::spawn(command_processor_task(
                self.clone(),
                command_rx,
                cancel.clone(),
            )),
            tokio::spawn(monitor::telemetry::run(self.clone(), telemetry, cancel.clone())),
            tokio::spawn(monitor::changes::run(
                self.clone(),
                device_changes,
                configuration_changes,
                template_changes,
                cancel.clone(),
            )),
            tokio::spawn(monitor::liveness::run(self.clone(), probe, cancel)),
        ];
        self.inner.task_handles.lock().await.extend(handles);
        self.inner.running.store(true, Ordering::SeqCst);

        info!(
            fleet_prefix = %self.inner.config.fleet_prefix,
            "orchestrator started"
        );
        Ok(())
    }

    /// Cancel every background task and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.cancel.cancel();

        // Tasks may register continuations while we join, so drain until empty.
        loop {
            let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
        debug!("orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ── Command execution ────────────────────────────────────────

    /// Execute a command through the command processor and await the result.
    pub async fn execute(&self, cmd: Command) -> Result<CommandResult, CoreError> {
        let rx = self.enqueue(cmd).await?;
        rx.await.map_err(|_| CoreError::NotRunning)?
    }

    // ── Discovery ────────────────────────────────────────────────

    /// Probe the configured range, upsert every device that answers, ask
    /// unmanaged ones for a test ping, then flag devices the scan did not
    /// reach as offline.
    pub async fn scan_network(&self) -> Result<ScanSummary, CoreError> {
        let config = &self.inner.config;
        let started_at = Utc::now();
        let cancel = self.inner.cancel.child_token();

        let addresses = config.scan_range().map(|octet| config.host_address(octet));
        let summary = self
            .inner
            .scanner
            .scan(addresses, config.timings.scan_timeout, &cancel, |report| {
                self.record_scanned(report)
            })
            .await;

        if cancel.is_cancelled() {
            return Ok(summary);
        }
        let stale = self.inner.store.set_devices_offline(started_at).await?;
        if stale > 0 {
            warn!(count = stale, "devices missing from scan marked offline");
        }
        Ok(summary)
    }

    /// Fetch one device's full status and upsert it.
    pub async fn scan_device(&self, address: Ipv4Addr) -> Result<Option<Device>, CoreError> {
        let Some(report) = self.inner.control.fetch_full_status(address).await? else {
            debug!(address = %address, "device did not answer status query");
            return Ok(None);
        };
        self.upsert_report(&report).await
    }

    // ── Lifecycle operations ─────────────────────────────────────

    /// Push broker settings to a device and wait (detached) for its test
    /// ping to come back over pub/sub.
    pub async fn adopt(&self, id: &MacAddress) -> Result<(), CoreError> {
        let device = self.require_device(id).await?;
        let result = self.begin_adoption(&device).await;
        self.offline_on_unresponsive(result).await
    }

    /// Drop a device and its configuration, then tell it to forget the broker.
    pub async fn forget(&self, id: &MacAddress) -> Result<(), CoreError> {
        let device = self.require_device(id).await?;
        let store = &self.inner.store;
        store.delete_device(id).await?;
        store.delete_configuration(id.as_str()).await?;
        if let Err(e) = self.inner.control.clear_pubsub(device.ipv4_address).await {
            debug!(id = %id, error = %e, "clearing broker settings failed");
        }
        info!(id = %id, "device forgotten");
        Ok(())
    }

    /// Bring a device in line with its configuration and template.
    pub async fn provision(&self, id: &MacAddress) -> Result<(), CoreError> {
        let aggregate = self
            .inner
            .store
            .device_aggregate(id, true)
            .await?
            .ok_or_else(|| CoreError::device_not_found(id))?;
        let result = self.begin_provisioning(&aggregate).await;
        self.offline_on_unresponsive(result).await
    }

    /// Factory-reset a device. Once it is back, it is no longer managed.
    pub async fn reset_configuration(
        &self,
        id: &MacAddress,
        keep_wifi: bool,
    ) -> Result<(), CoreError> {
        let device = self.require_device(id).await?;
        let result = self.begin_reset(&device, keep_wifi).await;
        self.offline_on_unresponsive(result).await
    }

    pub async fn restart(&self, id: &MacAddress) -> Result<(), CoreError> {
        let device = self.require_device(id).await?;
        let result = self.begin_restart(&device).await;
        self.offline_on_unresponsive(result).await
    }

    pub async fn upgrade(&self, id: &MacAddress) -> Result<(), CoreError> {
        let device = self.require_device(id).await?;
        let result = self.begin_upgrade(&device).await;
        self.offline_on_unresponsive(result).await
    }

    /// Store the desired configuration for `id`, keyed by its normalized id.
    pub async fn set_configuration(
        &self,
        id: &MacAddress,
        mut configuration: DeviceConfiguration,
    ) -> Result<DeviceConfiguration, CoreError> {
        configuration.id = id.as_str().to_owned();
        self.inner.store.replace_configuration(configuration).await
    }

    pub async fn set_power(
        &self,
        id: &MacAddress,
        index: u8,
        action: PowerAction,
    ) -> Result<(), CoreError> {
        let device = self.require_device(id).await?;
        let result = self
            .inner
            .control
            .set_power(device.ipv4_address, index, action)
            .await;
        self.offline_on_unresponsive(result).await
    }

    /// Flag the device at `address` as offline.
    pub async fn device_offline(&self, address: Ipv4Addr) -> Result<(), CoreError> {
        let changed = self.inner.store.set_device_offline(address, true).await?;
        if changed > 0 {
            warn!(address = %address, "device marked offline");
        }
        Ok(())
    }

    // ── Crate-internal helpers ───────────────────────────────────

    pub(crate) fn notify(&self, notification: DeviceNotification) {
        // No subscribers is fine.
        let _ = self.inner.notification_tx.send(Arc::new(notification));
    }

    /// Spawn a task and keep its handle so `shutdown` can join it.
    pub(crate) async fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task);
        let mut handles = self.inner.task_handles.lock().await;
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Spawn a detached continuation; failures are logged.
    async fn spawn_continuation<F>(&self, operation: &'static str, task: F)
    where
        F: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        self.spawn_tracked(async move {
            if let Err(e) = task.await {
                error!(operation, error = %e, "background continuation failed");
            }
        })
        .await;
    }

    // ── Private helpers ──────────────────────────────────────────

    async fn enqueue(
        &self,
        command: Command,
    ) -> Result<tokio::sync::oneshot::Receiver<Result<CommandResult, CoreError>>, CoreError> {
        if !self.is_running() {
            return Err(CoreError::NotRunning);
        }
        let (response_tx, rx) = tokio::sync::oneshot::channel();
        self.inner
            .command_tx
            .send(CommandEnvelope {
                command,
                response_tx,
            })
            .await
            .map_err(|_| CoreError::NotRunning)?;
        Ok(rx)
    }

    async fn require_device(&self, id: &MacAddress) -> Result<Device, CoreError> {
        self.inner
            .store
            .device(id)
            .await?
            .ok_or_else(|| CoreError::device_not_found(id))
    }

    /// An unresponsive device is an expected outcome: mark it offline and
    /// report success.
    async fn offline_on_unresponsive(
        &self,
        result: Result<(), CoreError>,
    ) -> Result<(), CoreError> {
        match result {
            Err(CoreError::DeviceUnresponsive { address }) => {
                warn!(address = %address, "device not responding");
                self.device_offline(address).await
            }
            other => other,
        }
    }

    async fn upsert_report(&self, report: &StatusReport) -> Result<Option<Device>, CoreError> {
        let update = DeviceUpdate::try_from(report)?;
        self.inner.store.update_device(update, true).await
    }

    async fn record_scanned(&self, report: StatusReport) {
        match self.upsert_report(&report).await {
            Ok(Some(device)) => {
                let required = &self.inner.config.required_firmware;
                if !device.firmware_supported(required) {
                    warn!(
                        id = %device.id,
                        version = %device.firmware_version,
                        %required,
                        "firmware older than required"
                    );
                }
                if device.is_adopted() {
                    return;
                }
                if let Err(e) = self
                    .inner
                    .control
                    .test_pubsub(device.ipv4_address, &device.topic_name, &device.id)
                    .await
                {
                    debug!(id = %device.id, error = %e, "test ping failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "discarding scan result"),
        }
    }

    async fn begin_adoption(&self, device: &Device) -> Result<(), CoreError> {
        self.inner
            .store
            .update_device_state(&device.id, Some(DeviceState::Adopting), &[DeviceField::AdoptedAt])
            .await?;
        info!(id = %device.id, address = %device.ipv4_address, "adopting device");
        self.inner
            .control
            .configure_pubsub(device.ipv4_address, &device.topic_name, &self.inner.config.pubsub)
            .await?;

        let this = self.clone();
        let id = device.id.clone();
        let topic = device.topic_name.clone();
        let address = device.ipv4_address;
        let cancel = self.inner.cancel.child_token();
        self.spawn_continuation("adopt", async move {
            this.finish_adoption(&id, &topic, address, &cancel).await
        })
        .await;
        Ok(())
    }

    async fn finish_adoption(
        &self,
        id: &MacAddress,
        topic: &str,
        address: Ipv4Addr,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let timings = &self.inner.config.timings;
        let Some(responding) = self
            .inner
            .control
            .wait_for_responding(address, timings.adoption_settle, cancel)
            .await
        else {
            return Ok(());
        };

        if responding.succeeded {
            let control = &self.inner.control;
            let adopted = wait_for_adoption(
                self.inner.store.as_ref(),
                id,
                || {
                    let control = Arc::clone(control);
                    let topic = topic.to_owned();
                    let id = id.clone();
                    async move { control.test_pubsub(address, &topic, &id).await }
                },
                timings.poll_attempts,
                timings.poll_interval,
                cancel,
            )
            .await;
            match adopted {
                None => return Ok(()),
                Some(outcome) if outcome.succeeded => {
                    info!(id = %id, attempts = outcome.attempts, "device adopted");
                    return Ok(());
                }
                Some(_) => {}
            }
        }

        warn!(id = %id, address = %address, "adoption did not complete");
        self.inner
            .store
            .update_device_state(id, Some(DeviceState::AdoptionPending), &[])
            .await?;
        Ok(())
    }

    async fn begin_provisioning(&self, aggregate: &DeviceAggregate) -> Result<(), CoreError> {
        let store = &self.inner.store;
        let device = &aggregate.device;
        let common = store.configuration(COMMON_CONFIGURATION_ID).await?;
        let commands = provisioning_commands(aggregate, common.as_ref());

        // The stored topic must already match when the device's first
        // telemetry on the new topic arrives.
        let mut update = DeviceUpdate::new(device.id.clone())
            .state(DeviceState::Provisioning)
            .unset(DeviceField::ProvisionedAt);
        if let Some(topic) = topic_change(aggregate) {
            update = update.topic_name(topic);
        }
        store.update_device(update, false).await?;

        info!(id = %device.id, address = %device.ipv4_address, "provisioning device");
        self.inner
            .control
            .configure_device(device.ipv4_address, &commands)
            .await
    }

    async fn begin_reset(&self, device: &Device, keep_wifi: bool) -> Result<(), CoreError> {
        self.inner
            .store
            .update_device_state(&device.id, Some(DeviceState::Restarting), &[])
            .await?;
        info!(id = %device.id, keep_wifi, "resetting device configuration");
        self.inner.control.reset(device.ipv4_address, keep_wifi).await?;

        let this = self.clone();
        let id = device.id.clone();
        let address = device.ipv4_address;
        let cancel = self.inner.cancel.child_token();
        self.spawn_continuation("reset", async move {
            let settle = this.inner.config.timings.restart_settle;
            let Some(responding) = this
                .inner
                .control
                .wait_for_responding(address, settle, &cancel)
                .await
            else {
                return Ok(());
            };
            let unset = [DeviceField::AdoptedAt, DeviceField::ProvisionedAt];
            this.inner.store.update_device_state(&id, None, &unset).await?;
            if responding.succeeded {
                this.scan_device(address).await?;
            }
            Ok(())
        })
        .await;
        Ok(())
    }

    async fn begin_restart(&self, device: &Device) -> Result<(), CoreError> {
        self.inner
            .store
            .update_device_state(&device.id, Some(DeviceState::Restarting), &[])
            .await?;
        info!(id = %device.id, "restarting device");
        self.inner.control.restart(device.ipv4_address).await?;

        let this = self.clone();
        let id = device.id.clone();
        let address = device.ipv4_address;
        let cancel = self.inner.cancel.child_token();
        self.spawn_continuation("restart", async move {
            let settle = this.inner.config.timings.restart_settle;
            if this
                .inner
                .control
                .wait_for_responding(address, settle, &cancel)
                .await
                .is_none()
            {
                return Ok(());
            }
            this.inner.store.update_device_state(&id, None, &[]).await?;
            Ok(())
        })
        .await;
        Ok(())
    }

    async fn begin_upgrade(&self, device: &Device) -> Result<(), CoreError> {
        self.inner
            .store
            .update_device_state(&device.id, Some(DeviceState::Upgrading), &[])
            .await?;
        info!(id = %device.id, firmware = %device.firmware_version, "upgrading device");
        self.inner.control.upgrade(device.ipv4_address).await?;

        let this = self.clone();
        let id = device.id.clone();
        let address = device.ipv4_address;
        let cancel = self.inner.cancel.child_token();
        self.spawn_continuation("upgrade", async move {
            let settle = this.inner.config.timings.upgrade_settle;
            let Some(responding) = this
                .inner
                .control
                .wait_for_responding(address, settle, &cancel)
                .await
            else {
                return Ok(());
            };
            this.inner.store.update_device_state(&id, None, &[]).await?;
            if responding.succeeded {
                this.scan_device(address).await?;
            }
            Ok(())
        })
        .await;
        Ok(())
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Pull commands off the channel and run each in its own tracked task.
async fn command_processor_task(
    orchestrator: Orchestrator,
    mut rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let this = orchestrator.clone();
                orchestrator
                    .spawn_tracked(async move {
                        let name = envelope.command.name();
                        let result = route_command(&this, envelope.command).await;
                        if let Err(e) = &result {
                            warn!(command = name, error = %e, "command failed");
                        }
                        let _ = envelope.response_tx.send(result);
                    })
                    .await;
            }
        }
    }
}

// ── Command routing ──────────────────────────────────────────────

async fn route_command(
    orchestrator: &Orchestrator,
    cmd: Command,
) -> Result<CommandResult, CoreError> {
    match cmd {
        Command::ScanNetwork => Ok(CommandResult::Scan(orchestrator.scan_network().await?)),
        Command::ScanDevice { address } => Ok(CommandResult::Device(
            orchestrator.scan_device(address).await?.map(Box::new),
        )),
        Command::Adopt { id } => {
            orchestrator.adopt(&id).await?;
            Ok(CommandResult::Ok)
        }
        Command::Forget { id } => {
            orchestrator.forget(&id).await?;
            Ok(CommandResult::Ok)
        }
        Command::Provision { id } => {
            orchestrator.provision(&id).await?;
            Ok(CommandResult::Ok)
        }
        Command::ResetConfiguration { id, keep_wifi } => {
            orchestrator.reset_configuration(&id, keep_wifi).await?;
            Ok(CommandResult::Ok)
        }
        Command::Restart { id } => {
            orchestrator.restart(&id).await?;
            Ok(CommandResult::Ok)
        }
        Command::Upgrade { id } => {
            orchestrator.upgrade(&id).await?;
            Ok(CommandResult::Ok)
        }
        Command::SetConfiguration { id, configuration } => Ok(CommandResult::Configuration(
            orchestrator.set_configuration(&id, configuration).await?,
        )),
        Command::SetPower { id, index, action } => {
            orchestrator.set_power(&id, index, action).await?;
            Ok(CommandResult::Ok)
        }
        Command::DeviceOffline { address } => {
            orchestrator.device_offline(address).await?;
            Ok(CommandResult::Ok)
        }
    }
}
