use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use tasmo_api::MemoryBroker;
use tasmo_config::load_seed;
use tasmo_core::{ChangeKind, DeviceNotification, MemoryStore, Orchestrator};

use super::{Backend, load};
use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;

pub async fn handle(args: &RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (file_config, config) = load(global)?;
    let broker = Arc::new(MemoryBroker::new());
    let backend = Backend::new(&config, &broker, args.emulate).await?;
    let store = Arc::new(MemoryStore::new());

    if let Some(path) = &file_config.seed_file {
        let seed = load_seed(path).map_err(|source| CliError::Seed {
            path: path.clone(),
            source,
        })?;
        let applied = seed.apply(store.as_ref()).await?;
        info!(
            templates = applied.templates,
            configurations = applied.configurations,
            "seed applied"
        );
    }

    let orchestrator = Orchestrator::new(config, Arc::clone(&backend.client), store as _)?;
    orchestrator
        .start(broker as _, Arc::clone(&backend.probe))
        .await?;
    let mut notifications = orchestrator.notifications();

    let summary = orchestrator.scan_network().await?;
    info!(probed = summary.probed, found = summary.found, "initial scan finished");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            signal = &mut shutdown => {
                signal?;
                info!("interrupted, shutting down");
                break;
            }
            notification = notifications.recv() => match notification {
                Ok(notification) => log_notification(&notification),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification receiver lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    orchestrator.shutdown().await;
    backend.shutdown();
    Ok(())
}

fn log_notification(notification: &DeviceNotification) {
    match notification {
        DeviceNotification::Changed { aggregate, kind } => {
            let device = &aggregate.device;
            let verb = match kind {
                ChangeKind::Insert => "discovered",
                ChangeKind::Update | ChangeKind::Replace => "changed",
                ChangeKind::Delete => "removed",
            };
            info!(
                id = %device.id,
                address = %device.ipv4_address,
                topic = %device.topic_name,
                state = ?device.state,
                offline = device.offline,
                "device {verb}"
            );
        }
        DeviceNotification::Removed { id } => info!(id = %id, "device forgotten"),
    }
}
