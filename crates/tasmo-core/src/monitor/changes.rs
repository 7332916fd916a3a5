// ── Store change monitor ──
//
// Turns device, configuration and template changes into notifications,
// and provisions devices whose desired state moved.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{Device, DeviceConfiguration, DeviceState, MacAddress, Template};
use crate::orchestrator::{DeviceNotification, Orchestrator};
use crate::stream::{ChangeKind, ChangeStream, DocumentChange};

pub(crate) async fn run(
    orchestrator: Orchestrator,
    mut devices: ChangeStream<Device>,
    mut configurations: ChangeStream<DeviceConfiguration>,
    mut templates: ChangeStream<Template>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            change = devices.next() => {
                let Some(change) = change else { break };
                let this = orchestrator.clone();
                orchestrator
                    .spawn_tracked(async move {
                        if let Err(e) = on_device_change(&this, change).await {
                            warn!(error = %e, "device change handling failed");
                        }
                    })
                    .await;
            }
            change = configurations.next() => {
                let Some(change) = change else { break };
                let this = orchestrator.clone();
                orchestrator
                    .spawn_tracked(async move {
                        if let Err(e) = on_configuration_change(&this, change).await {
                            warn!(error = %e, "configuration change handling failed");
                        }
                    })
                    .await;
            }
            change = templates.next() => {
                let Some(change) = change else { break };
                let this = orchestrator.clone();
                orchestrator
                    .spawn_tracked(async move {
                        if let Err(e) = on_template_change(&this, change).await {
                            warn!(error = %e, "template change handling failed");
                        }
                    })
                    .await;
            }
        }
    }
    debug!("change monitor stopped");
}

async fn on_device_change(
    orchestrator: &Orchestrator,
    change: DocumentChange<Device>,
) -> Result<(), CoreError> {
    let kind = change.kind();
    let id = match change {
        DocumentChange::Delete { id } => {
            orchestrator.notify(DeviceNotification::Removed {
                id: MacAddress::new(id),
            });
            return Ok(());
        }
        DocumentChange::Insert(device)
        | DocumentChange::Update(device)
        | DocumentChange::Replace(device) => device.id,
    };

    let Some(aggregate) = orchestrator.store().device_aggregate(&id, false).await? else {
        return Ok(());
    };
    let pending = aggregate.device.state == Some(DeviceState::ProvisionPending);
    orchestrator.notify(DeviceNotification::Changed {
        aggregate: Box::new(aggregate),
        kind,
    });
    if pending {
        orchestrator.provision(&id).await?;
    }
    Ok(())
}

async fn on_configuration_change(
    orchestrator: &Orchestrator,
    change: DocumentChange<DeviceConfiguration>,
) -> Result<(), CoreError> {
    let id = match change {
        DocumentChange::Delete { id } => id,
        DocumentChange::Insert(cfg)
        | DocumentChange::Update(cfg)
        | DocumentChange::Replace(cfg) => cfg.id,
    };
    let id = MacAddress::new(id);
    let store = orchestrator.store();

    let Some(device) = store.device(&id).await? else {
        debug!(id = %id, "configuration without a device");
        return Ok(());
    };
    if device.is_adopted() {
        return orchestrator.provision(&id).await;
    }
    if let Some(aggregate) = store.device_aggregate(&id, false).await? {
        orchestrator.notify(DeviceNotification::Changed {
            aggregate: Box::new(aggregate),
            kind: ChangeKind::Update,
        });
    }
    Ok(())
}

/// Re-announce every device reporting the changed template, so observers
/// see the new joined view. Nothing is sent to the devices.
async fn on_template_change(
    orchestrator: &Orchestrator,
    change: DocumentChange<Template>,
) -> Result<(), CoreError> {
    let name = match change {
        DocumentChange::Delete { id } => id,
        DocumentChange::Insert(t) | DocumentChange::Update(t) | DocumentChange::Replace(t) => t.id,
    };
    let affected = orchestrator
        .store()
        .device_aggregates()
        .await?
        .into_iter()
        .filter(|a| a.device.template_name.as_deref() == Some(name.as_str()));
    for aggregate in affected {
        orchestrator.notify(DeviceNotification::Changed {
            aggregate: Box::new(aggregate),
            kind: ChangeKind::Update,
        });
    }
    Ok(())
}
