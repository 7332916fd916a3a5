// ── Telemetry monitor ──
//
// Consumes `tele/<topic>/STATE` reports and `<fleet_prefix>/<topic>/mqttWorks`
// test pings. Test pings complete adoption; state reports refresh the
// stored status, finish provisioning and trigger a re-sync after restarts.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tasmo_api::{Message, Subscription, TelemetryState};

use crate::error::CoreError;
use crate::model::{DeviceField, DeviceState, DeviceStatus, DeviceUpdate, MacAddress};
use crate::orchestrator::Orchestrator;

/// Filter for periodic state reports.
pub const STATE_FILTER: &str = "tele/+/STATE";

const STATE_PREFIX: &str = "tele";

pub(crate) async fn run(
    orchestrator: Orchestrator,
    mut subscription: Subscription,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = subscription.recv() => {
                let Some(message) = message else { break };
                let this = orchestrator.clone();
                orchestrator
                    .spawn_tracked(async move {
                        if let Err(e) = handle_message(&this, &message).await {
                            warn!(topic = %message.topic, error = %e, "telemetry handling failed");
                        }
                    })
                    .await;
            }
        }
    }
    debug!("telemetry monitor stopped");
}

/// Route one message by its first topic segment.
pub(crate) async fn handle_message(
    orchestrator: &Orchestrator,
    message: &Message,
) -> Result<(), CoreError> {
    let segments: Vec<&str> = message.topic.split('/').collect();
    let [prefix, .., topic_name, _] = segments.as_slice() else {
        warn!(topic = %message.topic, "topic too short to name a device");
        return Ok(());
    };
    let Some(payload) = message.payload.as_deref() else {
        warn!(topic = %message.topic, "message without payload");
        return Ok(());
    };

    if *prefix == orchestrator.config().fleet_prefix {
        handle_test_ping(orchestrator, payload).await
    } else if *prefix == STATE_PREFIX {
        handle_state(orchestrator, topic_name, payload).await
    } else {
        debug!(topic = %message.topic, "ignoring message");
        Ok(())
    }
}

/// The device proved its broker settings work: it is adopted.
async fn handle_test_ping(orchestrator: &Orchestrator, payload: &str) -> Result<(), CoreError> {
    let id = MacAddress::new(payload);
    let update = DeviceUpdate::new(id.clone())
        .adopted_at(Utc::now())
        .state(DeviceState::ProvisionPending)
        .offline(false);
    match orchestrator.store().update_device(update, false).await? {
        Some(_) => info!(id = %id, "test ping received"),
        None => warn!(id = %id, "test ping from unknown device"),
    }
    Ok(())
}

async fn handle_state(
    orchestrator: &Orchestrator,
    topic_name: &str,
    payload: &str,
) -> Result<(), CoreError> {
    let store = orchestrator.store();
    let Some(device) = store.device_by_topic(topic_name).await? else {
        warn!(topic = topic_name, "telemetry from unknown topic");
        return Ok(());
    };
    let telemetry = match TelemetryState::from_body(payload) {
        Ok(telemetry) => telemetry,
        Err(e) => {
            warn!(topic = topic_name, error = %e, "malformed telemetry");
            return Ok(());
        }
    };

    let was_provisioning = device.state == Some(DeviceState::Provisioning);
    let restarted = telemetry.uptime_sec < device.status.uptime_seconds;

    let mut update = DeviceUpdate::new(device.id.clone())
        .status(DeviceStatus::from(&telemetry))
        .offline(false);
    if was_provisioning {
        update = update
            .provisioned_at(Utc::now())
            .unset(DeviceField::State);
    }
    store.update_device(update, false).await?;

    if was_provisioning {
        info!(id = %device.id, "device provisioned");
    }
    if was_provisioning || restarted {
        debug!(id = %device.id, restarted, "re-syncing device");
        orchestrator.scan_device(device.ipv4_address).await?;
    }
    Ok(())
}
