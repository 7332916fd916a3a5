// ── Command API ──
//
// Every external lifecycle operation is a `Command` variant. The
// orchestrator routes each one through its command processor task.

use std::net::Ipv4Addr;

use crate::control::PowerAction;
use crate::error::CoreError;
use crate::model::{Device, DeviceConfiguration, MacAddress};
use crate::scanner::ScanSummary;

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All operations an operator (or the reconciler) can request.
#[derive(Debug, Clone)]
pub enum Command {
    // ── Discovery ────────────────────────────────────────────────────
    ScanNetwork,
    ScanDevice { address: Ipv4Addr },

    // ── Lifecycle ────────────────────────────────────────────────────
    Adopt { id: MacAddress },
    Forget { id: MacAddress },
    Provision { id: MacAddress },
    ResetConfiguration { id: MacAddress, keep_wifi: bool },
    Restart { id: MacAddress },
    Upgrade { id: MacAddress },

    // ── Desired state ────────────────────────────────────────────────
    SetConfiguration {
        id: MacAddress,
        configuration: DeviceConfiguration,
    },

    // ── Outputs ──────────────────────────────────────────────────────
    SetPower {
        id: MacAddress,
        index: u8,
        action: PowerAction,
    },

    DeviceOffline { address: Ipv4Addr },
}

impl Command {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ScanNetwork => "scan-network",
            Self::ScanDevice { .. } => "scan-device",
            Self::Adopt { .. } => "adopt",
            Self::Forget { .. } => "forget",
            Self::Provision { .. } => "provision",
            Self::ResetConfiguration { .. } => "reset-configuration",
            Self::Restart { .. } => "restart",
            Self::Upgrade { .. } => "upgrade",
            Self::SetConfiguration { .. } => "set-configuration",
            Self::SetPower { .. } => "set-power",
            Self::DeviceOffline { .. } => "device-offline",
        }
    }
}

/// Result of a command execution.
#[derive(Debug)]
pub enum CommandResult {
    Ok,
    Scan(ScanSummary),
    Device(Option<Box<Device>>),
    Configuration(DeviceConfiguration),
}
