//! Device lifecycle orchestration for a fleet of Tasmota relays.
//!
//! - **[`Orchestrator`]**: central facade. Discovers devices on the
//!   managed subnet, adopts them onto the broker, provisions them from
//!   their stored configuration, and runs the telemetry, store-change and
//!   liveness monitors that keep the store in step with the fleet.
//!
//! - **[`DeviceStore`]**: persistence contract with field-level atomic
//!   updates and change streams. [`MemoryStore`] is the in-process
//!   implementation.
//!
//! - **[`DeviceControl`]**: typed command wrappers plus the
//!   [`poll_until`] primitive the lifecycle flows wait on.
//!
//! - **[`Command`]**: typed lifecycle requests routed through the
//!   orchestrator's command processor.

pub mod command;
pub mod config;
pub mod control;
pub mod convert;
pub mod error;
pub mod model;
pub mod monitor;
pub mod orchestrator;
pub mod provision;
pub mod scanner;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{Command, CommandResult};
pub use config::{OrchestratorConfig, Timings};
pub use control::{DeviceControl, PollOutcome, PowerAction, poll_until};
pub use error::CoreError;
pub use monitor::{EchoProbe, TcpEchoProbe};
pub use orchestrator::{DeviceNotification, FleetSnapshot, Orchestrator};
pub use scanner::{ScanSummary, Scanner};
pub use store::{DeviceStore, MemoryStore};
pub use stream::{ChangeKind, ChangeStream, DocumentChange};

pub use model::{
    Device, DeviceAggregate, DeviceConfiguration, DeviceField, DeviceState, DeviceStatus,
    DeviceUpdate, MacAddress, PowerState, Template,
};
