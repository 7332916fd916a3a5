// tasmo-api: Async client for the Tasmota HTTP command protocol, plus the
// topic-based pub/sub transport devices push telemetry over.

pub mod client;
pub mod error;
pub mod models;
pub mod pubsub;
pub mod transport;

pub use client::{CommandClient, HttpCommandClient, Invocation};
pub use error::Error;
pub use models::{CommandResponse, PowerState, StatusReport, TelemetryState};
pub use pubsub::{MemoryBroker, Message, PubSubSettings, PubSubTransport, Subscription};
