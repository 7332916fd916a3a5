// ── Background monitors ──
//
// Long-running tasks the orchestrator spawns on `start`. Each one reacts
// to an external signal (telemetry, store changes, liveness probes) and
// turns it into store writes or lifecycle operations.

pub mod changes;
pub mod liveness;
pub mod telemetry;

pub use liveness::{EchoProbe, TcpEchoProbe};
