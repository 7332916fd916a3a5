use std::sync::Arc;

use tracing::info;

use tasmo_api::MemoryBroker;
use tasmo_core::{MemoryStore, Orchestrator};

use super::{Backend, load};
use crate::cli::{GlobalOpts, ScanArgs};
use crate::error::CliError;

pub async fn handle(args: &ScanArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (_, config) = load(global)?;
    let broker = Arc::new(MemoryBroker::new());
    let backend = Backend::new(&config, &broker, args.emulate).await?;
    let store = Arc::new(MemoryStore::new());

    let orchestrator = Orchestrator::new(config, Arc::clone(&backend.client), store as _)?;
    let summary = orchestrator.scan_network().await?;
    info!(
        probed = summary.probed,
        found = summary.found,
        elapsed_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
        "scan finished"
    );

    let snapshot = orchestrator.snapshot().await?;
    print!("{}", serde_yaml::to_string(&snapshot)?);

    orchestrator.shutdown().await;
    backend.shutdown();
    Ok(())
}
