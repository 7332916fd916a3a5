//! Subcommand handlers and the wiring they share.

pub mod run;
pub mod scan;
pub mod seed;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tasmo_api::transport::TransportConfig;
use tasmo_api::{CommandClient, HttpCommandClient, MemoryBroker};
use tasmo_config::{Config, load_config};
use tasmo_core::{EchoProbe, OrchestratorConfig, TcpEchoProbe};
use tasmo_emulator::{EmulatedNetwork, RestartDelays};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Load the file and environment layers and translate them.
pub fn load(global: &GlobalOpts) -> Result<(Config, OrchestratorConfig), CliError> {
    let path = global.config.clone().unwrap_or_else(tasmo_config::config_path);
    let config_error = |source| CliError::Config {
        path: path.display().to_string(),
        source,
    };
    let config = load_config(Some(&path)).map_err(config_error)?;
    let orchestrator = config.to_orchestrator_config().map_err(config_error)?;
    Ok((config, orchestrator))
}

/// Where commands go and how reachability is checked.
pub struct Backend {
    pub client: Arc<dyn CommandClient>,
    pub probe: Arc<dyn EchoProbe>,
    pub emulated: Option<Arc<EmulatedNetwork>>,
}

impl Backend {
    /// The real network, or `emulate` devices talking to `broker`.
    pub async fn new(
        config: &OrchestratorConfig,
        broker: &Arc<MemoryBroker>,
        emulate: Option<u8>,
    ) -> Result<Self, CliError> {
        if let Some(count) = emulate {
            let network = Arc::new(
                EmulatedNetwork::fleet(count, config.subnet, broker, RestartDelays::default())
                    .await,
            );
            tracing::info!(count, subnet = %config.subnet, "emulating devices");
            return Ok(Self {
                client: Arc::clone(&network) as _,
                probe: Arc::new(EmulatedProbe(Arc::clone(&network))),
                emulated: Some(network),
            });
        }

        let transport = TransportConfig::default().with_timeout(config.timings.command_timeout);
        let client = HttpCommandClient::new(&transport).map_err(CliError::Client)?;
        Ok(Self {
            client: Arc::new(client),
            probe: Arc::new(TcpEchoProbe::default()),
            emulated: None,
        })
    }

    pub fn shutdown(&self) {
        if let Some(network) = &self.emulated {
            network.shutdown();
        }
    }
}

/// Reachability as the emulated network sees it.
struct EmulatedProbe(Arc<EmulatedNetwork>);

#[async_trait]
impl EchoProbe for EmulatedProbe {
    async fn probe(&self, address: Ipv4Addr, _timeout: Duration) -> bool {
        self.0.is_reachable(address)
    }
}
