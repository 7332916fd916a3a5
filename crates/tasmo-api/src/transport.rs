// Shared transport configuration for building reqwest::Client instances.
//
// Devices answer plain HTTP on the local network, so the only knobs are
// the request timeout, the port and the user agent.

use std::time::Duration;

/// Default per-command timeout. Embedded firmware answers in well
/// under a second when healthy.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
    /// Port the device web server listens on. `None` means 80.
    pub port: Option<u16>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            port: None,
            user_agent: concat!("tasmofleet/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` from this config.
    pub fn build_client(&self) -> Result<reqwest::Client, crate::error::Error> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .build()?;
        Ok(client)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_five_seconds() {
        let config = TransportConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(config.port.is_none());
        assert!(config.user_agent.starts_with("tasmofleet/"));
    }

    #[test]
    fn builders_override_fields() {
        let config = TransportConfig::default()
            .with_timeout(Duration::from_millis(250))
            .with_port(8080);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.port, Some(8080));
        assert!(config.build_client().is_ok());
    }
}
