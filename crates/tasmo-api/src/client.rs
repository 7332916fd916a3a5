//! Command protocol client.
//!
//! Every device exposes a single endpoint, `GET /cm?cmnd=<command line>`,
//! which executes one command (or a `Backlog` of them) and answers with a
//! JSON object. [`CommandClient`] is the seam the rest of the workspace
//! talks to; [`HttpCommandClient`] is the real implementation.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// How a failed invocation is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Invocation {
    /// Transport failures come back as `Ok(None)`.
    #[default]
    Lenient,
    /// Transport failures come back as [`Error::DeviceUnresponsive`].
    Strict,
}

/// Issues single commands to a device and returns the raw response body.
///
/// Implementations never retry; retry policy belongs to the caller.
#[async_trait]
pub trait CommandClient: Send + Sync {
    /// Execute `command` (with optional `params`) on the device at `address`.
    ///
    /// Returns `Ok(Some(body))` on success and `Ok(None)` when the device
    /// answered with a non-success status. Unreachable devices follow `mode`.
    async fn invoke(
        &self,
        address: Ipv4Addr,
        command: &str,
        params: Option<&str>,
        mode: Invocation,
    ) -> Result<Option<String>, Error>;
}

/// Join a command and its parameters into the line the firmware parses.
pub fn command_line(command: &str, params: Option<&str>) -> String {
    format!("{command} {}", params.unwrap_or_default())
        .trim()
        .to_owned()
}

// ── HttpCommandClient ────────────────────────────────────────────────

/// [`CommandClient`] over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpCommandClient {
    http: reqwest::Client,
    port: Option<u16>,
}

impl HttpCommandClient {
    /// Build a client from a [`TransportConfig`].
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            port: transport.port,
        })
    }

    /// Wrap an existing `reqwest::Client`. Used by tests to point at a
    /// mock server on a non-standard port.
    pub fn from_reqwest(http: reqwest::Client, port: Option<u16>) -> Self {
        Self { http, port }
    }

    /// Build the request URL for a command line.
    pub fn command_url(&self, address: Ipv4Addr, line: &str) -> Result<Url, Error> {
        let base = match self.port {
            Some(port) => format!("http://{address}:{port}/cm"),
            None => format!("http://{address}/cm"),
        };
        let mut url = Url::parse(&base)?;
        url.query_pairs_mut().append_pair("cmnd", line);
        Ok(url)
    }
}

#[async_trait]
impl CommandClient for HttpCommandClient {
    async fn invoke(
        &self,
        address: Ipv4Addr,
        command: &str,
        params: Option<&str>,
        mode: Invocation,
    ) -> Result<Option<String>, Error> {
        let line = command_line(command, params);
        let url = self.command_url(address, &line)?;
        debug!(%address, command = %line, "invoking device command");

        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => return not_responding(address, mode, &e),
        };

        if !response.status().is_success() {
            debug!(%address, status = %response.status(), "device rejected command");
            return Ok(None);
        }

        match response.text().await {
            Ok(body) => Ok(Some(body)),
            Err(e) => not_responding(address, mode, &e),
        }
    }
}

fn not_responding(
    address: Ipv4Addr,
    mode: Invocation,
    err: &reqwest::Error,
) -> Result<Option<String>, Error> {
    debug!(%address, error = %err, "device did not respond");
    match mode {
        Invocation::Strict => Err(Error::DeviceUnresponsive { address }),
        Invocation::Lenient => Ok(None),
    }
}
