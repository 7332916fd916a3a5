//! Topic-based publish/subscribe transport.
//!
//! Devices push telemetry to `tele/<topic>/STATE` and answer connectivity
//! tests on `<fleet-prefix>/<topic>/mqttWorks`. [`PubSubTransport`] is the
//! contract the monitors consume; [`MemoryBroker`] is an in-process broker
//! backed by a [`tokio::sync::broadcast`] channel, used by the emulated
//! fleet and by tests.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Error;

// ── Broadcast channel capacity ───────────────────────────────────────

const MESSAGE_CHANNEL_CAPACITY: usize = 1024;

/// Default broker port.
pub const DEFAULT_PORT: u16 = 1883;

/// Default broker user the firmware falls back to.
pub const DEFAULT_USER: &str = "DVES_USER";

// ── Message ──────────────────────────────────────────────────────────

/// A single message on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Option<String>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: Some(payload.into()),
        }
    }
}

// ── PubSubSettings ───────────────────────────────────────────────────

/// Broker endpoint and credentials, as configured on a device.
#[derive(Debug, Clone)]
pub struct PubSubSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
}

impl Default for PubSubSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            username: DEFAULT_USER.to_owned(),
            password: SecretString::from(String::new()),
        }
    }
}

impl PubSubSettings {
    /// `true` when a host is set.
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }

    /// Endpoint and credential equality.
    pub fn matches(&self, other: &Self) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.username == other.username
            && self.password.expose_secret() == other.password.expose_secret()
    }
}

// ── Topic filters ────────────────────────────────────────────────────

/// MQTT-style filter matching: `+` matches one level, a trailing `#`
/// matches the rest (including nothing).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) | (None, None) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            _ => return false,
        }
    }
}

// ── Transport contract ───────────────────────────────────────────────

#[async_trait]
pub trait PubSubTransport: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), Error>;

    /// Subscribe to every message matching any of `filters`.
    fn subscribe(&self, filters: &[&str]) -> Subscription;
}

/// A filtered view over the broker's message stream.
pub struct Subscription {
    rx: broadcast::Receiver<Arc<Message>>,
    filters: Vec<String>,
}

impl Subscription {
    pub fn new(rx: broadcast::Receiver<Arc<Message>>, filters: &[&str]) -> Self {
        Self {
            rx,
            filters: filters.iter().map(|f| (*f).to_owned()).collect(),
        }
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    fn accepts(&self, topic: &str) -> bool {
        self.filters.iter().any(|f| topic_matches(f, topic))
    }

    /// Wait for the next matching message. `None` once the broker is gone.
    ///
    /// A lagging subscriber skips ahead rather than failing.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        loop {
            match self.rx.recv().await {
                Ok(message) if self.accepts(&message.topic) => return Some(message),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "pub/sub subscriber lagged, resuming");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ── MemoryBroker ─────────────────────────────────────────────────────

/// In-process broker.
///
/// With credentials set, only clients presenting matching settings may
/// publish (see [`accepts`](Self::accepts)); without, any configured host
/// is accepted.
pub struct MemoryBroker {
    tx: broadcast::Sender<Arc<Message>>,
    credentials: Option<PubSubSettings>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            tx,
            credentials: None,
        }
    }

    pub fn with_credentials(settings: PubSubSettings) -> Self {
        Self {
            credentials: Some(settings),
            ..Self::new()
        }
    }

    /// Whether a client configured with `settings` can reach this broker.
    pub fn accepts(&self, settings: &PubSubSettings) -> bool {
        match &self.credentials {
            Some(expected) => expected.matches(settings),
            None => settings.is_configured(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl PubSubTransport for MemoryBroker {
    async fn publish(&self, message: Message) -> Result<(), Error> {
        debug!(topic = %message.topic, "publishing");
        // No subscribers is not an error: the message is simply dropped.
        let _ = self.tx.send(Arc::new(message));
        Ok(())
    }

    fn subscribe(&self, filters: &[&str]) -> Subscription {
        Subscription::new(self.tx.subscribe(), filters)
    }
}
