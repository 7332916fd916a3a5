// ── Device emulator ──
//
// One emulated relay: a status document, broker settings and a handful of
// options, mutated by command lines the way the firmware would. Restarts
// take the device off the network for a while; telemetry is published on
// a timer while the device is configured for it.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tasmo_api::models::{
    DeviceSection, FirmwareSection, LogSection, MemorySection, NetworkSection,
    ParametersSection, WifiState,
};
use tasmo_api::pubsub::{DEFAULT_PORT, DEFAULT_USER};
use tasmo_api::{
    CommandResponse, MemoryBroker, Message, PowerState, PubSubSettings, PubSubTransport,
    StatusReport, TelemetryState,
};

const DEFAULT_PREFIXES: [&str; 3] = ["cmnd", "stat", "tele"];
const DEFAULT_STATE_TEXTS: [&str; 4] = ["OFF", "ON", "TOGGLE", "HOLD"];
const DEFAULT_TELE_PERIOD: u32 = 300;
const DEFAULT_TEMPLATE: &str =
    r#"{"NAME":"Generic","GPIO":[255,255,255,255,255,255,255,255,255,255,255,255,255],"FLAG":1,"BASE":18}"#;

// ── Restart timing ───────────────────────────────────────────────────

/// How long a restart keeps answering before it drops off, and how long
/// it stays dark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartDelays {
    pub before: Duration,
    pub after: Duration,
}

impl Default for RestartDelays {
    fn default() -> Self {
        Self {
            before: Duration::from_secs(2),
            after: Duration::from_secs(6),
        }
    }
}

impl RestartDelays {
    /// A tenth of the default delays.
    pub fn quick() -> Self {
        Self {
            before: Duration::from_millis(200),
            after: Duration::from_millis(600),
        }
    }
}

// ── Device profile ───────────────────────────────────────────────────

/// Factory settings of an emulated device.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub mac: String,
    pub address: Ipv4Addr,
    pub channels: u8,
    pub firmware_version: String,
    pub hardware: String,
    pub template: String,
}

impl DeviceProfile {
    /// The `n`-th device of a fleet in `subnet`: MAC `DC:4F:22:00:00:nn`,
    /// host `subnet.(100 + n)`, one channel.
    pub fn numbered(n: u8, subnet: Ipv4Addr) -> Self {
        let [a, b, c, _] = subnet.octets();
        Self {
            mac: format!("DC:4F:22:00:00:{n:02X}"),
            address: Ipv4Addr::new(a, b, c, 100u8.saturating_add(n)),
            channels: 1,
            firmware_version: "9.1.0".to_owned(),
            hardware: "ESP8266EX".to_owned(),
            template: DEFAULT_TEMPLATE.to_owned(),
        }
    }

    pub fn with_channels(mut self, channels: u8) -> Self {
        self.channels = channels.max(1);
        self
    }

    pub fn with_firmware(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = version.into();
        self
    }

    /// `tasmota_` plus the last three MAC octets.
    pub fn default_topic(&self) -> String {
        default_topic(&self.mac)
    }

    fn status(&self) -> StatusReport {
        let [a, b, c, _] = self.address.octets();
        let gateway = Ipv4Addr::new(a, b, c, 1);
        let topic = self.default_topic();

        let mut telemetry = TelemetryState {
            heap: 25,
            load_avg: 19,
            wifi: WifiState {
                rssi: 80,
                signal: -60,
                link_count: 1,
                downtime: "0T00:00:03".to_owned(),
            },
            ..TelemetryState::default()
        };
        for channel in channel_keys(self.channels) {
            telemetry.set_power(channel, PowerState::Off);
        }

        StatusReport {
            status: DeviceSection {
                topic: topic.clone(),
                friendly_name: default_friendly_names(self.channels),
            },
            parameters: ParametersSection {
                restart_reason: "Power On".to_owned(),
            },
            firmware: FirmwareSection {
                version: format!("{}(tasmota)", self.firmware_version),
                hardware: self.hardware.clone(),
            },
            log: LogSection {
                tele_period: Some(DEFAULT_TELE_PERIOD),
            },
            memory: MemorySection {
                program_size: 574,
                flash_size: 1024,
            },
            network: NetworkSection {
                host_name: format!("{topic}-{:04}", u16::from(self.address.octets()[3]) * 10),
                ip_address: self.address.to_string(),
                gateway: gateway.to_string(),
                subnet_mask: "255.255.255.0".to_owned(),
                dns_server: gateway.to_string(),
                mac: self.mac.to_uppercase(),
            },
            telemetry,
            template: self.template.clone(),
        }
    }
}

fn default_topic(mac: &str) -> String {
    let compact: String = mac.chars().filter(char::is_ascii_hexdigit).collect();
    let tail = compact.get(compact.len().saturating_sub(6)..).unwrap_or_default();
    format!("tasmota_{}", tail.to_uppercase())
}

fn default_friendly_names(channels: u8) -> Vec<String> {
    (1..=channels.max(1))
        .map(|n| {
            if n == 1 {
                "Tasmota".to_owned()
            } else {
                format!("Tasmota{n}")
            }
        })
        .collect()
}

/// Firmware keys for `channels` outputs: `POWER` alone, or `POWER1..n`.
fn channel_keys(channels: u8) -> Vec<Option<u8>> {
    if channels <= 1 {
        vec![None]
    } else {
        (1..=channels).map(Some).collect()
    }
}

// ── Command execution ────────────────────────────────────────────────

/// Whether a command line keeps going after a command.
enum Step {
    Continue(Value),
    Stop(Value),
}

/// Side effects collected while the state lock is held and applied after.
#[derive(Default)]
struct Effects {
    publish: Vec<Message>,
    send_telemetry: bool,
    telemetry_changed: bool,
    restart: bool,
}

#[derive(Clone, Copy)]
enum Switch {
    Set(PowerState),
    Toggle,
}

fn unknown() -> Step {
    Step::Stop(json!({ "Command": "Unknown" }))
}

fn error() -> Step {
    Step::Stop(json!({ "Command": "Error" }))
}

fn on_off(value: u8) -> &'static str {
    if value == 0 { "OFF" } else { "ON" }
}

struct EmulatorState {
    status: StatusReport,
    pubsub: PubSubSettings,
    set_option3: u8,
    set_option19: u8,
    set_option59: u8,
    prefixes: [String; 3],
    state_texts: [String; 4],
    started_at: Instant,
    telemetry_timer: Option<CancellationToken>,
}

impl EmulatorState {
    fn new(profile: &DeviceProfile) -> Self {
        Self {
            status: profile.status(),
            pubsub: PubSubSettings::default(),
            set_option3: 1,
            set_option19: 0,
            set_option59: 0,
            prefixes: DEFAULT_PREFIXES.map(str::to_owned),
            state_texts: DEFAULT_STATE_TEXTS.map(str::to_owned),
            started_at: Instant::now(),
            telemetry_timer: None,
        }
    }

    fn channel_count(&self) -> u8 {
        u8::try_from(self.status.status.friendly_name.len()).unwrap_or(u8::MAX)
    }

    fn tele_period(&self) -> u32 {
        self.status.log.tele_period.unwrap_or(0)
    }

    fn telemetry_enabled(&self) -> bool {
        self.set_option3 == 1
            && self.set_option59 == 1
            && self.tele_period() > 0
            && self.pubsub.is_configured()
    }

    fn telemetry(&self) -> TelemetryState {
        let mut telemetry = self.status.telemetry.clone();
        telemetry.uptime_sec = self.started_at.elapsed().as_secs();
        telemetry
    }

    fn template_value(&self) -> Value {
        serde_json::from_str(&self.status.template).unwrap_or_else(|_| json!({}))
    }

    fn template_name(&self) -> String {
        self.template_value()
            .get("NAME")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    }

    /// Factory defaults for everything but the network identity and template.
    fn reset(&mut self) {
        let channels = self.channel_count();
        self.pubsub = PubSubSettings::default();
        self.set_option3 = 1;
        self.set_option19 = 0;
        self.set_option59 = 0;
        self.prefixes = DEFAULT_PREFIXES.map(str::to_owned);
        self.state_texts = DEFAULT_STATE_TEXTS.map(str::to_owned);
        self.status.status.topic = default_topic(&self.status.network.mac);
        self.status.status.friendly_name = default_friendly_names(channels);
        self.status.log.tele_period = Some(DEFAULT_TELE_PERIOD);
    }

    /// Run a `;`-separated command line. The response is the last
    /// command's, or the error that stopped the line.
    fn run_line(&mut self, line: &str, effects: &mut Effects) -> Step {
        let mut last = None;
        for piece in line.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, param) = match piece.split_once(char::is_whitespace) {
                Some((name, param)) => (name, Some(param.trim()).filter(|p| !p.is_empty())),
                None => (piece, None),
            };
            match self.apply(&name.to_ascii_lowercase(), param, effects) {
                Step::Continue(value) => last = Some(value),
                stop @ Step::Stop(_) => return stop,
            }
        }
        Step::Continue(last.unwrap_or_else(|| json!({ "WARNING": "Enter command cmnd=" })))
    }

    #[allow(clippy::too_many_lines)]
    fn apply(&mut self, name: &str, param: Option<&str>, effects: &mut Effects) -> Step {
        if let Some(suffix) = name.strip_prefix("power") {
            return self.power(suffix, param, effects);
        }
        if let Some(suffix) = name.strip_prefix("friendlyname") {
            return self.friendly_name(suffix, param);
        }
        if let Some(suffix) = name.strip_prefix("statetext") {
            let Some(slot) = numbered_slot(suffix, self.state_texts.len()) else {
                return unknown();
            };
            if let Some(text) = param {
                self.state_texts[slot] = text.to_owned();
            }
            let key = format!("StateText{}", slot + 1);
            return Step::Continue(json!({ key: self.state_texts[slot] }));
        }
        if let Some(suffix) = name.strip_prefix("setoption") {
            return self.set_option(suffix, param, effects);
        }
        if let Some(suffix) = name.strip_prefix("prefix") {
            let Some(slot) = numbered_slot(suffix, self.prefixes.len()) else {
                return unknown();
            };
            if let Some(prefix) = param {
                self.prefixes[slot] = if prefix == "1" {
                    DEFAULT_PREFIXES[slot].to_owned()
                } else {
                    prefix.to_owned()
                };
            }
            return Step::Continue(json!({ format!("Prefix{}", slot + 1): self.prefixes[slot] }));
        }

        let value = match name {
            "backlog" => match param {
                Some(rest) => return self.run_line(rest, effects),
                None => json!({ "Backlog": "Empty" }),
            },
            "delay" => json!({ "Delay": param.and_then(|p| p.parse::<u32>().ok()).unwrap_or(0) }),
            "module" => {
                if param == Some("0") {
                    effects.restart = true;
                }
                json!({ "Module": { "0": self.template_name() } })
            }
            "template" => {
                if let Some(definition) = param {
                    self.status.template = definition.to_owned();
                }
                self.template_value()
            }
            "mqtthost" => {
                if let Some(host) = param {
                    self.pubsub.host = if host == "1" { String::new() } else { host.to_owned() };
                    effects.restart = true;
                }
                json!({ "MqttHost": self.pubsub.host })
            }
            "mqttport" => {
                if let Some(port) = param.and_then(|p| p.parse::<u16>().ok()) {
                    self.pubsub.port = if port == 1 { DEFAULT_PORT } else { port };
                    effects.restart = true;
                }
                json!({ "MqttPort": self.pubsub.port })
            }
            "mqttuser" => {
                if let Some(user) = param {
                    self.pubsub.username = if user == "1" {
                        DEFAULT_USER.to_owned()
                    } else {
                        user.to_owned()
                    };
                    effects.restart = true;
                }
                json!({ "MqttUser": self.pubsub.username })
            }
            "mqttpassword" => {
                if let Some(password) = param {
                    let password = if password == "1" { "" } else { password };
                    self.pubsub.password = SecretString::from(password.to_owned());
                    effects.restart = true;
                }
                json!({ "MqttPassword": "****" })
            }
            "publish" => {
                let Some(rest) = param else {
                    return error();
                };
                let (topic, payload) = match rest.split_once(char::is_whitespace) {
                    Some((topic, payload)) => (topic, Some(payload.trim().to_owned())),
                    None => (rest, None),
                };
                effects.publish.push(Message {
                    topic: topic.to_owned(),
                    payload,
                });
                json!({})
            }
            "restart" => {
                if param == Some("1") {
                    effects.restart = true;
                    json!({ "Restart": "Restarting" })
                } else {
                    json!({ "Restart": "1 to restart" })
                }
            }
            "reset" => match param {
                Some("1" | "2" | "3" | "4" | "5" | "6") => {
                    self.reset();
                    effects.restart = true;
                    json!({ "Reset": "Reset and Restarting" })
                }
                _ => json!({ "Reset": "1 to reset" }),
            },
            "upgrade" => {
                if param == Some("1") {
                    effects.restart = true;
                    json!({ "Upgrade": format!("Version {} from", self.status.firmware.version) })
                } else {
                    json!({ "Upgrade": "1 to upgrade" })
                }
            }
            "state" => {
                effects.send_telemetry = true;
                serde_json::to_value(self.telemetry()).unwrap_or_default()
            }
            "status" => self.status_section(param),
            "teleperiod" => {
                if let Some(period) = param.and_then(|p| p.parse::<u32>().ok()) {
                    if period <= 3600 {
                        let period = match period {
                            1 => DEFAULT_TELE_PERIOD,
                            0 => 0,
                            p => p.max(10),
                        };
                        self.status.log.tele_period = Some(period);
                        effects.telemetry_changed = true;
                    }
                }
                json!({ "TelePeriod": self.tele_period() })
            }
            "topic" => {
                if let Some(topic) = param {
                    self.status.status.topic = if topic == "1" {
                        default_topic(&self.status.network.mac)
                    } else {
                        topic.to_owned()
                    };
                    effects.restart = true;
                }
                json!({ "Topic": self.status.status.topic })
            }
            _ => return unknown(),
        };
        Step::Continue(value)
    }

    fn power(&mut self, suffix: &str, param: Option<&str>, effects: &mut Effects) -> Step {
        let index = if suffix.is_empty() {
            None
        } else {
            match suffix.parse::<u8>() {
                Ok(index) => Some(index),
                Err(_) => return unknown(),
            }
        };
        let channels = self.channel_count();
        if index.is_some_and(|i| i > channels) {
            return error();
        }

        let targets = if channels <= 1 {
            vec![None]
        } else {
            match index {
                Some(0) => channel_keys(channels),
                Some(i) => vec![Some(i)],
                None => vec![Some(1)],
            }
        };

        if let Some(raw) = param {
            let switch = match raw.to_ascii_uppercase().as_str() {
                "0" | "OFF" => Switch::Set(PowerState::Off),
                "1" | "ON" => Switch::Set(PowerState::On),
                "2" | "TOGGLE" => Switch::Toggle,
                _ => return error(),
            };
            for target in &targets {
                let current = self.status.telemetry.power(*target).unwrap_or_default();
                let next = match switch {
                    Switch::Set(state) => state,
                    Switch::Toggle => current.toggled(),
                };
                self.status.telemetry.set_power(*target, next);
            }
            effects.send_telemetry = true;
        }

        let mut response = CommandResponse::new();
        for target in targets {
            let state = self.status.telemetry.power(target).unwrap_or_default();
            response.insert(
                TelemetryState::power_key(target),
                Value::String(state.to_string()),
            );
        }
        Step::Continue(serde_json::to_value(response).unwrap_or_default())
    }

    fn friendly_name(&mut self, suffix: &str, param: Option<&str>) -> Step {
        let slot = if suffix.is_empty() {
            Some(0)
        } else {
            numbered_slot(suffix, self.status.status.friendly_name.len())
        };
        let Some(slot) = slot else {
            return unknown();
        };
        let Some(current) = self.status.status.friendly_name.get_mut(slot) else {
            return error();
        };
        if let Some(name) = param {
            *current = if name == "1" {
                if slot == 0 {
                    "Tasmota".to_owned()
                } else {
                    format!("Tasmota{}", slot + 1)
                }
            } else {
                name.to_owned()
            };
        }
        Step::Continue(json!({ format!("FriendlyName{}", slot + 1): current.clone() }))
    }

    fn set_option(&mut self, suffix: &str, param: Option<&str>, effects: &mut Effects) -> Step {
        let value = param.and_then(|p| p.parse::<u8>().ok());
        let option = match suffix {
            "3" => &mut self.set_option3,
            "19" => &mut self.set_option19,
            "59" => &mut self.set_option59,
            _ => return unknown(),
        };
        if let Some(value) = value {
            *option = value;
            if suffix != "19" {
                effects.telemetry_changed = true;
            }
        }
        Step::Continue(json!({ format!("SetOption{suffix}"): on_off(*option) }))
    }

    fn status_section(&self, param: Option<&str>) -> Value {
        let mut status = self.status.clone();
        status.telemetry = self.telemetry();
        let section = |key: &str, value: Result<Value, serde_json::Error>| {
            json!({ key: value.unwrap_or_default() })
        };
        match param.and_then(|p| p.parse::<u8>().ok()) {
            Some(0) => serde_json::to_value(&status).unwrap_or_default(),
            Some(1) => section("StatusPRM", serde_json::to_value(&status.parameters)),
            Some(2) => section("StatusFWR", serde_json::to_value(&status.firmware)),
            Some(3) => section("StatusLOG", serde_json::to_value(&status.log)),
            Some(4) => section("StatusMEM", serde_json::to_value(&status.memory)),
            Some(5) => section("StatusNET", serde_json::to_value(&status.network)),
            Some(11) => section("StatusSTS", serde_json::to_value(&status.telemetry)),
            _ => section("Status", serde_json::to_value(&status.status)),
        }
    }
}

/// Zero-based slot for a 1-based numbered command (`Prefix2` → 1).
fn numbered_slot(suffix: &str, len: usize) -> Option<usize> {
    let n: usize = if suffix.is_empty() { 1 } else { suffix.parse().ok()? };
    (1..=len).contains(&n).then(|| n - 1)
}

// ── DeviceEmulator ───────────────────────────────────────────────────

/// Handle to one emulated device. Cheap to clone.
#[derive(Clone)]
pub struct DeviceEmulator {
    inner: Arc<EmulatorInner>,
}

struct EmulatorInner {
    address: Ipv4Addr,
    mac: String,
    state: Mutex<EmulatorState>,
    broker: Arc<MemoryBroker>,
    delays: RestartDelays,
    /// Restarts currently holding the device off the network.
    restarts_dark: AtomicU32,
    unplugged: AtomicBool,
    cancel: CancellationToken,
}

impl Drop for EmulatorInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl DeviceEmulator {
    /// Power the device on with its factory settings.
    pub async fn start(
        profile: &DeviceProfile,
        broker: Arc<MemoryBroker>,
        delays: RestartDelays,
    ) -> Self {
        let emulator = Self {
            inner: Arc::new(EmulatorInner {
                address: profile.address,
                mac: profile.mac.to_lowercase(),
                state: Mutex::new(EmulatorState::new(profile)),
                broker,
                delays,
                restarts_dark: AtomicU32::new(0),
                unplugged: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
        };
        emulator.boot().await;
        emulator
    }

    pub fn address(&self) -> Ipv4Addr {
        self.inner.address
    }

    /// Lower-cased hardware address.
    pub fn mac(&self) -> &str {
        &self.inner.mac
    }

    /// Whether the device answers commands right now.
    pub fn is_online(&self) -> bool {
        !self.inner.unplugged.load(Ordering::SeqCst)
            && self.inner.restarts_dark.load(Ordering::SeqCst) == 0
    }

    /// Take the device off the network until [`plug`](Self::plug).
    pub fn unplug(&self) {
        self.inner.unplugged.store(true, Ordering::SeqCst);
    }

    pub fn plug(&self) {
        self.inner.unplugged.store(false, Ordering::SeqCst);
    }

    /// Stop the telemetry timer and any pending restart.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    // ── Inspection ───────────────────────────────────────────────────

    pub async fn topic(&self) -> String {
        self.inner.state.lock().await.status.status.topic.clone()
    }

    pub async fn uptime(&self) -> Duration {
        self.inner.state.lock().await.started_at.elapsed()
    }

    pub async fn power(&self, index: Option<u8>) -> Option<PowerState> {
        self.inner.state.lock().await.status.telemetry.power(index)
    }

    pub async fn pubsub_settings(&self) -> PubSubSettings {
        self.inner.state.lock().await.pubsub.clone()
    }

    pub async fn template(&self) -> String {
        self.inner.state.lock().await.status.template.clone()
    }

    pub async fn friendly_names(&self) -> Vec<String> {
        self.inner.state.lock().await.status.status.friendly_name.clone()
    }

    pub async fn tele_period(&self) -> u32 {
        self.inner.state.lock().await.tele_period()
    }

    pub async fn telemetry_enabled(&self) -> bool {
        self.inner.state.lock().await.telemetry_enabled()
    }

    // ── Command protocol ─────────────────────────────────────────────

    /// Execute one command line. `None` while the device is unreachable.
    pub async fn execute(&self, line: &str) -> Option<String> {
        if !self.is_online() {
            return None;
        }
        debug!(address = %self.inner.address, command = line, "emulator command");

        let mut effects = Effects::default();
        let (step, settings) = {
            let mut state = self.inner.state.lock().await;
            let step = state.run_line(line, &mut effects);
            (step, state.pubsub.clone())
        };
        let (Step::Continue(body) | Step::Stop(body)) = step;

        for message in effects.publish {
            self.publish(&settings, message).await;
        }
        if effects.send_telemetry {
            self.send_telemetry().await;
        }
        if effects.restart {
            self.restart().await;
        } else if effects.telemetry_changed {
            self.schedule_telemetry().await;
        }
        Some(body.to_string())
    }

    // ── Private helpers ──────────────────────────────────────────────

    async fn publish(&self, settings: &PubSubSettings, message: Message) {
        if !settings.is_configured() || !self.inner.broker.accepts(settings) {
            debug!(
                address = %self.inner.address,
                topic = %message.topic,
                "not connected, dropping publish"
            );
            return;
        }
        let _ = self.inner.broker.publish(message).await;
    }

    async fn send_telemetry(&self) {
        if !self.is_online() {
            return;
        }
        let (message, settings) = {
            let state = self.inner.state.lock().await;
            if state.set_option59 != 1 {
                return;
            }
            let payload = serde_json::to_string(&state.telemetry()).unwrap_or_default();
            let topic = format!("tele/{}/STATE", state.status.status.topic);
            let message = Message::new(topic, payload);
            (message, state.pubsub.clone())
        };
        self.publish(&settings, message).await;
    }

    /// Reset uptime and (re)arm telemetry.
    async fn boot(&self) {
        self.inner.state.lock().await.started_at = Instant::now();
        self.schedule_telemetry().await;
    }

    /// Cancel the running telemetry timer and start a new one if the
    /// current settings call for it.
    async fn schedule_telemetry(&self) {
        let mut state = self.inner.state.lock().await;
        if let Some(timer) = state.telemetry_timer.take() {
            timer.cancel();
        }
        if !state.telemetry_enabled() {
            return;
        }

        let period = Duration::from_secs(u64::from(state.tele_period()));
        let timer = self.inner.cancel.child_token();
        state.telemetry_timer = Some(timer.clone());
        let device = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    () = timer.cancelled() => break,
                    _ = ticks.tick() => {
                        let Some(inner) = Weak::upgrade(&device) else { break };
                        DeviceEmulator { inner }.send_telemetry().await;
                    }
                }
            }
        });
    }

    /// Keep answering for `delays.before`, go dark for `delays.after`, then
    /// boot again.
    async fn restart(&self) {
        if let Some(timer) = self.inner.state.lock().await.telemetry_timer.take() {
            timer.cancel();
        }
        debug!(address = %self.inner.address, "emulator restarting");

        let device = self.clone();
        let cancel = self.inner.cancel.clone();
        let delays = self.inner.delays;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delays.before) => {}
            }
            device.inner.restarts_dark.fetch_add(1, Ordering::SeqCst);
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delays.after) => {}
            }
            device.inner.restarts_dark.fetch_sub(1, Ordering::SeqCst);
            if !cancel.is_cancelled() {
                device.boot().await;
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_topic_uses_last_three_octets() {
        assert_eq!(default_topic("dc:4f:22:3a:5f:1c"), "tasmota_3A5F1C");
    }

    #[test]
    fn numbered_slots_are_one_based() {
        assert_eq!(numbered_slot("", 3), Some(0));
        assert_eq!(numbered_slot("3", 3), Some(2));
        assert_eq!(numbered_slot("4", 3), None);
        assert_eq!(numbered_slot("0", 3), None);
    }

    #[test]
    fn unknown_command_stops_the_line() {
        let profile = DeviceProfile::numbered(1, Ipv4Addr::new(10, 0, 0, 0));
        let mut state = EmulatorState::new(&profile);
        let mut effects = Effects::default();
        let Step::Stop(value) = state.run_line("Bogus 1; Topic kitchen", &mut effects) else {
            panic!("expected stop");
        };
        assert_eq!(value, json!({ "Command": "Unknown" }));
        assert_eq!(state.status.status.topic, "tasmota_000001");
        assert!(!effects.restart);
    }

    #[test]
    fn backlog_runs_every_command() {
        let profile = DeviceProfile::numbered(1, Ipv4Addr::new(10, 0, 0, 0)).with_channels(2);
        let mut state = EmulatorState::new(&profile);
        let mut effects = Effects::default();
        state.run_line(
            "Backlog FriendlyName1 Lamp; FriendlyName2 Fan; Prefix1 cm; StateText4 HELD; TelePeriod 5",
            &mut effects,
        );
        assert_eq!(state.status.status.friendly_name, vec!["Lamp", "Fan"]);
        assert_eq!(state.prefixes[0], "cm");
        assert_eq!(state.state_texts[3], "HELD");
        assert_eq!(state.tele_period(), 10);
        assert!(effects.telemetry_changed);
    }
}
