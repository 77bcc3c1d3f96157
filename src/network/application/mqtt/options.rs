//! Session configuration.
//!
//! Loading flow:
//! 1. Start with [`Options::default()`]
//! 2. Callers may deserialize a partial document over the defaults
//!    (missing fields keep their default)
//! 3. [`Options::from_env`] applies `MQTT_*` environment overrides
//!
//! Overrides are parsed strictly: a value that does not parse or is out of
//! range is ignored and the previous value kept.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::packet::{KEEP_ALIVE_SECS, MAX_PACKET_SIZE};

/// Configuration options for an MQTT session.
///
/// # Examples
///
/// ```rust
/// use libmqtt::network::application::mqtt::Options;
///
/// let options = Options {
///     client_id: "weather_station".into(),
///     ..Options::default()
/// };
/// assert_eq!(options.keep_alive_secs, 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// The client identifier, must be unique within the broker.
    pub client_id: String,
    /// Broker address used by connectors, as `host:port`.
    pub broker: String,
    /// Keep-alive advertised in CONNECT, in seconds.
    pub keep_alive_secs: u16,
    /// Whether to ask the broker for a clean session.
    pub clean_session: bool,
    /// Bound on a single blocking read. `0` builds the stream without a
    /// deadline; the session still bounds its own reads by
    /// [`READ_DEADLINE`](super::stream::READ_DEADLINE).
    pub read_timeout_ms: u64,
    /// Interval between PINGREQs.
    pub ping_interval_ms: u64,
    /// How long a PINGRESP may take before the session fails.
    pub ping_ack_ttl_ms: u64,
    /// How long a SUBACK may take before the session fails.
    pub subscribe_ack_ttl_ms: u64,
    /// How long shutdown waits for DISCONNECT to be written.
    pub disconnect_timeout_ms: u64,
    /// Largest inbound packet accepted, fixed header included.
    pub max_packet_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            client_id: "libmqtt".to_owned(),
            broker: "localhost:1883".to_owned(),
            keep_alive_secs: KEEP_ALIVE_SECS,
            clean_session: true,
            read_timeout_ms: 5_000,
            // 1/6 of the keep-alive
            ping_interval_ms: 10_000,
            ping_ack_ttl_ms: 20_000,
            subscribe_ack_ttl_ms: 30_000,
            disconnect_timeout_ms: 5_000,
            max_packet_size: 64 * 1024,
        }
    }
}

impl Options {
    /// Defaults with `MQTT_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_overrides(|key| std::env::var(key).ok());
        options
    }

    /// Apply overrides looked up by variable name.
    ///
    /// Recognised variables: `MQTT_CLIENT_ID`, `MQTT_BROKER`,
    /// `MQTT_KEEP_ALIVE`, `MQTT_CLEAN_SESSION`, `MQTT_READ_TIMEOUT_MS`,
    /// `MQTT_PING_INTERVAL_MS`, `MQTT_PING_ACK_TTL_MS`,
    /// `MQTT_SUBSCRIBE_ACK_TTL_MS`, `MQTT_DISCONNECT_TIMEOUT_MS`,
    /// `MQTT_MAX_PACKET_SIZE`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let env = Env(lookup);
        if let Some(v) = env.string("MQTT_CLIENT_ID") {
            self.client_id = v;
        }
        if let Some(v) = env.string("MQTT_BROKER") {
            self.broker = v;
        }
        if let Some(v) = env.number("MQTT_KEEP_ALIVE", 0, u64::from(u16::MAX)) {
            // bounded by the range above
            self.keep_alive_secs = u16::try_from(v).unwrap_or(self.keep_alive_secs);
        }
        if let Some(v) = env.boolean("MQTT_CLEAN_SESSION") {
            self.clean_session = v;
        }
        if let Some(v) = env.number("MQTT_READ_TIMEOUT_MS", 0, 600_000) {
            self.read_timeout_ms = v;
        }
        if let Some(v) = env.number("MQTT_PING_INTERVAL_MS", 100, 3_600_000) {
            self.ping_interval_ms = v;
        }
        if let Some(v) = env.number("MQTT_PING_ACK_TTL_MS", 100, 3_600_000) {
            self.ping_ack_ttl_ms = v;
        }
        if let Some(v) = env.number("MQTT_SUBSCRIBE_ACK_TTL_MS", 100, 3_600_000) {
            self.subscribe_ack_ttl_ms = v;
        }
        if let Some(v) = env.number("MQTT_DISCONNECT_TIMEOUT_MS", 0, 600_000) {
            self.disconnect_timeout_ms = v;
        }
        if let Some(v) = env.number("MQTT_MAX_PACKET_SIZE", 16, MAX_PACKET_SIZE as u64) {
            self.max_packet_size = usize::try_from(v).unwrap_or(self.max_packet_size);
        }
    }

    /// The read deadline, or `None` when disabled.
    pub fn read_deadline(&self) -> Option<Duration> {
        (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms))
    }

    /// Interval between PINGREQs.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    /// Deadline for a PINGRESP.
    pub fn ping_ack_ttl(&self) -> Duration {
        Duration::from_millis(self.ping_ack_ttl_ms)
    }

    /// Deadline for a SUBACK.
    pub fn subscribe_ack_ttl(&self) -> Duration {
        Duration::from_millis(self.subscribe_ack_ttl_ms)
    }

    /// Bound on the DISCONNECT written during shutdown.
    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn number(&self, key: &str, min: u64, max: u64) -> Option<u64> {
        let raw = self.string(key)?;
        match raw.trim().parse::<u64>() {
            Ok(v) if (min..=max).contains(&v) => Some(v),
            _ => {
                warn!(key, value = %raw, min, max, "ignoring invalid override");
                None
            }
        }
    }

    fn boolean(&self, key: &str) -> Option<bool> {
        let raw = self.string(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => {
                warn!(key, value = %raw, "ignoring invalid override");
                None
            }
        }
    }
}
