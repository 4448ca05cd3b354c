//! Node configuration shared by the engine and the MQTT services.
//!
//! Uses `heapless::String` for `no_std` compatibility while remaining
//! ergonomic to use on desktop with `std`.
//!
//! # Example
//!
//! ```rust
//! use tambox::config::{Config, MqttConfig, NodeConfig, TimingConfig};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.timing.ping_interval_ms, 10_000);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_mqtt(MqttConfig::default().with_host("mqtt-broker.local").with_scale("n"))
//!     .with_node(NodeConfig::default().with_id("tambox-7").with_signature("Kbg"))
//!     .with_timing(TimingConfig::default().with_ping_interval_ms(5_000));
//! ```

use heapless::String as HString;

/// Maximum length for short config strings (hostnames, client IDs)
pub const MAX_SHORT_STRING: usize = 64;

/// Maximum length for longer config strings (topics)
pub const MAX_LONG_STRING: usize = 128;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Type alias for longer config strings
pub type LongString = HString<MAX_LONG_STRING>;

/// Node or destination id as stored by the configuration server.
pub type NodeId = HString<32>;

/// Short station signature, e.g. `"CDA"`.
pub type Signature = HString<8>;

/// Human readable station name.
pub type StationName = HString<50>;

/// Train identity entered on the keypad.
pub type TrainId = HString<8>;

/// Layout scale used as the second topic segment, e.g. `"h0"`.
pub type Scale = HString<8>;

/// Software type reported in inventory responses.
pub const SW_TYPE: &str = "mqttTamBox";

/// Software version reported in inventory responses.
pub const SW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Body version written into every outgoing message.
pub const BODY_VERSION: &str = "1.0";

// ============================================================================
// Helper for creating heapless strings
// ============================================================================

/// Copy `s` into a fixed-capacity string, truncating on a UTF-8 boundary.
pub fn truncated<const N: usize>(s: &str) -> HString<N> {
    let mut hs = HString::new();
    let valid_end = s
        .char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= N)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let _ = hs.push_str(&s[..valid_end]);
    hs
}

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    truncated(s)
}

/// Create a LongString from a &str, truncating if too long
pub fn long_string(s: &str) -> LongString {
    truncated(s)
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete node configuration
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Broker connection and topic root
    pub mqtt: MqttConfig,
    /// Identity of this station
    pub node: NodeConfig,
    /// Protocol timers
    pub timing: TimingConfig,
}

impl Config {
    /// Set MQTT configuration
    pub fn with_mqtt(mut self, mqtt: MqttConfig) -> Self {
        self.mqtt = mqtt;
        self
    }

    /// Set node identity
    pub fn with_node(mut self, node: NodeConfig) -> Self {
        self.node = node;
        self
    }

    /// Set protocol timers
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }
}

// ============================================================================
// MQTT Config
// ============================================================================

/// MQTT client configuration
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct MqttConfig {
    /// Broker hostname or IP
    pub host: ShortString,
    /// Broker port
    pub port: u16,
    /// Username for authentication (empty = no auth)
    pub username: ShortString,
    /// Password for authentication
    pub password: ShortString,
    /// Layout scale, second topic segment (`cmd/{scale}/...`)
    pub scale: Scale,
    /// Client ID (empty = use the node id)
    pub client_id: ShortString,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: short_string("mqtt-broker.local"),
            port: 1883,
            username: ShortString::new(),
            password: ShortString::new(),
            scale: truncated("h0"),
            client_id: ShortString::new(),
            keep_alive_secs: 30,
        }
    }
}

impl MqttConfig {
    /// Set the broker host
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = short_string(host);
        self
    }

    /// Set the broker port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = short_string(username);
        self.password = short_string(password);
        self
    }

    /// Set the layout scale
    pub fn with_scale(mut self, scale: &str) -> Self {
        self.scale = truncated(scale);
        self
    }

    /// Set the client ID
    pub fn with_client_id(mut self, id: &str) -> Self {
        self.client_id = short_string(id);
        self
    }

    /// Check if authentication is configured
    pub fn has_auth(&self) -> bool {
        !self.username.is_empty()
    }
}

// ============================================================================
// Node Config
// ============================================================================

/// Identity of the local station
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct NodeConfig {
    /// Unique node id, used as the topic node segment
    pub id: NodeId,
    /// Station signature used for direction tie-breaks
    pub signature: Signature,
    /// Station name
    pub name: StationName,
    /// Wall clock seconds at `now_ms == 0`, used for body timestamps
    pub epoch_secs: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: truncated("tambox-1"),
            signature: truncated("CDA"),
            name: StationName::new(),
            epoch_secs: 0,
        }
    }
}

impl NodeConfig {
    /// Set the node id
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = truncated(id);
        self
    }

    /// Set the station signature
    pub fn with_signature(mut self, signature: &str) -> Self {
        self.signature = truncated(signature);
        self
    }

    /// Set the station name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = truncated(name);
        self
    }

    /// Set the epoch base received from the configuration server
    pub fn with_epoch_secs(mut self, epoch: u64) -> Self {
        self.epoch_secs = epoch;
        self
    }
}

// ============================================================================
// Timing Config
// ============================================================================

/// Protocol timers, all in milliseconds of the monotonic engine clock
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TimingConfig {
    /// Interval between ready broadcasts
    pub ping_interval_ms: u64,
    /// Silence of `lost_factor * ping_interval_ms` marks a destination lost
    pub lost_factor: u8,
    /// How long a locally issued request waits for its response
    pub response_timeout_ms: u64,
    /// Re-request the last known direction when a lost destination returns
    pub restore_direction_on_ready: bool,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 10_000,
            lost_factor: 2,
            response_timeout_ms: 60_000,
            restore_direction_on_ready: false,
        }
    }
}

impl TimingConfig {
    /// Smallest accepted lost factor; one missed ping never marks a peer lost.
    pub const MIN_LOST_FACTOR: u8 = 2;

    /// Set the ping interval
    pub fn with_ping_interval_ms(mut self, ms: u64) -> Self {
        self.ping_interval_ms = ms;
        self
    }

    /// Set the lost factor (clamped to at least 2)
    pub fn with_lost_factor(mut self, factor: u8) -> Self {
        self.lost_factor = factor.max(Self::MIN_LOST_FACTOR);
        self
    }

    /// Set the response wait timeout
    pub fn with_response_timeout_ms(mut self, ms: u64) -> Self {
        self.response_timeout_ms = ms;
        self
    }

    /// Enable or disable direction restore after a lost destination returns
    pub fn with_restore_direction_on_ready(mut self, restore: bool) -> Self {
        self.restore_direction_on_ready = restore;
        self
    }

    /// Silence after which a destination is considered lost.
    pub fn lost_after_ms(&self) -> u64 {
        let factor = self.lost_factor.max(Self::MIN_LOST_FACTOR) as u64;
        self.ping_interval_ms.saturating_mul(factor)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.scale.as_str(), "h0");
        assert_eq!(config.node.id.as_str(), "tambox-1");
        assert_eq!(config.timing.ping_interval_ms, 10_000);
        assert_eq!(config.timing.lost_factor, 2);
    }

    #[test]
    fn mqtt_auth_detection() {
        let no_auth = MqttConfig::default();
        assert!(!no_auth.has_auth());

        let with_auth = MqttConfig::default().with_auth("user", "pass");
        assert!(with_auth.has_auth());
    }

    #[test]
    fn builder_pattern() {
        let config = Config::default()
            .with_mqtt(
                MqttConfig::default()
                    .with_host("broker.local")
                    .with_port(8883)
                    .with_scale("n"),
            )
            .with_node(
                NodeConfig::default()
                    .with_id("tambox-3")
                    .with_signature("Hm")
                    .with_name("Hallsberg"),
            );

        assert_eq!(config.mqtt.host.as_str(), "broker.local");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.scale.as_str(), "n");
        assert_eq!(config.node.id.as_str(), "tambox-3");
        assert_eq!(config.node.signature.as_str(), "Hm");
        assert_eq!(config.node.name.as_str(), "Hallsberg");
    }

    #[test]
    fn lost_factor_never_below_two() {
        let timing = TimingConfig::default().with_lost_factor(1);
        assert_eq!(timing.lost_factor, 2);
        assert_eq!(timing.lost_after_ms(), 20_000);

        let timing = TimingConfig::default()
            .with_ping_interval_ms(5_000)
            .with_lost_factor(3);
        assert_eq!(timing.lost_after_ms(), 15_000);
    }

    #[test]
    fn lost_after_ignores_raw_factor_below_minimum() {
        let mut timing = TimingConfig::default();
        timing.lost_factor = 0;
        assert_eq!(timing.lost_after_ms(), 20_000);
    }

    #[test]
    fn short_string_truncation() {
        let long_input = "a".repeat(100);
        let s = short_string(&long_input);
        assert_eq!(s.len(), MAX_SHORT_STRING);
    }

    #[test]
    fn long_string_truncation() {
        let long_input = "b".repeat(200);
        let s = long_string(&long_input);
        assert_eq!(s.len(), MAX_LONG_STRING);
    }

    #[test]
    fn truncation_respects_utf8_boundary() {
        // "å" is two bytes; four of them do not fit in seven
        let s: HString<7> = truncated("åååå");
        assert_eq!(s.as_str(), "ååå");
        assert!(core::str::from_utf8(s.as_bytes()).is_ok());
    }
}
