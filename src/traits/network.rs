//! MQTT client abstraction.
//!
//! The node talks to its neighbours exclusively through an MQTT broker:
//!
//! ```text
//! cmd/{scale}/tam/{node}/{port}/req   - requests addressed to a node's port
//! cmd/{scale}/tam/{node}/{port}/res   - responses to those requests
//! dt/{scale}/ping/{node}              - ready / lost broadcasts
//! ```

extern crate alloc;
use alloc::string::String;
use alloc::vec::Vec;

// ============================================================================
// MQTT Client Trait (Sync-First Design)
// ============================================================================

/// MQTT client trait for pub/sub messaging.
///
/// Sync-first so the same runner works with blocking embedded clients and
/// with channel-backed desktop clients.
///
/// # Implementation Notes
///
/// - `publish` and `subscribe` may block
/// - `try_recv` must never block
/// - The client should handle reconnection internally
///
/// # Example
///
/// ```rust
/// use tambox::traits::MqttClient;
/// use tambox::hal::MockMqtt;
///
/// fn announce<M: MqttClient>(client: &mut M) -> Result<(), M::Error> {
///     client.publish("dt/h0/ping/tambox-1", br#"{"state":{"reported":"ready"}}"#, false)
/// }
///
/// let mut mqtt = MockMqtt::new();
/// announce(&mut mqtt).unwrap();
/// assert_eq!(mqtt.published_to("dt/h0/ping/tambox-1").len(), 1);
/// ```
pub trait MqttClient {
    /// Error type for MQTT operations.
    type Error: core::fmt::Debug;

    /// Publish a message to a topic.
    ///
    /// - `retain`: if true, broker keeps message for new subscribers
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), Self::Error>;

    /// Subscribe to a topic filter. Supports `+` and `#` wildcards.
    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Try to receive the next message (non-blocking).
    fn try_recv(&mut self) -> Option<MqttMessage>;

    /// Check if connected to broker.
    fn is_connected(&self) -> bool;
}

/// An MQTT message received from a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Message payload as raw bytes.
    pub payload: Vec<u8>,
}

impl MqttMessage {
    /// Create a new MQTT message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Returns the payload as a UTF-8 string, if valid.
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }
}
