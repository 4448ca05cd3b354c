//! Mock implementations for testing without a broker.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//! | [`MockMqtt`] | [`MqttClient`] | Captures pub/sub operations |
//!
//! # Example
//!
//! ```rust
//! use tambox::hal::{MockClock, MockMqtt};
//! use tambox::traits::{Clock, MqttClient};
//!
//! let clock = MockClock::new();
//! clock.advance(10_000);
//!
//! let mut mqtt = MockMqtt::new();
//! mqtt.queue_message("dt/h0/ping/tambox-2", br#"{"state":{"reported":"ready"}}"#.to_vec());
//! assert!(mqtt.try_recv().is_some());
//! assert_eq!(clock.now_ms(), 10_000);
//! ```
//!
//! [`Clock`]: crate::traits::Clock
//! [`MqttClient`]: crate::traits::MqttClient

extern crate alloc;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::Cell;

use crate::traits::{Clock, MqttClient, MqttMessage};

// ============================================================================
// Clock
// ============================================================================

/// Mock clock for testing.
///
/// Interior mutability lets a runner own a `&MockClock` while the test
/// keeps advancing it.
///
/// # Example
///
/// ```rust
/// use tambox::hal::MockClock;
/// use tambox::traits::Clock;
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.set(1000);
/// assert_eq!(clock.now_ms(), 1000);
///
/// clock.advance(500);
/// assert_eq!(clock.now_ms(), 1500);
/// ```
#[derive(Debug, Default)]
pub struct MockClock {
    current_ms: Cell<u64>,
}

impl MockClock {
    /// Creates a new mock clock starting at 0ms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current time in milliseconds.
    pub fn set(&self, ms: u64) {
        self.current_ms.set(ms);
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, ms: u64) {
        self.current_ms.set(self.current_ms.get() + ms);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.get()
    }
}

// ============================================================================
// Network Mocks
// ============================================================================

/// Error returned by [`MockMqtt`] when publishing is switched off.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MockMqttError;

/// Mock MQTT client for testing.
///
/// Records all publish/subscribe operations and allows injecting
/// incoming messages.
///
/// # Example
///
/// ```rust
/// use tambox::hal::MockMqtt;
/// use tambox::traits::MqttClient;
///
/// let mut mqtt = MockMqtt::new();
/// mqtt.subscribe("dt/h0/ping/+").unwrap();
/// assert!(mqtt.is_subscribed("dt/h0/ping/+"));
///
/// mqtt.publish("dt/h0/ping/tambox-1", b"{}", false).unwrap();
/// assert_eq!(mqtt.published_to("dt/h0/ping/tambox-1").len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MockMqtt {
    /// Messages that have been published (topic, payload, retain).
    pub published: Vec<(String, Vec<u8>, bool)>,
    /// Topics that have been subscribed to.
    pub subscriptions: Vec<String>,
    /// Queue of incoming messages to be returned by `try_recv()`.
    pub incoming: VecDeque<MqttMessage>,
    /// Whether the client is connected.
    pub connected: bool,
    /// When set, `publish` fails.
    pub fail_publish: bool,
    /// When set, publishing to this topic fails.
    pub fail_topic: Option<String>,
}

impl MockMqtt {
    /// Creates a new mock MQTT client in connected state.
    pub fn new() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }

    /// Queue an incoming message
    pub fn queue_message(&mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.incoming.push_back(MqttMessage::new(topic, payload));
    }

    /// Check if a topic was subscribed to
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|t| t == topic)
    }

    /// Get published messages for a topic
    pub fn published_to(&self, topic: &str) -> Vec<&(String, Vec<u8>, bool)> {
        self.published.iter().filter(|(t, _, _)| t == topic).collect()
    }

    /// Remove and return everything published so far.
    pub fn take_published(&mut self) -> Vec<(String, Vec<u8>, bool)> {
        core::mem::take(&mut self.published)
    }
}

impl MqttClient for MockMqtt {
    type Error = MockMqttError;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), MockMqttError> {
        if self.fail_publish || self.fail_topic.as_deref() == Some(topic) {
            return Err(MockMqttError);
        }
        self.published.push((topic.into(), payload.to_vec(), retain));
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), MockMqttError> {
        self.subscriptions.push(topic.into());
        Ok(())
    }

    fn try_recv(&mut self) -> Option<MqttMessage> {
        self.incoming.pop_front()
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
