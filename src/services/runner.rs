//! MQTT service runner for polling-style platforms.
//!
//! Wraps any [`MqttClient`] and drives a [`ProtocolEngine`] with it:
//! inbound messages are decoded and fed to the engine, and everything the
//! engine produces is encoded and published.
//!
//! # Example
//!
//! ```rust
//! use tambox::config::Config;
//! use tambox::engine::ProtocolEngine;
//! use tambox::hal::{MockClock, MockMqtt};
//! use tambox::registry::{DestIndex, Destination, DestinationRegistry};
//! use tambox::services::TamBoxRunner;
//!
//! let registry = DestinationRegistry::new()
//!     .with_destination(DestIndex::A, Destination::single("tambox-2", "Hr", "Hallsberg", 'b'));
//! let engine = ProtocolEngine::new(&Config::default(), registry, 0);
//! let clock = MockClock::new();
//! let mut runner = TamBoxRunner::new(engine, MockMqtt::new(), &clock);
//!
//! runner.subscribe().unwrap();
//!
//! // In main loop:
//! runner.poll().unwrap();     // Process incoming messages
//! runner.tick().unwrap();     // Pings, liveness, timeouts
//! assert_eq!(runner.client().published_to("dt/h0/ping/tambox-1").len(), 1);
//! ```

extern crate alloc;
use alloc::vec::Vec;

use crate::engine::{LocalRequest, ProtocolEngine};
use crate::error::ProtocolError;
use crate::message::OutboundMessage;
use crate::registry::{DestIndex, TrackIndex};
use crate::traits::{Clock, MqttClient};
use crate::wire;

/// Errors from [`TamBoxRunner`].
#[derive(Debug, thiserror::Error)]
pub enum RunnerError<E: core::fmt::Debug> {
    /// The MQTT client failed.
    #[error("mqtt client error: {0:?}")]
    Client(E),

    /// The engine refused a local request, or a message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Drives a [`ProtocolEngine`] over an [`MqttClient`].
pub struct TamBoxRunner<C: MqttClient, K: Clock> {
    engine: ProtocolEngine,
    client: C,
    clock: K,
}

impl<C: MqttClient, K: Clock> TamBoxRunner<C, K> {
    /// Create a new runner.
    pub fn new(engine: ProtocolEngine, client: C, clock: K) -> Self {
        Self { engine, client, clock }
    }

    /// Get a reference to the engine.
    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    /// Get a mutable reference to the engine.
    pub fn engine_mut(&mut self) -> &mut ProtocolEngine {
        &mut self.engine
    }

    /// Get a reference to the MQTT client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Get a mutable reference to the MQTT client.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Subscribe to every topic the engine listens on.
    pub fn subscribe(&mut self) -> Result<(), RunnerError<C::Error>> {
        for filter in self.engine.subscriptions() {
            self.client.subscribe(&filter).map_err(RunnerError::Client)?;
        }
        Ok(())
    }

    /// Process all queued inbound messages.
    ///
    /// Messages the engine refuses are logged and dropped. Returns the
    /// number of messages read from the client.
    pub fn poll(&mut self) -> Result<usize, RunnerError<C::Error>> {
        let mut count = 0;
        while let Some(msg) = self.client.try_recv() {
            count += 1;
            let now_ms = self.clock.now_ms();
            let result = wire::decode(&msg.topic, &msg.payload)
                .and_then(|parsed| self.engine.on_inbound_message(&parsed, now_ms));
            match result {
                Ok(out) => self.publish_all(out)?,
                Err(error) => tracing::debug!(topic = %msg.topic, %error, "inbound message dropped"),
            }
        }
        Ok(count)
    }

    /// Run the engine timers and publish what they produce.
    pub fn tick(&mut self) -> Result<(), RunnerError<C::Error>> {
        let out = self.engine.on_tick(self.clock.now_ms());
        self.publish_all(out)
    }

    /// Forward a keypad action to the engine.
    pub fn local_request(&mut self, dest: DestIndex, track: TrackIndex, request: LocalRequest) -> Result<(), RunnerError<C::Error>> {
        let out = self
            .engine
            .on_local_request(dest, track, request, self.clock.now_ms())?;
        self.publish_all(out)
    }

    /// Withdraw the outstanding request to `dest`.
    pub fn cancel(&mut self, dest: DestIndex) -> Result<(), RunnerError<C::Error>> {
        let out = self.engine.cancel_request(dest, self.clock.now_ms());
        self.publish_all(out)
    }

    /// Publish the whole batch even if one message fails; the engine has
    /// already moved on. Returns the first failure.
    fn publish_all(&mut self, messages: Vec<OutboundMessage>) -> Result<(), RunnerError<C::Error>> {
        let mut first_error = None;
        for msg in &messages {
            let result = wire::encode(msg).map_err(RunnerError::from).and_then(|encoded| {
                tracing::trace!(topic = %encoded.topic, "publish");
                self.client
                    .publish(&encoded.topic, &encoded.payload, false)
                    .map_err(RunnerError::Client)
            });
            if let Err(error) = result {
                tracing::warn!(%error, "publish failed");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, NodeConfig, TimingConfig};
    use crate::direction::TrafficDirection;
    use crate::hal::{MockClock, MockMqtt};
    use crate::registry::{Destination, DestinationRegistry};
    use crate::track::TamState;

    fn setup(clock: &MockClock) -> TamBoxRunner<MockMqtt, &MockClock> {
        let registry = DestinationRegistry::new()
            .with_destination(DestIndex::A, Destination::single("tambox-2", "Hr", "Hallsberg", 'b'));
        let config = Config::default().with_node(NodeConfig::default().with_id("tambox-1"));
        TamBoxRunner::new(ProtocolEngine::new(&config, registry, 0), MockMqtt::new(), clock)
    }

    // ========================================================================
    // Basic runner tests
    // ========================================================================

    #[test]
    fn test_runner_creation() {
        let clock = MockClock::new();
        let runner = setup(&clock);
        assert!(runner.client().is_connected());
    }

    #[test]
    fn test_subscribe_engine_topics() {
        let clock = MockClock::new();
        let mut runner = setup(&clock);
        runner.subscribe().unwrap();

        let client = runner.client();
        assert!(client.is_subscribed("cmd/h0/tam/tambox-1/+/req"));
        assert!(client.is_subscribed("cmd/h0/tam/tambox-1/+/res"));
        assert!(client.is_subscribed("dt/h0/ping/+"));
        assert!(client.is_subscribed("cmd/h0/node/tambox-1/inventory/req"));
    }

    // ========================================================================
    // Message flow tests
    // ========================================================================

    #[test]
    fn test_local_request_is_published() {
        let clock = MockClock::new();
        let mut runner = setup(&clock);
        runner
            .local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::Out))
            .unwrap();

        let published = runner.client().published_to("cmd/h0/tam/tambox-2/b/req");
        assert_eq!(published.len(), 1);
        let body = core::str::from_utf8(&published[0].1).unwrap();
        assert!(body.contains(r#""desired":"out""#));
    }

    #[test]
    fn test_poll_applies_response() {
        let clock = MockClock::new();
        let mut runner = setup(&clock);
        runner
            .local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::In))
            .unwrap();
        let session = runner.engine().pending(DestIndex::A).unwrap().session_id;

        let payload = alloc::format!(
            r#"{{"version":"1.0","timestamp":0,"session-id":{session},"node-id":"tambox-2","port-id":"b","track":"left","state":{{"reported":"accepted"}}}}"#
        );
        runner
            .client_mut()
            .queue_message("cmd/h0/tam/tambox-1/a/res", payload.into_bytes());
        clock.advance(200);

        assert_eq!(runner.poll().unwrap(), 1);
        let state = runner.engine().current_state(DestIndex::A, TrackIndex::Left);
        assert_eq!(state.state, TamState::Idle);
        assert_eq!(state.direction, TrafficDirection::In);
        assert_eq!(state.last_seen_ms, 200);
    }

    #[test]
    fn test_poll_drops_garbage() {
        let clock = MockClock::new();
        let mut runner = setup(&clock);
        runner.client_mut().queue_message("cmd/h0/tam/tambox-1/a/req", b"{{{".to_vec());
        runner.client_mut().queue_message("not/a/topic", b"{}".to_vec());

        assert_eq!(runner.poll().unwrap(), 2);
        assert!(runner.client().published.is_empty());
        assert_eq!(
            runner.engine().current_state(DestIndex::A, TrackIndex::Left).state,
            TamState::Idle
        );
    }

    #[test]
    fn test_tick_publishes_ping() {
        let clock = MockClock::new();
        let mut runner = setup(&clock);
        runner.tick().unwrap();
        clock.advance(5_000);
        runner.tick().unwrap();
        clock.advance(5_000);
        runner.tick().unwrap();
        assert_eq!(runner.client().published_to("dt/h0/ping/tambox-1").len(), 2);
    }

    #[test]
    fn test_refused_request_is_error() {
        let clock = MockClock::new();
        let mut runner = setup(&clock);
        let err = runner
            .local_request(DestIndex::C, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::Out))
            .unwrap_err();
        assert!(matches!(err, RunnerError::Protocol(ProtocolError::UnknownDestination)));
    }

    #[test]
    fn test_publish_failure_surfaces() {
        let clock = MockClock::new();
        let mut runner = setup(&clock);
        runner.client_mut().fail_publish = true;
        assert!(matches!(runner.tick(), Err(RunnerError::Client(_))));
    }

    #[test]
    fn test_failed_publish_does_not_drop_rest_of_batch() {
        let clock = MockClock::new();
        let registry = DestinationRegistry::new()
            .with_destination(DestIndex::A, Destination::single("tambox-2", "Hr", "Hallsberg", 'b'));
        let config = Config::default()
            .with_node(NodeConfig::default().with_id("tambox-1"))
            .with_timing(TimingConfig::default().with_response_timeout_ms(5_000));
        let mut runner = TamBoxRunner::new(ProtocolEngine::new(&config, registry, 0), MockMqtt::new(), &clock);
        runner
            .local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::Out))
            .unwrap();

        // first tick: ready ping, then the cancel for the expired request
        runner.client_mut().fail_topic = Some("dt/h0/ping/tambox-1".into());
        clock.set(6_000);
        assert!(matches!(runner.tick(), Err(RunnerError::Client(_))));

        assert_eq!(runner.client().published_to("cmd/h0/tam/tambox-2/b/req").len(), 2);
        assert_eq!(
            runner.engine().current_state(DestIndex::A, TrackIndex::Left).state,
            TamState::Idle
        );
    }

    #[test]
    fn test_cancel_publishes_once() {
        let clock = MockClock::new();
        let mut runner = setup(&clock);
        runner
            .local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::Out))
            .unwrap();
        runner.cancel(DestIndex::A).unwrap();
        runner.cancel(DestIndex::A).unwrap();
        // request + one cancel
        assert_eq!(runner.client().published_to("cmd/h0/tam/tambox-2/b/req").len(), 2);
    }
}
