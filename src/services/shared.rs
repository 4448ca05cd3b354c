//! Shared engine state for the desktop services.
//!
//! `SharedEngine` gives thread-safe access to a single [`ProtocolEngine`]
//! that the MQTT handler, the keypad and the display all use.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tambox::config::Config;
//! use tambox::engine::ProtocolEngine;
//! use tambox::registry::DestinationRegistry;
//! use tambox::services::SharedEngine;
//!
//! let engine = ProtocolEngine::new(&Config::default(), DestinationRegistry::new(), 0);
//! let state = Arc::new(SharedEngine::new(engine));
//!
//! // MQTT handler side
//! let out = state.tick();
//! assert_eq!(out.len(), 1); // first ready ping
//!
//! // Display side
//! let board = state.snapshot();
//! assert_eq!(board.len(), 4);
//! ```

use std::sync::Mutex;

use crate::engine::{EngineEvent, LocalRequest, ProtocolEngine, TrackState};
use crate::error::ProtocolError;
use crate::hal::SystemClock;
use crate::message::OutboundMessage;
use crate::registry::{DestIndex, TrackIndex, DEST_BUTTONS, MAX_NUM_OF_TRACKS};
use crate::traits::Clock;
use crate::wire;

/// Every track of every destination, indexed `[dest][track]`.
pub type BoardSnapshot = [[TrackState; MAX_NUM_OF_TRACKS]; DEST_BUTTONS];

/// One engine shared between services.
///
/// Uses a `Mutex` rather than an `RwLock`: nearly every access mutates the
/// engine, if only to drain events.
pub struct SharedEngine {
    engine: Mutex<ProtocolEngine>,
    clock: SystemClock,
}

impl SharedEngine {
    /// Wrap `engine`. Its time base starts now.
    pub fn new(engine: ProtocolEngine) -> Self {
        Self {
            engine: Mutex::new(engine),
            clock: SystemClock::new(),
        }
    }

    /// Milliseconds since the state was created.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Run `f` with the engine locked.
    ///
    /// The closure keeps the lock from being held across await points.
    pub fn with_engine<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut ProtocolEngine) -> R,
    {
        let mut engine = self.engine.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut engine)
    }

    /// Decode and process one inbound MQTT message.
    ///
    /// Refused messages are logged and produce nothing.
    pub fn handle_inbound(&self, topic: &str, payload: &[u8]) -> Vec<OutboundMessage> {
        let now_ms = self.now_ms();
        let result = wire::decode(topic, payload)
            .and_then(|msg| self.with_engine(|engine| engine.on_inbound_message(&msg, now_ms)));
        result.unwrap_or_else(|error| {
            tracing::debug!(topic, %error, "inbound message dropped");
            Vec::new()
        })
    }

    /// Run the engine timers.
    pub fn tick(&self) -> Vec<OutboundMessage> {
        let now_ms = self.now_ms();
        self.with_engine(|engine| engine.on_tick(now_ms))
    }

    /// Forward a keypad action.
    pub fn local_request(&self, dest: DestIndex, track: TrackIndex, request: LocalRequest) -> Result<Vec<OutboundMessage>, ProtocolError> {
        let now_ms = self.now_ms();
        self.with_engine(|engine| engine.on_local_request(dest, track, request, now_ms))
    }

    /// State of every track, for the display.
    pub fn snapshot(&self) -> BoardSnapshot {
        self.with_engine(|engine| {
            core::array::from_fn(|d| {
                core::array::from_fn(|t| {
                    let dest = DestIndex::ALL[d];
                    let track = TrackIndex::ALL[t];
                    engine.current_state(dest, track)
                })
            })
        })
    }

    /// Take queued engine events.
    pub fn drain_events(&self) -> Vec<EngineEvent> {
        self.with_engine(|engine| engine.drain_events().collect())
    }
}
