//! # tambox
//!
//! Track authority (TAM) protocol engine for trackside nodes on a model
//! railway layout. Neighbouring stations negotiate traffic direction and
//! train departures over MQTT.
//!
//! ## Features
//!
//! - **Per-track state machines**: ten TAM states from `NOT_USED` to `LOST`
//! - **Direction arbitration**: single-track links negotiate, double-track links are fixed
//! - **Deterministic tie-breaks**: simultaneous requests resolve the same way on both nodes
//! - **Liveness**: ready pings, lost detection and a broker last will
//! - **Pending requests**: one request in flight per destination, with timeout
//!
//! ## Architecture
//!
//! The crate is structured so the whole protocol can be tested without a
//! broker:
//!
//! - `registry` - Destination table loaded from the configuration server
//! - `message` - Topics and message bodies
//! - `track` - Per-track state machine
//! - `direction` - Traffic direction and authority bookkeeping
//! - `pending` - Outstanding local requests
//! - `liveness` - Ready pings and lost detection
//! - `engine` - Ties everything together
//! - `wire` - JSON codec
//! - `services` - MQTT runners (polling and tokio)
//!
//! ## Example
//!
//! ```rust
//! use tambox::{
//!     Config, DestIndex, Destination, DestinationRegistry, LocalRequest, NodeConfig,
//!     ProtocolEngine, TamState, TrackIndex, TrafficDirection,
//! };
//!
//! let registry = DestinationRegistry::new()
//!     .with_destination(DestIndex::A, Destination::single("tambox-2", "Hr", "Hallsberg", 'b'));
//! let config = Config::default().with_node(NodeConfig::default().with_id("tambox-1"));
//! let mut engine = ProtocolEngine::new(&config, registry, 0);
//!
//! // Ask the neighbour for out traffic
//! let out = engine
//!     .on_local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::Out), 0)
//!     .unwrap();
//! assert_eq!(out.len(), 1);
//! assert_eq!(engine.current_state(DestIndex::A, TrackIndex::Left).state, TamState::TrafficDirection);
//!
//! // Run timers in your main loop
//! let _pings = engine.on_tick(20);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

extern crate alloc;

/// Shared configuration system for desktop and embedded nodes.
pub mod config;
/// Traffic direction and authority bookkeeping per track.
pub mod direction;
/// The protocol engine that coordinates tracks, requests and liveness.
pub mod engine;
/// Error taxonomy.
pub mod error;
/// Platform implementations with mocks for testing.
pub mod hal;
/// Destination liveness supervision.
pub mod liveness;
/// Topics and message bodies.
pub mod message;
/// Outstanding local requests per destination.
pub mod pending;
/// Destination table.
pub mod registry;
/// Per-track TAM state machine.
pub mod track;
/// Platform abstractions.
pub mod traits;

/// JSON wire codec (serde-json-core based).
#[cfg(feature = "serde-json-core")]
pub mod wire;

/// MQTT service runners (feature-gated).
#[cfg(feature = "serde-json-core")]
pub mod services;

// Re-exports for convenience
pub use config::{Config, MqttConfig, NodeConfig, TimingConfig};
pub use direction::{Authority, DirectionArbiter, TrafficDirection};
pub use engine::{EngineEvent, LocalRequest, ProtocolEngine, TrackState};
pub use error::{MalformedKind, ProtocolError};
pub use liveness::LivenessSupervisor;
pub use message::{MessageBody, MessageKind, OutboundMessage, ProtocolMessage, StateValue, Topic};
pub use pending::{PendingQueue, PendingRequest, Resolution};
pub use registry::{DestIndex, Destination, DestinationRegistry, Topology, TrackIndex};
pub use track::{TamState, TrackEvent, TrackMachine, Transition};
pub use traits::{Clock, MqttClient, MqttMessage};
