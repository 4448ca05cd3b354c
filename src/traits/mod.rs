//! Trait definitions for the platform seams of the node.
//!
//! The protocol engine itself is pure; these traits are what the service
//! runners need from the platform:
//!
//! - `clock`: monotonic millisecond time source
//! - `network`: MQTT publish / subscribe
//!
//! Mock implementations live in [`crate::hal`].

pub mod clock;
pub mod network;

pub use clock::*;
pub use network::*;
