//! Service runners that connect the protocol engine to MQTT.
//!
//! - `runner`: [`TamBoxRunner`], polling-style driver over any [`MqttClient`]
//!   (works on `no_std` targets)
//! - `shared`: [`SharedEngine`], one engine behind a mutex for desktop services
//! - `keypad`: text keypad commands for desktop nodes
//! - `mqtt` feature: rumqttc/tokio handler with last will and reconnect
//!
//! # Shared State Pattern
//!
//! On desktop every service shares a single engine:
//!
//! ```ignore
//! use std::sync::Arc;
//! use tambox::services::{MqttHandler, SharedEngine};
//!
//! let state = Arc::new(SharedEngine::new(engine));
//! let handler = MqttHandler::new(Arc::clone(&state), &config);
//! let keypad = handler.command_sender();
//! ```
//!
//! [`MqttClient`]: crate::traits::MqttClient

pub mod runner;

#[cfg(feature = "std")]
pub mod shared;

#[cfg(feature = "std")]
pub mod keypad;

#[cfg(feature = "mqtt")]
pub mod mqtt;

// Re-exports
pub use runner::*;

#[cfg(feature = "std")]
pub use shared::*;

#[cfg(feature = "std")]
pub use keypad::*;

#[cfg(feature = "mqtt")]
pub use mqtt::*;
