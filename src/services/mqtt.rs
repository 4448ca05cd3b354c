//! MQTT client handler for desktop nodes.
//!
//! Bridges a rumqttc connection to the shared [`ProtocolEngine`]:
//!
//! **Subscribe Topics** (re-subscribed on every connect):
//! - `cmd/{scale}/tam/{node}/+/req` - requests from neighbours
//! - `cmd/{scale}/tam/{node}/+/res` - responses to our requests
//! - `dt/{scale}/ping/+` - ready / lost broadcasts
//! - `cmd/{scale}/node/{node}/inventory/req` - configuration server queries
//!
//! **Publish Topics:**
//! - whatever the engine produces, plus `dt/{scale}/ping/{node}` as last will
//!
//! # Shared State
//!
//! ```ignore
//! let state = Arc::new(SharedEngine::new(engine));
//! let handler = MqttHandler::new(Arc::clone(&state), &config);
//! let keypad = handler.command_sender();
//! handler.run().await?;
//! ```
//!
//! [`ProtocolEngine`]: crate::engine::ProtocolEngine

use std::sync::Arc;
use std::time::Duration;

use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::ProtocolError;
use crate::message::OutboundMessage;
use crate::wire;

use super::keypad::LocalCommand;
use super::shared::SharedEngine;

// ============================================================================
// Configuration
// ============================================================================

/// Runtime MQTT client configuration for `rumqttc`.
///
/// Uses `String` for `rumqttc`; build it from the fixed-size
/// [`crate::config::Config`] with [`MqttRuntimeConfig::from_config`].
#[derive(Debug, Clone)]
pub struct MqttRuntimeConfig {
    /// MQTT broker hostname
    pub host: String,
    /// MQTT broker port
    pub port: u16,
    /// Client ID
    pub client_id: String,
    /// Username and password, if the broker wants them
    pub credentials: Option<(String, String)>,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,
    /// How often the engine timers run
    pub tick_ms: u64,
}

impl Default for MqttRuntimeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "tambox".to_string(),
            credentials: None,
            keep_alive_secs: 30,
            tick_ms: 250,
        }
    }
}

impl MqttRuntimeConfig {
    /// Create a new config with the given broker address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Create from the node configuration.
    ///
    /// An empty client id falls back to the node id.
    pub fn from_config(config: &Config) -> Self {
        let client_id = if config.mqtt.client_id.is_empty() {
            config.node.id.as_str()
        } else {
            config.mqtt.client_id.as_str()
        };
        let credentials = config
            .mqtt
            .has_auth()
            .then(|| (config.mqtt.username.to_string(), config.mqtt.password.to_string()));
        Self {
            host: config.mqtt.host.to_string(),
            port: config.mqtt.port,
            client_id: client_id.to_string(),
            credentials,
            keep_alive_secs: config.mqtt.keep_alive_secs,
            ..Default::default()
        }
    }

    /// Set the client ID
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    /// Set the engine tick interval
    pub fn tick_ms(mut self, ms: u64) -> Self {
        self.tick_ms = ms;
        self
    }
}

// ============================================================================
// MQTT Handler
// ============================================================================

/// MQTT handler that bridges the broker to the shared engine.
pub struct MqttHandler {
    state: Arc<SharedEngine>,
    config: MqttRuntimeConfig,
    commands_tx: mpsc::Sender<LocalCommand>,
    commands_rx: mpsc::Receiver<LocalCommand>,
}

impl MqttHandler {
    /// Create a handler for `state` using the broker settings in `config`.
    pub fn new(state: Arc<SharedEngine>, config: &Config) -> Self {
        Self::with_runtime_config(state, MqttRuntimeConfig::from_config(config))
    }

    /// Create a handler with explicit runtime settings.
    pub fn with_runtime_config(state: Arc<SharedEngine>, config: MqttRuntimeConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(16);
        Self {
            state,
            config,
            commands_tx,
            commands_rx,
        }
    }

    /// Get a reference to the shared state.
    pub fn state(&self) -> Arc<SharedEngine> {
        Arc::clone(&self.state)
    }

    /// Channel for keypad commands.
    pub fn command_sender(&self) -> mpsc::Sender<LocalCommand> {
        self.commands_tx.clone()
    }

    /// Broker options, including the `lost` last will.
    pub fn options(&self) -> Result<MqttOptions, MqttError> {
        let mut options = MqttOptions::new(&self.config.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs as u64));
        if let Some((username, password)) = &self.config.credentials {
            options.set_credentials(username, password);
        }

        let will = wire::encode(&self.state.with_engine(|engine| engine.last_will()))?;
        options.set_last_will(LastWill::new(
            will.topic.as_str(),
            will.payload.to_vec(),
            QoS::AtLeastOnce,
            false,
        ));
        Ok(options)
    }

    /// Run the MQTT handler
    ///
    /// This function blocks and handles MQTT messages until shutdown.
    pub async fn run(self) -> Result<(), MqttError> {
        let options = self.options()?;
        let Self {
            state,
            config,
            commands_rx: mut commands,
            ..
        } = self;
        let (client, mut eventloop) = AsyncClient::new(options, 32);
        let subscriptions = state.with_engine(|engine| engine.subscriptions());

        tracing::info!(host = %config.host, port = config.port, "connecting to broker");

        // Channel for messages to publish
        let (tx, rx) = mpsc::channel::<Vec<OutboundMessage>>(32);
        tokio::spawn(publish_loop(client.clone(), rx));

        // Engine timers
        let tick_tx = tx.clone();
        let tick_ms = config.tick_ms;
        let state_for_tick = Arc::clone(&state);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            loop {
                interval.tick().await;
                let out = state_for_tick.tick();
                if !out.is_empty() && tick_tx.send(out).await.is_err() {
                    break;
                }
            }
        });

        // Keypad
        let command_tx = tx.clone();
        let state_for_commands = Arc::clone(&state);
        tokio::spawn(async move {
            while let Some(cmd) = commands.recv().await {
                match state_for_commands.local_request(cmd.dest, cmd.track, cmd.request) {
                    Ok(out) => {
                        if command_tx.send(out).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => tracing::warn!(dest = cmd.dest.as_str(), track = cmd.track.as_str(), %error, "keypad request refused"),
                }
            }
        });

        // Main event loop
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("connected");
                    for filter in &subscriptions {
                        client.try_subscribe(filter.as_str(), QoS::AtLeastOnce)?;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let out = state.handle_inbound(&publish.topic, &publish.payload);
                    if !out.is_empty() && tx.send(out).await.is_err() {
                        return Err(MqttError::Closed);
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%error, "mqtt connection error");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }
}

async fn publish_loop(client: AsyncClient, mut rx: mpsc::Receiver<Vec<OutboundMessage>>) {
    while let Some(batch) = rx.recv().await {
        for msg in &batch {
            let encoded = match wire::encode(msg) {
                Ok(encoded) => encoded,
                Err(error) => {
                    tracing::warn!(%error, "cannot encode outbound message");
                    continue;
                }
            };
            tracing::debug!(topic = %encoded.topic, "publish");
            if let Err(error) = client
                .publish(encoded.topic.as_str(), QoS::AtLeastOnce, false, encoded.payload.to_vec())
                .await
            {
                tracing::warn!(%error, "publish failed");
            }
        }
    }
}

/// MQTT-related errors
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// The client request queue refused a request
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    /// A message could not be encoded
    #[error("MQTT encode error: {0}")]
    Encode(#[from] ProtocolError),
    /// The publisher task stopped
    #[error("MQTT publisher closed")]
    Closed,
}
