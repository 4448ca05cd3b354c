//! Desktop TAM box node.
//!
//! Loads the node configuration and destination table from a JSON file,
//! connects to the broker and reads keypad commands from stdin.
//!
//! ```text
//! tambox [node.json]
//! RUST_LOG=tambox=debug tambox node.json
//! ```
//!
//! The file holds the same settings the configuration server hands out:
//!
//! ```json
//! {
//!   "config": {
//!     "mqtt": { "host": "mqtt-broker.local", "scale": "h0" },
//!     "node": { "id": "tambox-1", "signature": "Cda", "name": "Charlottendal" }
//!   },
//!   "destinations": {
//!     "slots": [
//!       { "id": "tambox-2", "signature": "Hr", "name": "Hallsberg", "tracks": 1,
//!         "exit": "b", "type": "single", "totTracks": 1 },
//!       null, null, null
//!     ]
//!   }
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use tambox::config::Config;
use tambox::engine::{EngineEvent, ProtocolEngine};
use tambox::registry::DestinationRegistry;
use tambox::services::{LocalCommand, MqttHandler, SharedEngine};

#[derive(serde::Deserialize)]
struct NodeFile {
    #[serde(default)]
    config: Config,
    destinations: DestinationRegistry,
}

fn load(path: &str) -> anyhow::Result<NodeFile> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {path}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "tambox.json".to_string());
    let NodeFile { mut config, destinations } = load(&path)?;
    if config.node.epoch_secs == 0 {
        config.node.epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock before 1970")?
            .as_secs();
    }

    tracing::info!(
        node = %config.node.id,
        destinations = destinations.len(),
        "starting tambox"
    );

    let engine = ProtocolEngine::new(&config, destinations, 0);
    let state = Arc::new(SharedEngine::new(engine));
    let handler = MqttHandler::new(Arc::clone(&state), &config);

    tokio::spawn(read_keypad(handler.command_sender()));
    tokio::spawn(show_events(Arc::clone(&state)));

    handler.run().await?;
    Ok(())
}

/// One command per stdin line.
async fn read_keypad(commands: mpsc::Sender<LocalCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<LocalCommand>() {
            Ok(cmd) => {
                if commands.send(cmd).await.is_err() {
                    break;
                }
            }
            Err(error) => tracing::warn!(%error, "keypad"),
        }
    }
}

/// Stand-in for the panel display: log every engine event.
async fn show_events(state: Arc<SharedEngine>) {
    let mut interval = tokio::time::interval(Duration::from_millis(100));
    loop {
        interval.tick().await;
        for event in state.drain_events() {
            match event {
                EngineEvent::StateChanged { dest, track, transition } => {
                    tracing::info!(dest = dest.as_str(), track = track.as_str(), from = %transition.from, to = %transition.to, "state")
                }
                EngineEvent::IncomingTrain { dest, track, train } => {
                    tracing::info!(dest = dest.as_str(), track = track.as_str(), train = train.as_str(), "incoming train, accept or reject")
                }
                other => tracing::info!(event = ?other, "engine"),
            }
        }
    }
}
