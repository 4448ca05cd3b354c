//! The TAM protocol engine.
//!
//! [`ProtocolEngine`] ties the track machines, the direction arbiter, the
//! pending queue and the liveness supervisor together. It is driven by
//! three inputs and never touches the network itself:
//!
//! - [`on_inbound_message`](ProtocolEngine::on_inbound_message) for parsed MQTT traffic
//! - [`on_local_request`](ProtocolEngine::on_local_request) for keypad actions
//! - [`on_tick`](ProtocolEngine::on_tick) for timers
//!
//! Each returns the messages to publish. State changes are also queued as
//! [`EngineEvent`]s for the display.
//!
//! # Example
//!
//! ```rust
//! use tambox::config::{Config, NodeConfig};
//! use tambox::direction::TrafficDirection;
//! use tambox::engine::{LocalRequest, ProtocolEngine};
//! use tambox::registry::{DestIndex, Destination, DestinationRegistry, TrackIndex};
//! use tambox::track::TamState;
//!
//! let registry = DestinationRegistry::new()
//!     .with_destination(DestIndex::A, Destination::single("tambox-2", "Hr", "Hallsberg", 'b'));
//! let config = Config::default().with_node(NodeConfig::default().with_id("tambox-1"));
//! let mut engine = ProtocolEngine::new(&config, registry, 0);
//!
//! let out = engine
//!     .on_local_request(DestIndex::A, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::Out), 0)
//!     .unwrap();
//! assert_eq!(out[0].topic.to_path().as_str(), "cmd/h0/tam/tambox-2/b/req");
//! assert_eq!(
//!     engine.current_state(DestIndex::A, TrackIndex::Left).state,
//!     TamState::TrafficDirection
//! );
//! ```

extern crate alloc;
use alloc::vec;
use alloc::vec::Vec;

use heapless::Deque;

use crate::config::{truncated, Config, LongString, NodeConfig, Scale, TimingConfig, TrainId, SW_TYPE, SW_VERSION};
use crate::direction::{
    Arbitration, Authority, DirectionArbiter, DirectionRequest, RejectReason, Requester, TrafficDirection,
};
use crate::error::{MalformedKind, ProtocolError};
use crate::liveness::LivenessSupervisor;
use crate::message::{
    MessageBody, MessageKind, Metadata, Order, OutboundMessage, ProtocolMessage, StateValue, Topic,
};
use crate::pending::{PendingQueue, PendingRequest, Resolution};
use crate::registry::{DestIndex, DestinationRegistry, Topology, TrackIndex, DEST_BUTTONS, MAX_NUM_OF_TRACKS};
use crate::track::{TamState, TrackEvent, TrackMachine, Transition};

/// Events kept for the display before the oldest is dropped.
pub const EVENT_CAPACITY: usize = 32;

/// Keypad actions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalRequest {
    /// Ask the peer to set the traffic direction (local point of view)
    Direction(TrafficDirection),
    /// Ask the peer to accept a train
    Departure(TrainId),
    /// Accept the inbound train request
    Accept,
    /// Reject the inbound train request
    Reject,
    /// Withdraw our outstanding request
    Cancel,
    /// Report the train under authority has arrived
    Arrival,
}

/// Notifications for the display collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineEvent {
    /// A track changed state
    StateChanged {
        /// Destination
        dest: DestIndex,
        /// Track
        track: TrackIndex,
        /// The change
        transition: Transition,
    },
    /// The recorded traffic direction changed
    DirectionChanged {
        /// Destination
        dest: DestIndex,
        /// Track
        track: TrackIndex,
        /// New direction
        direction: TrafficDirection,
    },
    /// One of our requests got an answer or was withdrawn
    RequestClosed {
        /// Destination
        dest: DestIndex,
        /// Track
        track: TrackIndex,
        /// How it ended
        resolution: Resolution,
    },
    /// One of our requests failed without an answer
    RequestFailed {
        /// Destination
        dest: DestIndex,
        /// Track
        track: TrackIndex,
        /// Why
        error: ProtocolError,
    },
    /// The peer asks to send a train toward us
    IncomingTrain {
        /// Destination
        dest: DestIndex,
        /// Track
        track: TrackIndex,
        /// Train identity
        train: TrainId,
    },
    /// The peer withdrew its train request
    IncomingCanceled {
        /// Destination
        dest: DestIndex,
        /// Track
        track: TrackIndex,
    },
    /// A train under authority arrived
    TrainArrived {
        /// Destination
        dest: DestIndex,
        /// Track
        track: TrackIndex,
        /// Train identity, if known
        train: Option<TrainId>,
    },
    /// Destination went silent or announced itself lost
    DestinationLost {
        /// Destination
        dest: DestIndex,
    },
    /// Lost destination is back
    DestinationReady {
        /// Destination
        dest: DestIndex,
    },
}

/// Snapshot of one track for the display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackState {
    /// Machine state
    pub state: TamState,
    /// Recorded traffic direction
    pub direction: TrafficDirection,
    /// Authority held
    pub authority: Authority,
    /// Train under authority or awaiting an answer
    pub train: Option<TrainId>,
    /// Last time the destination was heard from
    pub last_seen_ms: u64,
}

#[derive(Clone, Debug)]
struct InboundRequest {
    track: TrackIndex,
    train: TrainId,
    session_id: Option<u32>,
    respond_to: Option<Topic>,
}

/// Track authority protocol engine for one node.
pub struct ProtocolEngine {
    node: NodeConfig,
    scale: Scale,
    timing: TimingConfig,
    registry: DestinationRegistry,
    tracks: [[TrackMachine; MAX_NUM_OF_TRACKS]; DEST_BUTTONS],
    arbiter: DirectionArbiter,
    pending: PendingQueue,
    liveness: LivenessSupervisor,
    inbound: [Option<InboundRequest>; DEST_BUTTONS],
    events: Deque<EngineEvent, EVENT_CAPACITY>,
    next_session: u32,
    rssi: Option<i16>,
}

impl ProtocolEngine {
    /// Create an engine for `registry`; silence is counted from `now_ms`.
    pub fn new(config: &Config, registry: DestinationRegistry, now_ms: u64) -> Self {
        let tracks = core::array::from_fn(|d| {
            core::array::from_fn(|t| {
                let configured = DestIndex::from_index(d)
                    .zip(TrackIndex::ALL.get(t).copied())
                    .is_some_and(|(dest, track)| registry.is_configured(dest, track));
                TrackMachine::new(configured)
            })
        });
        Self {
            arbiter: DirectionArbiter::new(&registry, &config.node.signature, &config.node.id),
            liveness: LivenessSupervisor::new(&registry, &config.timing, now_ms),
            node: config.node.clone(),
            scale: config.mqtt.scale.clone(),
            timing: config.timing.clone(),
            registry,
            tracks,
            pending: PendingQueue::new(),
            inbound: Default::default(),
            events: Deque::new(),
            next_session: 1,
            rssi: None,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Snapshot of one track.
    pub fn current_state(&self, dest: DestIndex, track: TrackIndex) -> TrackState {
        let machine = self.machine(dest, track);
        let train = machine.train().cloned().or_else(|| match machine.state() {
            TamState::OutRequest => self.pending.get(dest).and_then(|p| p.train().cloned()),
            TamState::InRequest => self.inbound[dest.index()].as_ref().map(|r| r.train.clone()),
            _ => None,
        });
        TrackState {
            state: machine.state(),
            direction: self.arbiter.direction(dest, track),
            authority: self.arbiter.authority(dest, track),
            train,
            last_seen_ms: self.liveness.last_seen(dest),
        }
    }

    /// Configured destinations.
    pub fn registry(&self) -> &DestinationRegistry {
        &self.registry
    }

    /// Request awaiting a response from `dest`.
    pub fn pending(&self, dest: DestIndex) -> Option<&PendingRequest> {
        self.pending.get(dest)
    }

    /// Take all queued events, oldest first.
    pub fn drain_events(&mut self) -> impl Iterator<Item = EngineEvent> + '_ {
        core::iter::from_fn(move || self.events.pop_front())
    }

    /// Topic filters the messaging collaborator must subscribe to.
    pub fn subscriptions(&self) -> Vec<LongString> {
        let own = &self.node.id;
        let scale = &self.scale;
        [
            alloc::format!("cmd/{scale}/tam/{own}/+/req"),
            alloc::format!("cmd/{scale}/tam/{own}/+/res"),
            alloc::format!("dt/{scale}/ping/+"),
            alloc::format!("cmd/{scale}/node/{own}/inventory/req"),
        ]
        .iter()
        .map(|filter| truncated(filter))
        .collect()
    }

    /// The `lost` ping the broker should publish if this node disappears.
    pub fn last_will(&self) -> OutboundMessage {
        self.ping(StateValue::Lost, 0)
    }

    /// Signal strength reported in inventory responses.
    pub fn set_rssi(&mut self, rssi: Option<i16>) {
        self.rssi = rssi;
    }

    // ========================================================================
    // Inbound messages
    // ========================================================================

    /// Process one parsed inbound message and return the messages to publish.
    ///
    /// A refused message leaves the engine state untouched.
    pub fn on_inbound_message(&mut self, msg: &ProtocolMessage, now_ms: u64) -> Result<Vec<OutboundMessage>, ProtocolError> {
        if msg.topic.scale != self.scale {
            return Err(ProtocolError::Malformed(MalformedKind::Value("scale")));
        }
        match msg.kind()? {
            MessageKind::Ignored => Ok(Vec::new()),
            MessageKind::Inventory => self.on_inventory(msg, now_ms),
            MessageKind::Ready => {
                let mut out = Vec::new();
                for dest in self.ping_senders(msg)? {
                    out.extend(self.on_ready(dest, now_ms));
                }
                Ok(out)
            }
            MessageKind::Lost => {
                for dest in self.ping_senders(msg)? {
                    if self.liveness.mark_lost(dest) {
                        self.apply_lost(dest);
                    }
                }
                Ok(Vec::new())
            }
            MessageKind::DirectionRequest(value) => {
                let (dest, track) = self.accept_tam(msg, now_ms, "inbound direction request")?;
                self.on_direction_request(dest, track, value, msg, now_ms)
            }
            MessageKind::DepartureRequest(train) => {
                let (dest, track) = self.accept_tam(msg, now_ms, "inbound departure")?;
                self.on_departure_request(dest, track, train, msg, now_ms)
            }
            MessageKind::Arrival(train) => {
                let (dest, track) = self.accept_tam(msg, now_ms, "inbound arrival")?;
                self.on_arrival(dest, track, train)
            }
            MessageKind::Cancel => {
                let (dest, track) = self.accept_tam(msg, now_ms, "inbound cancel")?;
                self.on_cancel(dest, track, msg, now_ms)
            }
            MessageKind::Response(value) => {
                let (dest, track) = self.accept_tam(msg, now_ms, "response")?;
                self.on_response(dest, track, value, msg)
            }
        }
    }

    /// Every destination behind the node that sent a ping; empty for our
    /// own broadcast.
    fn ping_senders(&self, msg: &ProtocolMessage) -> Result<Vec<DestIndex>, ProtocolError> {
        if msg.topic.node_id == self.node.id {
            return Ok(Vec::new());
        }
        let senders: Vec<DestIndex> = self.registry.find_by_id(&msg.topic.node_id).collect();
        if senders.is_empty() {
            return Err(ProtocolError::UnknownDestination);
        }
        Ok(senders)
    }

    /// Resolve the destination and track of a TAM message and record the
    /// traffic for liveness.
    fn accept_tam(&mut self, msg: &ProtocolMessage, now_ms: u64, event: &'static str) -> Result<(DestIndex, TrackIndex), ProtocolError> {
        if msg.topic.node_id != self.node.id {
            return Err(ProtocolError::UnknownDestination);
        }
        let dest = msg
            .topic
            .port_id
            .as_deref()
            .and_then(DestIndex::from_text)
            .ok_or(ProtocolError::UnknownDestination)?;
        let destination = self.registry.get(dest).ok_or(ProtocolError::UnknownDestination)?;
        if msg.body.node_id.as_ref().is_some_and(|sender| *sender != destination.id) {
            return Err(ProtocolError::UnknownDestination);
        }
        // the body names the track from the sender's side
        let track = match (destination.topology(), msg.body.track) {
            (Topology::DoubleTrack, Some(track)) => track.mirrored(),
            (_, track) => track.unwrap_or(TrackIndex::Left),
        };
        if !destination.has_track(track) {
            return Err(ProtocolError::UnknownDestination);
        }

        self.liveness.observe(dest, now_ms);
        if self.liveness.is_lost(dest) {
            return Err(ProtocolError::InvalidTransition {
                state: TamState::Lost,
                event,
            });
        }
        Ok((dest, track))
    }

    fn on_direction_request(
        &mut self,
        dest: DestIndex,
        track: TrackIndex,
        value: StateValue,
        msg: &ProtocolMessage,
        now_ms: u64,
    ) -> Result<Vec<OutboundMessage>, ProtocolError> {
        // the peer speaks from its own side of the link
        let requested = match value {
            StateValue::Out => TrafficDirection::In,
            StateValue::In => TrafficDirection::Out,
            _ => return Err(ProtocolError::Malformed(MalformedKind::Value("state.desired"))),
        };
        let local_pending = self
            .pending
            .get(dest)
            .is_some_and(|p| p.track == track && p.direction_requested().is_some());
        let destination = self.registry.get(dest).ok_or(ProtocolError::UnknownDestination)?;
        let topology = destination.topology();
        let decision = self.arbiter.decide(&DirectionRequest {
            dest,
            track,
            topology,
            state: self.machine(dest, track).state(),
            requested,
            requester: Requester::Peer {
                signature: &destination.signature,
                node_id: &destination.id,
            },
            local_pending,
        });

        let reported = match decision {
            Arbitration::Accept => {
                if topology == Topology::SingleTrack {
                    self.step(dest, track, TrackEvent::InboundDirectionRequest)?;
                    if local_pending {
                        self.close_pending(dest, Resolution::Superseded);
                    }
                    self.set_direction(dest, track, requested);
                }
                StateValue::Accepted
            }
            Arbitration::Reject(reason) => {
                tracing::debug!(dest = dest.as_str(), track = track.as_str(), ?reason, "direction request rejected");
                StateValue::Rejected
            }
        };
        Ok(vec![self.reply(dest, track, msg, reported, None, now_ms)?])
    }

    fn on_departure_request(
        &mut self,
        dest: DestIndex,
        track: TrackIndex,
        train: TrainId,
        msg: &ProtocolMessage,
        now_ms: u64,
    ) -> Result<Vec<OutboundMessage>, ProtocolError> {
        if let Some(existing) = &self.inbound[dest.index()] {
            if existing.track == track && existing.train == train && existing.session_id == msg.body.session_id {
                tracing::trace!(dest = dest.as_str(), train = train.as_str(), "duplicate departure request");
                return Ok(Vec::new());
            }
        }

        let refusal = if self.pending.is_active(dest) || self.inbound[dest.index()].is_some() {
            Some(ProtocolError::Busy)
        } else {
            self.step(dest, track, TrackEvent::InboundDeparture).err()
        };
        if let Some(error) = refusal {
            tracing::debug!(dest = dest.as_str(), train = train.as_str(), %error, "departure request rejected");
            return Ok(vec![self.reply(dest, track, msg, StateValue::Rejected, Some(train), now_ms)?]);
        }

        self.inbound[dest.index()] = Some(InboundRequest {
            track,
            train: train.clone(),
            session_id: msg.body.session_id,
            respond_to: msg.body.respond_to.as_deref().and_then(|t| Topic::parse(t).ok()),
        });
        self.emit(EngineEvent::IncomingTrain { dest, track, train });
        Ok(Vec::new())
    }

    fn on_arrival(&mut self, dest: DestIndex, track: TrackIndex, train: TrainId) -> Result<Vec<OutboundMessage>, ProtocolError> {
        let held = self.machine(dest, track).train().cloned();
        self.step(dest, track, TrackEvent::InboundArrival)?;
        self.emit(EngineEvent::TrainArrived {
            dest,
            track,
            train: held.or(Some(train)),
        });
        Ok(Vec::new())
    }

    fn on_cancel(&mut self, dest: DestIndex, track: TrackIndex, msg: &ProtocolMessage, now_ms: u64) -> Result<Vec<OutboundMessage>, ProtocolError> {
        let matches = self.inbound[dest.index()].as_ref().is_some_and(|r| r.track == track);
        if !matches {
            return Err(ProtocolError::InvalidTransition {
                state: self.machine(dest, track).state(),
                event: "inbound cancel",
            });
        }
        let reply = self.reply(dest, track, msg, StateValue::Canceled, msg.body.train.clone(), now_ms)?;
        self.step(dest, track, TrackEvent::InboundCancel)?;
        self.inbound[dest.index()] = None;
        self.emit(EngineEvent::IncomingCanceled { dest, track });
        Ok(vec![reply])
    }

    fn on_response(&mut self, dest: DestIndex, track: TrackIndex, value: StateValue, msg: &ProtocolMessage) -> Result<Vec<OutboundMessage>, ProtocolError> {
        let state = self.machine(dest, track).state();
        let stale = ProtocolError::InvalidTransition { state, event: "response" };
        let pending = self.pending.get(dest).ok_or(stale.clone())?;
        if pending.track != track || msg.body.session_id.is_some_and(|s| s != pending.session_id) {
            tracing::debug!(dest = dest.as_str(), session = ?msg.body.session_id, "stale response dropped");
            return Err(stale);
        }

        let requested_direction = pending.direction_requested();
        let (event, resolution) = match value {
            StateValue::Accepted => (
                TrackEvent::ResponseAccepted {
                    train: pending.train().cloned(),
                },
                Resolution::Accepted,
            ),
            StateValue::Rejected => (TrackEvent::ResponseRejected, Resolution::Rejected),
            StateValue::Canceled => (TrackEvent::ResponseCanceled, Resolution::Canceled),
            _ => return Err(ProtocolError::Malformed(MalformedKind::Value("state.reported"))),
        };

        self.step(dest, track, event)?;
        self.close_pending(dest, resolution);
        if let (Resolution::Accepted, Some(direction)) = (resolution, requested_direction) {
            self.set_direction(dest, track, direction);
        }
        Ok(Vec::new())
    }

    fn on_inventory(&mut self, msg: &ProtocolMessage, now_ms: u64) -> Result<Vec<OutboundMessage>, ProtocolError> {
        if msg.topic.node_id != self.node.id {
            return Err(ProtocolError::UnknownDestination);
        }
        let topic = msg
            .body
            .respond_to
            .as_deref()
            .and_then(|t| Topic::parse(t).ok())
            .unwrap_or_else(|| Topic::inventory(&self.scale, &self.node.id, Order::Response));
        let metadata = Metadata {
            id: self.node.id.clone(),
            kind: truncated(SW_TYPE),
            version: truncated(SW_VERSION),
            name: self.node.name.clone(),
            signature: self.node.signature.clone(),
            rssi: self.rssi,
        };
        let body = MessageBody::new(self.timestamp(now_ms))
            .with_session(msg.body.session_id)
            .with_metadata(metadata);
        Ok(vec![ProtocolMessage::new(topic, body)])
    }

    fn on_ready(&mut self, dest: DestIndex, now_ms: u64) -> Vec<OutboundMessage> {
        if !self.liveness.mark_ready(dest, now_ms) {
            return Vec::new();
        }
        tracing::info!(dest = dest.as_str(), "destination ready");
        for track in self.configured_tracks(dest) {
            if let Err(error) = self.step(dest, track, TrackEvent::Ready) {
                tracing::warn!(dest = dest.as_str(), track = track.as_str(), %error, "ready refused");
            }
        }
        self.arbiter.mark_ready(dest);
        self.emit_directions(dest);
        self.emit(EngineEvent::DestinationReady { dest });

        let restorable = self.timing.restore_direction_on_ready
            && self.registry.get(dest).is_some_and(|d| d.topology() == Topology::SingleTrack);
        match self.arbiter.last_known(dest, TrackIndex::Left) {
            Some(direction) if restorable => self
                .request_direction(dest, TrackIndex::Left, direction, now_ms)
                .unwrap_or_else(|error| {
                    tracing::warn!(dest = dest.as_str(), %error, "direction restore failed");
                    Vec::new()
                }),
            _ => Vec::new(),
        }
    }

    /// Consequences of a destination going lost.
    fn apply_lost(&mut self, dest: DestIndex) {
        tracing::warn!(dest = dest.as_str(), "destination lost");
        if let Some(request) = self.pending.resolve(dest, Resolution::Lost) {
            self.emit(EngineEvent::RequestFailed {
                dest,
                track: request.track,
                error: ProtocolError::DestinationLost,
            });
        }
        self.inbound[dest.index()] = None;
        for track in self.configured_tracks(dest) {
            if let Err(error) = self.step(dest, track, TrackEvent::LivenessLost) {
                tracing::warn!(dest = dest.as_str(), track = track.as_str(), %error, "lost refused");
            }
        }
        self.arbiter.mark_lost(dest);
        self.emit_directions(dest);
        self.emit(EngineEvent::DestinationLost { dest });
    }

    // ========================================================================
    // Local requests
    // ========================================================================

    /// Process a keypad action and return the messages to publish.
    pub fn on_local_request(
        &mut self,
        dest: DestIndex,
        track: TrackIndex,
        request: LocalRequest,
        now_ms: u64,
    ) -> Result<Vec<OutboundMessage>, ProtocolError> {
        let destination = self.registry.get(dest).ok_or(ProtocolError::UnknownDestination)?;
        if !destination.has_track(track) {
            return Err(ProtocolError::InvalidTopology);
        }
        let topology = destination.topology();
        match request {
            LocalRequest::Direction(_) if topology == Topology::DoubleTrack => Err(ProtocolError::InvalidTopology),
            LocalRequest::Direction(direction) => self.request_direction(dest, track, direction, now_ms),
            LocalRequest::Departure(train) => self.request_departure(dest, track, train, now_ms),
            LocalRequest::Accept => self.answer_inbound(dest, track, true, now_ms),
            LocalRequest::Reject => self.answer_inbound(dest, track, false, now_ms),
            LocalRequest::Cancel => Ok(self.cancel_request(dest, now_ms)),
            LocalRequest::Arrival => self.report_arrival(dest, track, now_ms),
        }
    }

    fn request_direction(
        &mut self,
        dest: DestIndex,
        track: TrackIndex,
        direction: TrafficDirection,
        now_ms: u64,
    ) -> Result<Vec<OutboundMessage>, ProtocolError> {
        if self.pending.is_active(dest) {
            return Err(ProtocolError::Busy);
        }
        let state = self.machine(dest, track).state();
        let decision = self.arbiter.decide(&DirectionRequest {
            dest,
            track,
            topology: Topology::SingleTrack,
            state,
            requested: direction,
            requester: Requester::Local,
            local_pending: false,
        });
        match decision {
            Arbitration::Accept => {}
            Arbitration::Reject(RejectReason::NotADirection) => {
                return Err(ProtocolError::Malformed(MalformedKind::Value("direction")))
            }
            Arbitration::Reject(_) => {
                return Err(ProtocolError::InvalidTransition {
                    state,
                    event: "local direction request",
                })
            }
        }

        let session_id = self.next_session();
        let message = self.request_message(dest, track, Some(session_id), wire_direction(direction), None, now_ms)?;
        self.step(dest, track, TrackEvent::LocalDirectionRequest)?;
        self.pending
            .enqueue(dest, PendingRequest::direction(track, direction, session_id, now_ms))?;
        Ok(vec![message])
    }

    fn request_departure(&mut self, dest: DestIndex, track: TrackIndex, train: TrainId, now_ms: u64) -> Result<Vec<OutboundMessage>, ProtocolError> {
        if self.pending.is_active(dest) {
            return Err(ProtocolError::Busy);
        }
        let session_id = self.next_session();
        let message = self.request_message(dest, track, Some(session_id), StateValue::Out, Some(train.clone()), now_ms)?;
        self.step(dest, track, TrackEvent::LocalDeparture)?;
        self.pending
            .enqueue(dest, PendingRequest::departure(track, train, session_id, now_ms))?;
        Ok(vec![message])
    }

    fn answer_inbound(&mut self, dest: DestIndex, track: TrackIndex, accept: bool, now_ms: u64) -> Result<Vec<OutboundMessage>, ProtocolError> {
        let event_name = if accept { "local accept" } else { "local reject" };
        let request = match &self.inbound[dest.index()] {
            Some(request) if request.track == track => request.clone(),
            _ => {
                return Err(ProtocolError::InvalidTransition {
                    state: self.machine(dest, track).state(),
                    event: event_name,
                })
            }
        };

        let topic = match request.respond_to {
            Some(topic) => topic,
            None => self.peer_topic(dest, Order::Response)?,
        };
        let reported = if accept { StateValue::Accepted } else { StateValue::Rejected };
        let body = self
            .body(dest, track, now_ms)
            .with_session(request.session_id)
            .with_train(Some(request.train.clone()))
            .with_reported(reported);

        let event = if accept {
            TrackEvent::LocalAccept { train: request.train }
        } else {
            TrackEvent::LocalReject
        };
        self.step(dest, track, event)?;
        self.inbound[dest.index()] = None;
        Ok(vec![ProtocolMessage::new(topic, body)])
    }

    fn report_arrival(&mut self, dest: DestIndex, track: TrackIndex, now_ms: u64) -> Result<Vec<OutboundMessage>, ProtocolError> {
        let train = self.machine(dest, track).train().cloned();
        let message = self.request_message(dest, track, None, StateValue::In, train.clone(), now_ms)?;
        self.step(dest, track, TrackEvent::LocalArrival)?;
        self.emit(EngineEvent::TrainArrived { dest, track, train });
        Ok(vec![message])
    }

    /// Withdraw the outstanding request to `dest`, telling the peer.
    /// Calling it with nothing pending does nothing.
    pub fn cancel_request(&mut self, dest: DestIndex, now_ms: u64) -> Vec<OutboundMessage> {
        let Some(request) = self.pending.cancel(dest) else {
            return Vec::new();
        };
        if let Err(error) = self.step(dest, request.track, TrackEvent::LocalCancel) {
            tracing::warn!(dest = dest.as_str(), %error, "cancel refused by track");
        }
        self.emit(EngineEvent::RequestClosed {
            dest,
            track: request.track,
            resolution: Resolution::Withdrawn,
        });
        self.cancel_message(dest, &request, now_ms).into_iter().collect()
    }

    // ========================================================================
    // Timers
    // ========================================================================

    /// Run timers: ready ping, liveness deadlines and response timeouts.
    pub fn on_tick(&mut self, now_ms: u64) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        if self.liveness.ping_due(now_ms) {
            out.push(self.ping(StateValue::Ready, now_ms));
        }

        for dest in self.liveness.sweep(now_ms) {
            self.apply_lost(dest);
        }

        for (dest, request) in self.pending.timeout_sweep(now_ms, self.timing.response_timeout_ms) {
            tracing::warn!(dest = dest.as_str(), session = request.session_id, "request timed out");
            if let Err(error) = self.step(dest, request.track, TrackEvent::ResponseTimeout) {
                tracing::warn!(dest = dest.as_str(), %error, "timeout refused by track");
            }
            self.emit(EngineEvent::RequestFailed {
                dest,
                track: request.track,
                error: ProtocolError::Timeout {
                    waited_ms: request.age_ms(now_ms),
                },
            });
            out.extend(self.cancel_message(dest, &request, now_ms));
        }
        out
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn machine(&self, dest: DestIndex, track: TrackIndex) -> &TrackMachine {
        &self.tracks[dest.index()][track.index()]
    }

    fn configured_tracks(&self, dest: DestIndex) -> heapless::Vec<TrackIndex, MAX_NUM_OF_TRACKS> {
        TrackIndex::ALL
            .into_iter()
            .filter(|track| self.registry.is_configured(dest, *track))
            .collect()
    }

    /// Plan a transition, record the authority it implies, then commit it.
    fn step(&mut self, dest: DestIndex, track: TrackIndex, event: TrackEvent) -> Result<Transition, ProtocolError> {
        let direction = self.arbiter.direction(dest, track);
        let transition = self.machine(dest, track).plan(&event, direction)?;
        self.arbiter.record_authority(dest, track, transition.to.authority())?;
        self.tracks[dest.index()][track.index()].commit(&transition, event);
        tracing::debug!(
            dest = dest.as_str(),
            track = track.as_str(),
            from = %transition.from,
            to = %transition.to,
            "track transition"
        );
        self.emit(EngineEvent::StateChanged { dest, track, transition });
        Ok(transition)
    }

    fn set_direction(&mut self, dest: DestIndex, track: TrackIndex, direction: TrafficDirection) {
        if self.arbiter.direction(dest, track) != direction {
            self.arbiter.set_direction(dest, track, direction);
            tracing::info!(dest = dest.as_str(), track = track.as_str(), %direction, "traffic direction");
            self.emit(EngineEvent::DirectionChanged { dest, track, direction });
        }
    }

    fn emit_directions(&mut self, dest: DestIndex) {
        for track in self.configured_tracks(dest) {
            let direction = self.arbiter.direction(dest, track);
            self.emit(EngineEvent::DirectionChanged { dest, track, direction });
        }
    }

    fn close_pending(&mut self, dest: DestIndex, resolution: Resolution) {
        if let Some(request) = self.pending.resolve(dest, resolution) {
            self.emit(EngineEvent::RequestClosed {
                dest,
                track: request.track,
                resolution,
            });
        }
    }

    fn emit(&mut self, event: EngineEvent) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        let _ = self.events.push_back(event);
    }

    fn next_session(&mut self) -> u32 {
        let session = self.next_session;
        self.next_session = self.next_session.checked_add(1).unwrap_or(1);
        session
    }

    fn timestamp(&self, now_ms: u64) -> u64 {
        self.node.epoch_secs.saturating_add(now_ms / 1000)
    }

    fn body(&self, dest: DestIndex, track: TrackIndex, now_ms: u64) -> MessageBody {
        MessageBody::new(self.timestamp(now_ms))
            .with_sender(&self.node.id, dest.as_str())
            .with_track(track)
    }

    fn ping(&self, value: StateValue, now_ms: u64) -> OutboundMessage {
        ProtocolMessage::new(
            Topic::ping(&self.scale, &self.node.id),
            MessageBody::new(self.timestamp(now_ms)).with_reported(value),
        )
    }

    /// Topic of the peer's port facing `dest`.
    fn peer_topic(&self, dest: DestIndex, order: Order) -> Result<Topic, ProtocolError> {
        let destination = self.registry.get(dest).ok_or(ProtocolError::UnknownDestination)?;
        let mut port = [0u8; 4];
        let port = destination.exit_port().encode_utf8(&mut port);
        Ok(Topic::tam(&self.scale, &destination.id, port, order))
    }

    fn request_message(
        &self,
        dest: DestIndex,
        track: TrackIndex,
        session_id: Option<u32>,
        desired: StateValue,
        train: Option<TrainId>,
        now_ms: u64,
    ) -> Result<OutboundMessage, ProtocolError> {
        let respond_to = Topic::tam(&self.scale, &self.node.id, dest.as_str(), Order::Response);
        let body = self
            .body(dest, track, now_ms)
            .with_session(session_id)
            .with_respond_to(&respond_to)
            .with_train(train)
            .with_desired(desired);
        Ok(ProtocolMessage::new(self.peer_topic(dest, Order::Request)?, body))
    }

    fn cancel_message(&self, dest: DestIndex, request: &PendingRequest, now_ms: u64) -> Option<OutboundMessage> {
        self.request_message(
            dest,
            request.track,
            Some(request.session_id),
            StateValue::Cancel,
            request.train().cloned(),
            now_ms,
        )
        .ok()
    }

    /// Answer `msg` on its `respond-to` topic, or the peer's response topic.
    fn reply(
        &self,
        dest: DestIndex,
        track: TrackIndex,
        msg: &ProtocolMessage,
        reported: StateValue,
        train: Option<TrainId>,
        now_ms: u64,
    ) -> Result<OutboundMessage, ProtocolError> {
        let topic = match msg.body.respond_to.as_deref().and_then(|t| Topic::parse(t).ok()) {
            Some(topic) => topic,
            None => self.peer_topic(dest, Order::Response)?,
        };
        let body = self
            .body(dest, track, now_ms)
            .with_session(msg.body.session_id)
            .with_train(train)
            .with_reported(reported);
        Ok(ProtocolMessage::new(topic, body))
    }
}

fn wire_direction(direction: TrafficDirection) -> StateValue {
    match direction {
        TrafficDirection::In => StateValue::In,
        _ => StateValue::Out,
    }
}
