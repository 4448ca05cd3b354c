//! Per-track authority state machine.
//!
//! Each configured track of each destination runs one [`TrackMachine`].
//! Transitions are computed with [`TrackMachine::plan`] and applied with
//! [`TrackMachine::commit`]; a refused event never touches the machine.
//!
//! ```text
//!            local dir req              accepted / rejected / timeout
//!   IDLE ─────────────────▶ TRAFDIR ─────────────────────────────────▶ IDLE
//!
//!            local departure            accepted                arrival
//!   IDLE ─────────────────▶ OUT_REQUEST ───────▶ (OUT_ACCEPT) ▶ OUT_TRAIN ───▶ IDLE
//!
//!            peer departure             local accept            arrival
//!   IDLE ─────────────────▶ IN_REQUEST ────────▶ (IN_ACCEPT) ─▶ IN_TRAIN ────▶ IDLE
//!
//!   any configured state ── liveness lost ──▶ LOST ── ready ──▶ IDLE
//! ```

use core::fmt;

use crate::config::TrainId;
use crate::direction::{Authority, TrafficDirection};
use crate::error::ProtocolError;

/// Authority state of one track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TamState {
    /// Track not configured
    #[default]
    NotUsed,
    /// No negotiation in progress
    Idle,
    /// Local direction request awaiting the peer
    TrafficDirection,
    /// Peer asked to send a train toward us
    InRequest,
    /// Inbound request accepted (transient)
    InAccept,
    /// Inbound train under our authority
    InTrain,
    /// We asked the peer to accept a train
    OutRequest,
    /// Outbound request accepted (transient)
    OutAccept,
    /// Outbound train under our authority
    OutTrain,
    /// Destination silent past its deadline
    Lost,
}

impl TamState {
    /// Display name as shown on the node.
    pub const fn as_str(self) -> &'static str {
        match self {
            TamState::NotUsed => "NOT_USED",
            TamState::Idle => "IDLE",
            TamState::TrafficDirection => "TRAFDIR",
            TamState::InRequest => "IN_REQUEST",
            TamState::InAccept => "IN_ACCEPT",
            TamState::InTrain => "IN_TRAIN",
            TamState::OutRequest => "OUT_REQUEST",
            TamState::OutAccept => "OUT_ACCEPT",
            TamState::OutTrain => "OUT_TRAIN",
            TamState::Lost => "LOST",
        }
    }

    /// Authority a track holds in this state.
    pub const fn authority(self) -> Authority {
        match self {
            TamState::OutAccept | TamState::OutTrain => Authority::Out,
            TamState::InAccept | TamState::InTrain => Authority::In,
            _ => Authority::None,
        }
    }

    /// Whether the track is part of an unfinished negotiation or movement.
    pub const fn is_busy(self) -> bool {
        !matches!(self, TamState::NotUsed | TamState::Idle | TamState::Lost)
    }
}

impl fmt::Display for TamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive a [`TrackMachine`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackEvent {
    /// Operator asked to set the traffic direction
    LocalDirectionRequest,
    /// Peer asked to set the traffic direction and was accepted
    InboundDirectionRequest,
    /// Peer accepted our request; carries the train of a departure request
    ResponseAccepted {
        /// Train of the accepted departure
        train: Option<TrainId>,
    },
    /// Peer rejected our request
    ResponseRejected,
    /// Peer canceled our request
    ResponseCanceled,
    /// No response within the configured time
    ResponseTimeout,
    /// Operator asked to send a train
    LocalDeparture,
    /// Peer asked to send a train toward us
    InboundDeparture,
    /// Operator accepted the inbound train
    LocalAccept {
        /// Train being accepted
        train: TrainId,
    },
    /// Operator rejected the inbound train
    LocalReject,
    /// Operator withdrew our request
    LocalCancel,
    /// Peer withdrew its request
    InboundCancel,
    /// Operator reported the train arrived
    LocalArrival,
    /// Peer reported the train arrived
    InboundArrival,
    /// Destination silent past its deadline, or announced lost
    LivenessLost,
    /// Lost destination announced ready
    Ready,
}

impl TrackEvent {
    /// Short name used in errors and logs.
    pub const fn name(&self) -> &'static str {
        match self {
            TrackEvent::LocalDirectionRequest => "local direction request",
            TrackEvent::InboundDirectionRequest => "inbound direction request",
            TrackEvent::ResponseAccepted { .. } => "accepted response",
            TrackEvent::ResponseRejected => "rejected response",
            TrackEvent::ResponseCanceled => "canceled response",
            TrackEvent::ResponseTimeout => "response timeout",
            TrackEvent::LocalDeparture => "local departure",
            TrackEvent::InboundDeparture => "inbound departure",
            TrackEvent::LocalAccept { .. } => "local accept",
            TrackEvent::LocalReject => "local reject",
            TrackEvent::LocalCancel => "local cancel",
            TrackEvent::InboundCancel => "inbound cancel",
            TrackEvent::LocalArrival => "local arrival",
            TrackEvent::InboundArrival => "inbound arrival",
            TrackEvent::LivenessLost => "liveness lost",
            TrackEvent::Ready => "ready",
        }
    }
}

/// A state change.
///
/// `via` holds the transient state passed through on the way, e.g.
/// `OUT_ACCEPT` between `OUT_REQUEST` and `OUT_TRAIN`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// State before the event
    pub from: TamState,
    /// Transient state passed through
    pub via: Option<TamState>,
    /// State after the event
    pub to: TamState,
}

/// State machine for one track of one destination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackMachine {
    state: TamState,
    train: Option<TrainId>,
}

impl TrackMachine {
    /// A machine for a configured track starts `IDLE`, otherwise `NOT_USED`.
    pub fn new(configured: bool) -> Self {
        Self {
            state: if configured { TamState::Idle } else { TamState::NotUsed },
            train: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> TamState {
        self.state
    }

    /// Train under authority, if any.
    pub fn train(&self) -> Option<&TrainId> {
        self.train.as_ref()
    }

    /// Compute the transition `event` causes, without applying it.
    ///
    /// `direction` is the traffic direction currently recorded for the track.
    pub fn plan(&self, event: &TrackEvent, direction: TrafficDirection) -> Result<Transition, ProtocolError> {
        use TamState as S;
        use TrackEvent as E;

        let (via, to) = match (self.state, event) {
            (S::NotUsed, _) => return Err(self.refuse(event)),

            (S::Lost, E::Ready) => (None, S::Idle),
            (S::Lost, _) => return Err(self.refuse(event)),
            (_, E::LivenessLost) => (None, S::Lost),

            (S::Idle, E::LocalDirectionRequest) => (None, S::TrafficDirection),
            (S::Idle, E::InboundDirectionRequest) => (Some(S::TrafficDirection), S::Idle),
            // local request lost the tie-break
            (S::TrafficDirection, E::InboundDirectionRequest) => (None, S::Idle),
            (
                S::TrafficDirection,
                E::ResponseAccepted { .. }
                | E::ResponseRejected
                | E::ResponseCanceled
                | E::ResponseTimeout
                | E::LocalCancel,
            ) => (None, S::Idle),

            (S::Idle, E::LocalDeparture) => {
                require(TrafficDirection::Out, direction)?;
                (None, S::OutRequest)
            }
            (S::OutRequest, E::ResponseAccepted { train: Some(_) }) => {
                require(TrafficDirection::Out, direction)?;
                (Some(S::OutAccept), S::OutTrain)
            }
            (
                S::OutRequest,
                E::ResponseRejected | E::ResponseCanceled | E::ResponseTimeout | E::LocalCancel,
            ) => (None, S::Idle),
            (S::OutTrain, E::LocalArrival | E::InboundArrival) => (None, S::Idle),

            (S::Idle, E::InboundDeparture) => {
                require(TrafficDirection::In, direction)?;
                (None, S::InRequest)
            }
            (S::InRequest, E::LocalAccept { .. }) => {
                require(TrafficDirection::In, direction)?;
                (Some(S::InAccept), S::InTrain)
            }
            (S::InRequest, E::LocalReject | E::InboundCancel) => (None, S::Idle),
            (S::InTrain, E::LocalArrival | E::InboundArrival) => (None, S::Idle),

            _ => return Err(self.refuse(event)),
        };

        Ok(Transition {
            from: self.state,
            via,
            to,
        })
    }

    /// Apply a transition previously returned by [`plan`](Self::plan) for `event`.
    pub fn commit(&mut self, transition: &Transition, event: TrackEvent) {
        self.state = transition.to;
        self.train = match (transition.to, event) {
            (TamState::OutTrain, TrackEvent::ResponseAccepted { train }) => train,
            (TamState::InTrain, TrackEvent::LocalAccept { train }) => Some(train),
            _ => None,
        };
    }

    /// Plan and commit in one step.
    pub fn apply(&mut self, event: TrackEvent, direction: TrafficDirection) -> Result<Transition, ProtocolError> {
        let transition = self.plan(&event, direction)?;
        self.commit(&transition, event);
        Ok(transition)
    }

    fn refuse(&self, event: &TrackEvent) -> ProtocolError {
        ProtocolError::InvalidTransition {
            state: self.state,
            event: event.name(),
        }
    }
}

fn require(required: TrafficDirection, actual: TrafficDirection) -> Result<(), ProtocolError> {
    if required == actual {
        Ok(())
    } else {
        Err(ProtocolError::DirectionMismatch { required, actual })
    }
}
