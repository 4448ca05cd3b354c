//! Traffic direction and authority bookkeeping.
//!
//! The [`DirectionArbiter`] owns the traffic direction and the authority
//! record of every track. It decides direction requests and refuses any
//! authority grant that contradicts the recorded direction, so a track can
//! never hold outbound and inbound authority at once.
//!
//! Directions are always stored from the local node's point of view:
//! `Out` means trains leave this station toward the destination.

use core::cmp::Ordering;
use core::fmt;

use crate::config::{NodeId, Signature};
use crate::error::ProtocolError;
use crate::registry::{DestIndex, DestinationRegistry, Topology, TrackIndex, DEST_BUTTONS, MAX_NUM_OF_TRACKS};
use crate::track::TamState;

/// Traffic direction of a track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TrafficDirection {
    /// Trains leave toward the destination
    Out,
    /// Trains arrive from the destination
    In,
    /// Not negotiated yet
    #[default]
    Unknown,
    /// Destination lost, direction cannot be trusted
    Lost,
}

impl TrafficDirection {
    /// Wire / display text.
    pub const fn as_str(self) -> &'static str {
        match self {
            TrafficDirection::Out => "out",
            TrafficDirection::In => "in",
            TrafficDirection::Unknown => "unknown",
            TrafficDirection::Lost => "lost",
        }
    }

    /// The same direction seen from the other end of the link.
    pub const fn flip(self) -> Self {
        match self {
            TrafficDirection::Out => TrafficDirection::In,
            TrafficDirection::In => TrafficDirection::Out,
            other => other,
        }
    }

    /// Whether trains may run in this direction.
    pub const fn is_established(self) -> bool {
        matches!(self, TrafficDirection::Out | TrafficDirection::In)
    }
}

impl fmt::Display for TrafficDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authority currently held on a track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Authority {
    /// No train movement authorized
    #[default]
    None,
    /// Outbound movement authorized
    Out,
    /// Inbound movement authorized
    In,
}

impl Authority {
    /// Direction this authority needs, if any.
    pub const fn required_direction(self) -> Option<TrafficDirection> {
        match self {
            Authority::None => None,
            Authority::Out => Some(TrafficDirection::Out),
            Authority::In => Some(TrafficDirection::In),
        }
    }
}

/// Who is asking for a direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requester<'a> {
    /// The local operator
    Local,
    /// The node at the other end of the link
    Peer {
        /// Peer station signature
        signature: &'a str,
        /// Peer node id
        node_id: &'a str,
    },
}

/// A direction request to be decided.
#[derive(Clone, Copy, Debug)]
pub struct DirectionRequest<'a> {
    /// Destination
    pub dest: DestIndex,
    /// Track
    pub track: TrackIndex,
    /// Link topology of the destination
    pub topology: Topology,
    /// Current track state
    pub state: TamState,
    /// Requested direction, local point of view
    pub requested: TrafficDirection,
    /// Who asks
    pub requester: Requester<'a>,
    /// A local direction request for this track is awaiting its response
    pub local_pending: bool,
}

/// Outcome of [`DirectionArbiter::decide`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arbitration {
    /// Grant the direction
    Accept,
    /// Refuse it
    Reject(RejectReason),
}

/// Why a direction request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Only `in` and `out` can be requested
    NotADirection,
    /// Double track directions are fixed
    FixedDirection,
    /// A train holds authority on the track
    AuthorityHeld,
    /// The track is in the middle of another negotiation
    TrackBusy,
    /// Both ends asked at once and the local request has precedence
    TieBreakLost,
}

#[derive(Clone, Copy, Debug, Default)]
struct DirectionRecord {
    current: TrafficDirection,
    last_known: Option<TrafficDirection>,
    authority: Authority,
}

/// Owner of per-track direction and authority.
#[derive(Clone, Debug)]
pub struct DirectionArbiter {
    records: [[DirectionRecord; MAX_NUM_OF_TRACKS]; DEST_BUTTONS],
    fixed: [bool; DEST_BUTTONS],
    signature: Signature,
    node_id: NodeId,
}

impl DirectionArbiter {
    /// Build the records for `registry`. Double track links start with
    /// their fixed directions, everything else is `Unknown`.
    pub fn new(registry: &DestinationRegistry, signature: &Signature, node_id: &NodeId) -> Self {
        let mut arbiter = Self {
            records: Default::default(),
            fixed: [false; DEST_BUTTONS],
            signature: signature.clone(),
            node_id: node_id.clone(),
        };
        for (dest, destination) in registry.iter() {
            if destination.topology() == Topology::DoubleTrack {
                arbiter.fixed[dest.index()] = true;
                for track in TrackIndex::ALL {
                    let direction = Self::fixed_direction(track);
                    let record = arbiter.record_mut(dest, track);
                    record.current = direction;
                    record.last_known = Some(direction);
                }
            }
        }
        arbiter
    }

    /// Implicit direction of a double track: left runs out, right runs in.
    pub const fn fixed_direction(track: TrackIndex) -> TrafficDirection {
        match track {
            TrackIndex::Left => TrafficDirection::Out,
            TrackIndex::Right => TrafficDirection::In,
        }
    }

    /// Current direction of a track.
    pub fn direction(&self, dest: DestIndex, track: TrackIndex) -> TrafficDirection {
        self.record(dest, track).current
    }

    /// Last established direction, kept across a lost period.
    pub fn last_known(&self, dest: DestIndex, track: TrackIndex) -> Option<TrafficDirection> {
        self.record(dest, track).last_known
    }

    /// Authority currently recorded for a track.
    pub fn authority(&self, dest: DestIndex, track: TrackIndex) -> Authority {
        self.record(dest, track).authority
    }

    /// Decide a direction request.
    pub fn decide(&self, request: &DirectionRequest<'_>) -> Arbitration {
        if !request.requested.is_established() {
            return Arbitration::Reject(RejectReason::NotADirection);
        }
        if request.topology == Topology::DoubleTrack {
            return if request.requested == Self::fixed_direction(request.track) {
                Arbitration::Accept
            } else {
                Arbitration::Reject(RejectReason::FixedDirection)
            };
        }
        if self.authority(request.dest, request.track) != Authority::None {
            return Arbitration::Reject(RejectReason::AuthorityHeld);
        }
        match (request.state, request.requester) {
            (TamState::Idle, _) => Arbitration::Accept,
            (TamState::TrafficDirection, Requester::Peer { signature, node_id }) if request.local_pending => {
                if self.wins_tie_break(signature, node_id) {
                    Arbitration::Reject(RejectReason::TieBreakLost)
                } else {
                    Arbitration::Accept
                }
            }
            _ => Arbitration::Reject(RejectReason::TrackBusy),
        }
    }

    /// Whether the local node has precedence over a simultaneous peer request.
    ///
    /// The lexicographically smaller signature wins, then the smaller node
    /// id. Identical identities never win, so both ends reject.
    pub fn wins_tie_break(&self, peer_signature: &str, peer_node_id: &str) -> bool {
        match self.signature.as_str().cmp(peer_signature) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.node_id.as_str() < peer_node_id,
        }
    }

    /// Record a granted direction.
    pub fn set_direction(&mut self, dest: DestIndex, track: TrackIndex, direction: TrafficDirection) {
        let record = self.record_mut(dest, track);
        record.current = direction;
        if direction.is_established() {
            record.last_known = Some(direction);
        }
    }

    /// Check `authority` against the recorded direction without storing it.
    pub fn check_authority(&self, dest: DestIndex, track: TrackIndex, authority: Authority) -> Result<(), ProtocolError> {
        match authority.required_direction() {
            Some(required) => {
                let actual = self.direction(dest, track);
                if required == actual {
                    Ok(())
                } else {
                    Err(ProtocolError::DirectionMismatch { required, actual })
                }
            }
            None => Ok(()),
        }
    }

    /// Store the authority held by a track.
    pub fn record_authority(&mut self, dest: DestIndex, track: TrackIndex, authority: Authority) -> Result<(), ProtocolError> {
        self.check_authority(dest, track, authority)?;
        self.record_mut(dest, track).authority = authority;
        Ok(())
    }

    /// Destination lost: drop authority and mark every track `Lost`.
    pub fn mark_lost(&mut self, dest: DestIndex) {
        for record in self.records[dest.index()].iter_mut() {
            record.current = TrafficDirection::Lost;
            record.authority = Authority::None;
        }
    }

    /// Destination ready again. Double tracks get their fixed directions
    /// back, single tracks must renegotiate.
    pub fn mark_ready(&mut self, dest: DestIndex) {
        let fixed = self.fixed[dest.index()];
        for track in TrackIndex::ALL {
            let record = self.record_mut(dest, track);
            record.current = if fixed {
                Self::fixed_direction(track)
            } else {
                TrafficDirection::Unknown
            };
        }
    }

    fn record(&self, dest: DestIndex, track: TrackIndex) -> &DirectionRecord {
        &self.records[dest.index()][track.index()]
    }

    fn record_mut(&mut self, dest: DestIndex, track: TrackIndex) -> &mut DirectionRecord {
        &mut self.records[dest.index()][track.index()]
    }
}
