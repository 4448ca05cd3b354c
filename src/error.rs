//! Protocol error taxonomy.
//!
//! Every rejected input is reported as a [`ProtocolError`] and leaves the
//! engine state untouched.

use core::fmt;

use crate::direction::TrafficDirection;
use crate::track::TamState;

/// Why a message could not be understood.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MalformedKind {
    /// Wrong number of topic segments, or an empty segment
    TopicSegments,
    /// Unknown message class (not `cmd` / `dt`)
    MessageClass,
    /// Unknown body type
    BodyType,
    /// Unknown or missing order (`req` / `res`)
    Order,
    /// A required field is absent
    MissingField(&'static str),
    /// A field holds a value that is out of range for its position
    Value(&'static str),
    /// The payload is not a valid message body
    Body,
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedKind::TopicSegments => f.write_str("bad topic segments"),
            MalformedKind::MessageClass => f.write_str("unknown message class"),
            MalformedKind::BodyType => f.write_str("unknown body type"),
            MalformedKind::Order => f.write_str("unknown order"),
            MalformedKind::MissingField(field) => write!(f, "missing field `{}`", field),
            MalformedKind::Value(field) => write!(f, "invalid value for `{}`", field),
            MalformedKind::Body => f.write_str("undecodable body"),
        }
    }
}

/// Errors returned by the protocol engine and the wire codec.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Topic or body could not be parsed.
    #[error("malformed message: {0}")]
    Malformed(MalformedKind),

    /// Destination or track not configured, or the sender does not match it.
    #[error("unknown destination")]
    UnknownDestination,

    /// The event is not allowed in the current track state.
    #[error("{event} not allowed in state {state}")]
    InvalidTransition {
        /// State the track was in
        state: TamState,
        /// Event that was refused
        event: &'static str,
    },

    /// Train movement against the established traffic direction.
    #[error("{required} traffic needed, direction is {actual}")]
    DirectionMismatch {
        /// Direction the request needs
        required: TrafficDirection,
        /// Direction currently held
        actual: TrafficDirection,
    },

    /// The destination already has a request in flight.
    #[error("a request to this destination is already pending")]
    Busy,

    /// The request is not possible on this link, e.g. a direction change
    /// on a double track.
    #[error("not supported by the track topology")]
    InvalidTopology,

    /// The destination went silent or announced itself lost.
    #[error("destination lost")]
    DestinationLost,

    /// No response arrived in time.
    #[error("no response within {waited_ms} ms")]
    Timeout {
        /// Time spent waiting
        waited_ms: u64,
    },
}
