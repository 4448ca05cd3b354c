//! Text keypad for desktop nodes.
//!
//! Turns short command lines into [`LocalCommand`]s for the engine. The
//! grammar mirrors the physical keypad: destination button, track, action.
//!
//! ```text
//! a left out        request out traffic toward A
//! a left in         request in traffic
//! a left train 447  ask A to accept train 447
//! a left accept     accept the train A offered
//! a left reject     reject it
//! a left arrived    report the train under authority has arrived
//! a cancel          withdraw the request to A
//! ```
//!
//! # Example
//!
//! ```rust
//! use tambox::engine::LocalRequest;
//! use tambox::registry::{DestIndex, TrackIndex};
//! use tambox::services::LocalCommand;
//!
//! let cmd: LocalCommand = "b right accept".parse().unwrap();
//! assert_eq!(cmd.dest, DestIndex::B);
//! assert_eq!(cmd.track, TrackIndex::Right);
//! assert_eq!(cmd.request, LocalRequest::Accept);
//! ```

use core::str::FromStr;

use crate::config::truncated;
use crate::direction::TrafficDirection;
use crate::engine::LocalRequest;
use crate::registry::{DestIndex, TrackIndex};

/// A keypad action aimed at one track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalCommand {
    /// Destination button
    pub dest: DestIndex,
    /// Track on that link
    pub track: TrackIndex,
    /// What to do
    pub request: LocalRequest,
}

impl LocalCommand {
    /// Create a command.
    pub fn new(dest: DestIndex, track: TrackIndex, request: LocalRequest) -> Self {
        Self { dest, track, request }
    }
}

/// Why a keypad line was not understood.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KeypadError {
    /// Nothing typed
    #[error("empty command")]
    Empty,
    /// First word is not a destination button
    #[error("unknown destination `{0}`")]
    Destination(String),
    /// Second word is not a track
    #[error("unknown track `{0}`")]
    Track(String),
    /// Unknown or incomplete action
    #[error("unknown action `{0}`")]
    Action(String),
}

fn parse_track(word: &str) -> Result<TrackIndex, KeypadError> {
    match word {
        "left" | "l" => Ok(TrackIndex::Left),
        "right" | "r" => Ok(TrackIndex::Right),
        other => Err(KeypadError::Track(other.into())),
    }
}

impl FromStr for LocalCommand {
    type Err = KeypadError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim().to_ascii_lowercase();
        let mut words = line.split_whitespace();
        let first = words.next().ok_or(KeypadError::Empty)?;
        let dest = DestIndex::from_text(first).ok_or_else(|| KeypadError::Destination(first.into()))?;

        let second = words.next().ok_or_else(|| KeypadError::Action(String::new()))?;
        // cancel has no track; the engine only keeps one request per destination
        if second == "cancel" {
            return Ok(Self::new(dest, TrackIndex::Left, LocalRequest::Cancel));
        }
        let track = parse_track(second)?;

        let action = words.next().unwrap_or_default();
        let request = match action {
            "out" => LocalRequest::Direction(TrafficDirection::Out),
            "in" => LocalRequest::Direction(TrafficDirection::In),
            "accept" => LocalRequest::Accept,
            "reject" => LocalRequest::Reject,
            "arrived" | "arrival" => LocalRequest::Arrival,
            "cancel" => LocalRequest::Cancel,
            "train" => match words.next() {
                Some(id) => LocalRequest::Departure(truncated(id)),
                None => return Err(KeypadError::Action(action.into())),
            },
            other => return Err(KeypadError::Action(other.into())),
        };
        Ok(Self::new(dest, track, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_direction_requests() {
        let cmd: LocalCommand = "A left out".parse().unwrap();
        assert_eq!(cmd, LocalCommand::new(DestIndex::A, TrackIndex::Left, LocalRequest::Direction(TrafficDirection::Out)));
        let cmd: LocalCommand = "c l in".parse().unwrap();
        assert_eq!(cmd.dest, DestIndex::C);
        assert_eq!(cmd.request, LocalRequest::Direction(TrafficDirection::In));
    }

    #[test]
    fn parses_departure_with_train() {
        let cmd: LocalCommand = "d right train 447".parse().unwrap();
        assert_eq!(cmd.track, TrackIndex::Right);
        assert_eq!(cmd.request, LocalRequest::Departure(truncated("447")));
    }

    #[test]
    fn cancel_needs_no_track() {
        let cmd: LocalCommand = "b cancel".parse().unwrap();
        assert_eq!(cmd.request, LocalRequest::Cancel);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!("".parse::<LocalCommand>(), Err(KeypadError::Empty));
        assert_eq!("x left out".parse::<LocalCommand>(), Err(KeypadError::Destination("x".into())));
        assert_eq!("a middle out".parse::<LocalCommand>(), Err(KeypadError::Track("middle".into())));
        assert_eq!("a left train".parse::<LocalCommand>(), Err(KeypadError::Action("train".into())));
        assert_eq!("a left fly".parse::<LocalCommand>(), Err(KeypadError::Action("fly".into())));
    }
}
