//! Outstanding local requests, one slot per destination.
//!
//! A destination can have at most one locally issued request awaiting its
//! response. The queue enforces that and hands expired requests back to the
//! engine on [`PendingQueue::timeout_sweep`].
//!
//! ```rust
//! use tambox::pending::{PendingQueue, PendingRequest};
//! use tambox::registry::{DestIndex, TrackIndex};
//! use tambox::direction::TrafficDirection;
//! use tambox::error::ProtocolError;
//!
//! let mut queue = PendingQueue::new();
//! let req = PendingRequest::direction(TrackIndex::Left, TrafficDirection::Out, 1, 0);
//! assert!(queue.enqueue(DestIndex::A, req.clone()).is_ok());
//!
//! // second request to the same destination is refused
//! assert_eq!(queue.enqueue(DestIndex::A, req), Err(ProtocolError::Busy));
//!
//! // nothing has expired yet
//! assert!(queue.timeout_sweep(30_000, 60_000).is_empty());
//! assert_eq!(queue.timeout_sweep(60_000, 60_000).len(), 1);
//! ```

use crate::config::TrainId;
use crate::direction::TrafficDirection;
use crate::error::ProtocolError;
use crate::registry::{DestIndex, TrackIndex, DEST_BUTTONS};

/// What a pending request asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PendingOrder {
    /// Traffic direction, local point of view
    Direction(TrafficDirection),
    /// Permission to send a train
    Departure(TrainId),
}

/// A request awaiting its response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRequest {
    /// Track the request is for
    pub track: TrackIndex,
    /// What was asked
    pub order: PendingOrder,
    /// Session id the response must echo
    pub session_id: u32,
    /// When the request was sent
    pub issued_ms: u64,
}

impl PendingRequest {
    /// A traffic direction request.
    pub fn direction(track: TrackIndex, direction: TrafficDirection, session_id: u32, now_ms: u64) -> Self {
        Self {
            track,
            order: PendingOrder::Direction(direction),
            session_id,
            issued_ms: now_ms,
        }
    }

    /// A departure request for `train`.
    pub fn departure(track: TrackIndex, train: TrainId, session_id: u32, now_ms: u64) -> Self {
        Self {
            track,
            order: PendingOrder::Departure(train),
            session_id,
            issued_ms: now_ms,
        }
    }

    /// Train of a departure request.
    pub fn train(&self) -> Option<&TrainId> {
        match &self.order {
            PendingOrder::Departure(train) => Some(train),
            PendingOrder::Direction(_) => None,
        }
    }

    /// Requested direction of a direction request.
    pub fn direction_requested(&self) -> Option<TrafficDirection> {
        match self.order {
            PendingOrder::Direction(direction) => Some(direction),
            PendingOrder::Departure(_) => None,
        }
    }

    /// Time since the request was sent.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.issued_ms)
    }

    /// Whether the request waited `timeout_ms` or longer.
    pub fn is_expired(&self, now_ms: u64, timeout_ms: u64) -> bool {
        self.age_ms(now_ms) >= timeout_ms
    }
}

/// How a pending request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Peer accepted
    Accepted,
    /// Peer rejected
    Rejected,
    /// Peer canceled
    Canceled,
    /// Operator withdrew it
    Withdrawn,
    /// A peer request won the tie-break
    Superseded,
    /// No response in time
    TimedOut,
    /// Destination lost
    Lost,
}

impl Resolution {
    /// Whether the request failed rather than got an answer.
    pub const fn is_failure(self) -> bool {
        matches!(self, Resolution::TimedOut | Resolution::Lost)
    }
}

/// Expired requests returned by one sweep.
pub type Expired = heapless::Vec<(DestIndex, PendingRequest), DEST_BUTTONS>;

/// One-slot-per-destination request queue.
#[derive(Clone, Debug, Default)]
pub struct PendingQueue {
    slots: [Option<PendingRequest>; DEST_BUTTONS],
}

impl PendingQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a request; fails with [`ProtocolError::Busy`] if the
    /// destination already has one.
    pub fn enqueue(&mut self, dest: DestIndex, request: PendingRequest) -> Result<(), ProtocolError> {
        let slot = &mut self.slots[dest.index()];
        if slot.is_some() {
            return Err(ProtocolError::Busy);
        }
        tracing::trace!(dest = dest.as_str(), session = request.session_id, "request pending");
        *slot = Some(request);
        Ok(())
    }

    /// Request awaiting a response from `dest`.
    pub fn get(&self, dest: DestIndex) -> Option<&PendingRequest> {
        self.slots[dest.index()].as_ref()
    }

    /// Whether `dest` has a request in flight.
    pub fn is_active(&self, dest: DestIndex) -> bool {
        self.slots[dest.index()].is_some()
    }

    /// Close the request for `dest` and return it.
    pub fn resolve(&mut self, dest: DestIndex, resolution: Resolution) -> Option<PendingRequest> {
        let request = self.slots[dest.index()].take()?;
        tracing::trace!(dest = dest.as_str(), session = request.session_id, ?resolution, "request closed");
        Some(request)
    }

    /// Withdraw the request for `dest`. Idempotent: an empty slot is a no-op.
    pub fn cancel(&mut self, dest: DestIndex) -> Option<PendingRequest> {
        self.resolve(dest, Resolution::Withdrawn)
    }

    /// Remove and return every request that waited `timeout_ms` or longer.
    pub fn timeout_sweep(&mut self, now_ms: u64, timeout_ms: u64) -> Expired {
        let mut expired = Expired::new();
        for dest in DestIndex::ALL {
            let is_expired = self.slots[dest.index()]
                .as_ref()
                .is_some_and(|request| request.is_expired(now_ms, timeout_ms));
            if is_expired {
                if let Some(request) = self.resolve(dest, Resolution::TimedOut) {
                    // one slot per destination, capacity always suffices
                    let _ = expired.push((dest, request));
                }
            }
        }
        expired
    }

    /// Number of requests in flight.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if no request is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::truncated;

    fn direction(session: u32, now: u64) -> PendingRequest {
        PendingRequest::direction(TrackIndex::Left, TrafficDirection::Out, session, now)
    }

    #[test]
    fn queue_new_is_empty() {
        let queue = PendingQueue::new();
        assert!(queue.is_empty());
        assert!(!queue.is_active(DestIndex::A));
    }

    #[test]
    fn queue_one_slot_per_destination() {
        let mut queue = PendingQueue::new();
        assert!(queue.enqueue(DestIndex::A, direction(1, 0)).is_ok());
        assert_eq!(queue.enqueue(DestIndex::A, direction(2, 0)), Err(ProtocolError::Busy));
        assert!(queue.enqueue(DestIndex::B, direction(3, 0)).is_ok());
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get(DestIndex::A).map(|r| r.session_id), Some(1));
    }

    #[test]
    fn queue_resolve_frees_slot() {
        let mut queue = PendingQueue::new();
        queue.enqueue(DestIndex::C, direction(1, 0)).unwrap();
        let closed = queue.resolve(DestIndex::C, Resolution::Accepted).unwrap();
        assert_eq!(closed.session_id, 1);
        assert!(!queue.is_active(DestIndex::C));
        assert!(queue.enqueue(DestIndex::C, direction(2, 0)).is_ok());
    }

    #[test]
    fn queue_cancel_is_idempotent() {
        let mut queue = PendingQueue::new();
        queue.enqueue(DestIndex::D, direction(1, 0)).unwrap();
        assert!(queue.cancel(DestIndex::D).is_some());
        assert!(queue.cancel(DestIndex::D).is_none());
        assert!(queue.cancel(DestIndex::A).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn queue_sweep_returns_only_expired() {
        let mut queue = PendingQueue::new();
        queue.enqueue(DestIndex::A, direction(1, 0)).unwrap();
        queue.enqueue(DestIndex::B, direction(2, 40_000)).unwrap();

        let expired = queue.timeout_sweep(60_000, 60_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, DestIndex::A);
        assert!(queue.is_active(DestIndex::B));
        assert!(!queue.is_active(DestIndex::A));

        assert!(queue.timeout_sweep(60_000, 60_000).is_empty());
    }

    #[test]
    fn departure_carries_train() {
        let req = PendingRequest::departure(TrackIndex::Right, truncated("447"), 9, 100);
        assert_eq!(req.train().map(|t| t.as_str()), Some("447"));
        assert_eq!(req.direction_requested(), None);
        assert_eq!(req.age_ms(50), 0);
        assert_eq!(req.age_ms(350), 250);
    }

    #[test]
    fn failure_resolutions() {
        assert!(Resolution::TimedOut.is_failure());
        assert!(Resolution::Lost.is_failure());
        assert!(!Resolution::Rejected.is_failure());
    }
}
