//! Peer liveness supervision.
//!
//! Tracks when each configured destination was last heard from, decides
//! when our own ready ping is due, and reports destinations that have been
//! silent for longer than `lost_factor * ping_interval_ms`.

use crate::config::TimingConfig;
use crate::registry::{DestIndex, DestinationRegistry, DEST_BUTTONS};

/// Destinations that changed liveness in one sweep.
pub type LivenessChanges = heapless::Vec<DestIndex, DEST_BUTTONS>;

#[derive(Clone, Copy, Debug, Default)]
struct PeerLiveness {
    monitored: bool,
    last_seen_ms: u64,
    lost: bool,
}

/// Liveness bookkeeping for all destinations.
#[derive(Clone, Debug)]
pub struct LivenessSupervisor {
    ping_interval_ms: u64,
    lost_after_ms: u64,
    next_ping_ms: Option<u64>,
    peers: [PeerLiveness; DEST_BUTTONS],
}

impl LivenessSupervisor {
    /// Supervise every configured destination of `registry`, counting
    /// silence from `now_ms`.
    pub fn new(registry: &DestinationRegistry, timing: &TimingConfig, now_ms: u64) -> Self {
        let mut peers = [PeerLiveness::default(); DEST_BUTTONS];
        for (dest, _) in registry.iter() {
            peers[dest.index()] = PeerLiveness {
                monitored: true,
                last_seen_ms: now_ms,
                lost: false,
            };
        }
        Self {
            ping_interval_ms: timing.ping_interval_ms,
            lost_after_ms: timing.lost_after_ms(),
            next_ping_ms: None,
            peers,
        }
    }

    /// Silence after which a destination is lost.
    pub fn lost_after_ms(&self) -> u64 {
        self.lost_after_ms
    }

    /// Record traffic from `dest`.
    pub fn observe(&mut self, dest: DestIndex, now_ms: u64) {
        let peer = &mut self.peers[dest.index()];
        peer.last_seen_ms = peer.last_seen_ms.max(now_ms);
    }

    /// Last time `dest` was heard from.
    pub fn last_seen(&self, dest: DestIndex) -> u64 {
        self.peers[dest.index()].last_seen_ms
    }

    /// Whether `dest` is currently lost.
    pub fn is_lost(&self, dest: DestIndex) -> bool {
        self.peers[dest.index()].lost
    }

    /// Whether our ready ping should go out now. The first call always
    /// returns true; later calls once per interval.
    pub fn ping_due(&mut self, now_ms: u64) -> bool {
        match self.next_ping_ms {
            Some(next) if now_ms < next => false,
            _ => {
                self.next_ping_ms = Some(now_ms.saturating_add(self.ping_interval_ms));
                true
            }
        }
    }

    /// Mark every destination silent past its deadline as lost and return
    /// the newly lost ones.
    pub fn sweep(&mut self, now_ms: u64) -> LivenessChanges {
        let mut lost = LivenessChanges::new();
        for dest in DestIndex::ALL {
            let peer = &mut self.peers[dest.index()];
            if peer.monitored && !peer.lost && now_ms.saturating_sub(peer.last_seen_ms) > self.lost_after_ms {
                peer.lost = true;
                tracing::debug!(dest = dest.as_str(), silent_ms = now_ms - peer.last_seen_ms, "destination silent");
                let _ = lost.push(dest);
            }
        }
        lost
    }

    /// Force `dest` lost. Returns true if it was not lost before.
    pub fn mark_lost(&mut self, dest: DestIndex) -> bool {
        let peer = &mut self.peers[dest.index()];
        let newly = peer.monitored && !peer.lost;
        peer.lost |= peer.monitored;
        newly
    }

    /// Record a ready broadcast. Returns true if `dest` was lost.
    pub fn mark_ready(&mut self, dest: DestIndex, now_ms: u64) -> bool {
        self.observe(dest, now_ms);
        let peer = &mut self.peers[dest.index()];
        let was_lost = peer.lost;
        peer.lost = false;
        was_lost
    }
}
