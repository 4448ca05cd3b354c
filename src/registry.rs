//! Destination registry: the static table of neighbour stations.
//!
//! The registry is built once at startup from the provisioning data and
//! handed to the engine as an immutable snapshot. Each of the four
//! destination buttons (`A`..`D`) maps to at most one neighbour station,
//! connected by a single or a double track. Split exits, where the two
//! tracks of one button lead to different stations, are not supported and
//! are rejected when the table is loaded.
//!
//! # Example
//!
//! ```rust
//! use tambox::registry::{DestIndex, Destination, DestinationRegistry, StationType, TrackIndex};
//!
//! let registry = DestinationRegistry::new()
//!     .with_destination(DestIndex::A, Destination::single("tambox-2", "Hgl", "Hagalund", 'b'))
//!     .with_destination(DestIndex::B, Destination::double("tambox-3", "Sst", "Sundstorp", 'a'));
//!
//! assert!(registry.is_configured(DestIndex::A, TrackIndex::Left));
//! assert!(!registry.is_configured(DestIndex::A, TrackIndex::Right));
//! assert!(registry.is_configured(DestIndex::B, TrackIndex::Right));
//! assert_eq!(registry.find_by_id("tambox-3").collect::<Vec<_>>(), [DestIndex::B]);
//! ```

use crate::config::{truncated, NodeId, Signature, StationName};
use crate::error::ProtocolError;

/// Number of destination buttons on the box (A-D).
pub const DEST_BUTTONS: usize = 4;

/// Maximum number of tracks between two stations.
pub const MAX_NUM_OF_TRACKS: usize = 2;

/// One of the four destination slots, also the local port id on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DestIndex {
    /// Destination A
    A = 0,
    /// Destination B
    B = 1,
    /// Destination C
    C = 2,
    /// Destination D
    D = 3,
}

impl DestIndex {
    /// All destination slots in button order.
    pub const ALL: [DestIndex; DEST_BUTTONS] = [DestIndex::A, DestIndex::B, DestIndex::C, DestIndex::D];

    /// Slot position in fixed-size tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Slot for a table position.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Port id used in topics (`"a"`..`"d"`).
    pub const fn as_str(self) -> &'static str {
        match self {
            DestIndex::A => "a",
            DestIndex::B => "b",
            DestIndex::C => "c",
            DestIndex::D => "d",
        }
    }

    /// Parse a port id, case-insensitive.
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim() {
            "a" | "A" => Some(DestIndex::A),
            "b" | "B" => Some(DestIndex::B),
            "c" | "C" => Some(DestIndex::C),
            "d" | "D" => Some(DestIndex::D),
            _ => None,
        }
    }
}

/// Physical track of a link. `Left` doubles as the single track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum TrackIndex {
    /// Left track, or the only track of a single-track link
    Left = 0,
    /// Right track of a double-track link
    Right = 1,
}

impl TrackIndex {
    /// Both tracks in table order.
    pub const ALL: [TrackIndex; MAX_NUM_OF_TRACKS] = [TrackIndex::Left, TrackIndex::Right];

    /// Track position in fixed-size tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Body value (`"left"` / `"right"`).
    pub const fn as_str(self) -> &'static str {
        match self {
            TrackIndex::Left => "left",
            TrackIndex::Right => "right",
        }
    }

    /// The same physical track seen from the other end of a double-track link.
    pub const fn mirrored(self) -> Self {
        match self {
            TrackIndex::Left => TrackIndex::Right,
            TrackIndex::Right => TrackIndex::Left,
        }
    }
}

/// Station layout at the exit toward a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum StationType {
    /// Slot not in use
    #[default]
    None,
    /// Single track
    Single,
    /// Double track split over two destinations (unsupported)
    Split,
    /// Left track of a split exit (unsupported)
    Left,
    /// Right track of a split exit (unsupported)
    Right,
    /// Double track
    Double,
}

impl StationType {
    /// Configuration value for this type.
    pub const fn as_str(self) -> &'static str {
        match self {
            StationType::None => "none",
            StationType::Single => "single",
            StationType::Split => "split",
            StationType::Left => "left",
            StationType::Right => "right",
            StationType::Double => "double",
        }
    }

    /// True for layouts the engine can run. Split exits need a second
    /// neighbour per button, which the registry does not model.
    pub const fn is_supported(self) -> bool {
        !matches!(self, StationType::Split | StationType::Left | StationType::Right)
    }

    /// Parse a configuration value. `"-"` means not used.
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim() {
            "none" | "-" => Some(StationType::None),
            "single" => Some(StationType::Single),
            "split" => Some(StationType::Split),
            "left" => Some(StationType::Left),
            "right" => Some(StationType::Right),
            "double" => Some(StationType::Double),
            _ => None,
        }
    }
}

/// Whether a link negotiates its direction or has it fixed per track.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Topology {
    /// One track, direction negotiated
    SingleTrack,
    /// Two tracks, each with an implicit direction
    DoubleTrack,
}

/// A neighbour station reachable from one destination button.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Destination {
    /// Node id of the neighbour
    pub id: NodeId,
    /// Station signature of the neighbour
    pub signature: Signature,
    /// Station name
    pub name: StationName,
    /// Tracks on this link (1 or 2)
    pub tracks: u8,
    /// Port designator at the neighbour's end of the link
    pub exit: char,
    /// Station layout at this exit
    #[cfg_attr(feature = "serde", serde(rename = "type"))]
    pub station_type: StationType,
    /// Total number of tracks at this exit
    #[cfg_attr(feature = "serde", serde(rename = "totTracks"))]
    pub total_tracks: u8,
}

impl Destination {
    /// A single-track neighbour.
    pub fn single(id: &str, signature: &str, name: &str, exit: char) -> Self {
        Self {
            id: truncated(id),
            signature: truncated(signature),
            name: truncated(name),
            tracks: 1,
            exit,
            station_type: StationType::Single,
            total_tracks: 1,
        }
    }

    /// A double-track neighbour.
    pub fn double(id: &str, signature: &str, name: &str, exit: char) -> Self {
        Self {
            id: truncated(id),
            signature: truncated(signature),
            name: truncated(name),
            tracks: 2,
            exit,
            station_type: StationType::Double,
            total_tracks: 2,
        }
    }

    /// True when the slot points at a real station of a supported layout.
    pub fn is_used(&self) -> bool {
        self.station_type != StationType::None && self.station_type.is_supported() && !self.id.is_empty()
    }

    /// Number of usable tracks, clamped to 1..=2.
    pub fn track_count(&self) -> usize {
        (self.tracks as usize).clamp(1, MAX_NUM_OF_TRACKS)
    }

    /// Link topology derived from the track count.
    pub fn topology(&self) -> Topology {
        if self.track_count() == MAX_NUM_OF_TRACKS {
            Topology::DoubleTrack
        } else {
            Topology::SingleTrack
        }
    }

    /// True if `track` exists on this link.
    pub fn has_track(&self, track: TrackIndex) -> bool {
        self.is_used() && track.index() < self.track_count()
    }

    /// Lower-case port id of the neighbour's exit for topics.
    pub fn exit_port(&self) -> char {
        self.exit.to_ascii_lowercase()
    }
}

/// Immutable table of destinations, indexed by button.
///
/// Deserializing checks the table with [`validate`](Self::validate).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RegistrySlots"))]
pub struct DestinationRegistry {
    slots: [Option<Destination>; DEST_BUTTONS],
}

/// Slot table as it appears in the provisioning data, before validation.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RegistrySlots {
    slots: [Option<Destination>; DEST_BUTTONS],
}

#[cfg(feature = "serde")]
impl TryFrom<RegistrySlots> for DestinationRegistry {
    type Error = ProtocolError;

    fn try_from(raw: RegistrySlots) -> Result<Self, ProtocolError> {
        let registry = Self { slots: raw.slots };
        registry.validate()?;
        Ok(registry)
    }
}

impl DestinationRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a destination in a slot.
    pub fn with_destination(mut self, slot: DestIndex, destination: Destination) -> Self {
        self.slots[slot.index()] = Some(destination);
        self
    }

    /// Check that every configured slot uses a supported layout.
    ///
    /// Slots with a split exit type fail with
    /// [`ProtocolError::InvalidTopology`].
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let unsupported = self
            .slots
            .iter()
            .flatten()
            .any(|d| !d.station_type.is_supported());
        if unsupported {
            return Err(ProtocolError::InvalidTopology);
        }
        Ok(())
    }

    /// The destination behind a button, if any.
    pub fn get(&self, slot: DestIndex) -> Option<&Destination> {
        self.slots[slot.index()].as_ref().filter(|d| d.is_used())
    }

    /// True if the track exists for that destination.
    pub fn is_configured(&self, slot: DestIndex, track: TrackIndex) -> bool {
        self.get(slot).is_some_and(|d| d.has_track(track))
    }

    /// Every slot leading to node `id`. One neighbour can sit behind
    /// several buttons when it is reached through more than one exit.
    pub fn find_by_id<'a>(&'a self, id: &'a str) -> impl Iterator<Item = DestIndex> + 'a {
        self.iter().filter(move |(_, d)| d.id.as_str() == id).map(|(i, _)| i)
    }

    /// Iterate configured destinations.
    pub fn iter(&self) -> impl Iterator<Item = (DestIndex, &Destination)> {
        DestIndex::ALL
            .into_iter()
            .filter_map(move |slot| self.get(slot).map(|d| (slot, d)))
    }

    /// Number of configured destinations.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// True if no destination is configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
