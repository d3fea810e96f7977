//! Fundamental types used across the entire workspace.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifier types: newtype wrappers so indices are never confused
// ---------------------------------------------------------------------------

/// Index of a prepared wire hit inside one event.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct HitId(pub usize);

/// Index of a prepared silicon space point inside one event.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct SpacePointId(pub usize);

/// Electronics channel of one sense wire: `layer << 16 | wire`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub u32);

impl ChannelId {
    pub fn new(layer: u16, wire: u16) -> Self {
        Self(((layer as u32) << 16) | wire as u32)
    }

    pub fn layer(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub fn wire(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

impl fmt::Display for HitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{}", self.0)
    }
}

impl fmt::Display for SpacePointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SP{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}W{}", self.layer(), self.wire())
    }
}

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// One digitized drift-chamber channel as delivered by the readout.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawWireHit {
    pub channel: ChannelId,
    /// Layer id reported by the readout (cross-checked against the channel)
    pub layer: u16,
    /// Measured drift time (ns), not yet corrected for the event T0
    pub drift_time: f64,
    /// Pulse height
    pub adc: u16,
}

/// One silicon space point (already clustered and combined by the readout).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawSpacePoint {
    pub layer: u16,
    pub position: [f64; 3],
}

/// All raw measurements of one event.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_number: u64,
    pub wire_hits: Vec<RawWireHit>,
    pub space_points: Vec<RawSpacePoint>,
}

// ---------------------------------------------------------------------------
// Prepared measurements
// ---------------------------------------------------------------------------

/// A drift-chamber hit in the uniform in-memory representation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireHit {
    pub id: HitId,
    /// Position of this hit in the raw input sequence
    pub raw_index: usize,
    pub channel: ChannelId,
    pub layer: u16,
    pub superlayer: u16,
    /// Wire end point at the backward end plate (x, y, z)
    pub backward: [f64; 3],
    /// Wire end point at the forward end plate (x, y, z)
    pub forward: [f64; 3],
    /// Wire position in the transverse plane at z = 0
    pub ref_pos: [f64; 2],
    pub drift_time: f64,
    /// Drift circle radius (cm)
    pub drift_length: f64,
    /// Drift circle uncertainty (1σ, cm)
    pub drift_sigma: f64,
    /// Drift velocity used for the drift-time conversion (cm/ns)
    pub drift_velocity: f64,
    pub axial: bool,
}

impl WireHit {
    /// Transverse distance of the reference position from the origin.
    pub fn ref_r(&self) -> f64 {
        self.ref_pos[0].hypot(self.ref_pos[1])
    }

    /// Azimuth of the reference position.
    pub fn ref_phi(&self) -> f64 {
        self.ref_pos[1].atan2(self.ref_pos[0])
    }

    /// Wire point at fraction `t` between backward (0) and forward (1) end.
    pub fn wire_point(&self, t: f64) -> [f64; 3] {
        [
            self.backward[0] + t * (self.forward[0] - self.backward[0]),
            self.backward[1] + t * (self.forward[1] - self.backward[1]),
            self.backward[2] + t * (self.forward[2] - self.backward[2]),
        ]
    }
}

/// A silicon measurement in the uniform in-memory representation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpacePoint {
    pub id: SpacePointId,
    pub raw_index: usize,
    pub layer: u16,
    pub position: [f64; 3],
    pub sigma_rphi: f64,
    pub sigma_z: f64,
}

impl SpacePoint {
    pub fn r(&self) -> f64 {
        self.position[0].hypot(self.position[1])
    }

    pub fn phi(&self) -> f64 {
        self.position[1].atan2(self.position[0])
    }
}

// ---------------------------------------------------------------------------
// Hit flags
// ---------------------------------------------------------------------------

/// Per-hit status written by one stage and read by the following ones.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitFlags {
    pub background: bool,
    pub taken: bool,
    pub masked: bool,
}

impl HitFlags {
    /// True if the hit may still be used by a finder stage.
    pub fn is_available(&self) -> bool {
        !(self.background || self.taken || self.masked)
    }
}

/// Flags of every prepared hit of one event, indexed by [`HitId`].
#[derive(Clone, Debug, Default)]
pub struct HitStatusTable {
    flags: Vec<HitFlags>,
}

impl HitStatusTable {
    pub fn new(n_hits: usize) -> Self {
        Self {
            flags: vec![HitFlags::default(); n_hits],
        }
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    pub fn get(&self, id: HitId) -> HitFlags {
        self.flags[id.0]
    }

    pub fn is_available(&self, id: HitId) -> bool {
        self.flags[id.0].is_available()
    }

    pub fn is_taken(&self, id: HitId) -> bool {
        self.flags[id.0].taken
    }

    pub fn set_taken(&mut self, id: HitId, taken: bool) {
        self.flags[id.0].taken = taken;
    }

    pub fn set_background(&mut self, id: HitId, background: bool) {
        self.flags[id.0].background = background;
    }

    pub fn set_masked(&mut self, id: HitId, masked: bool) {
        self.flags[id.0].masked = masked;
    }

    /// Mark every hit of `ids` as taken.
    pub fn take_all(&mut self, ids: &[HitId]) {
        for &id in ids {
            self.flags[id.0].taken = true;
        }
    }

    pub fn count_taken(&self) -> usize {
        self.flags.iter().filter(|f| f.taken).count()
    }
}

// ---------------------------------------------------------------------------
// Weight
// ---------------------------------------------------------------------------

/// Outcome of a filter: a finite weight or the reject sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Weight {
    Accepted(f64),
    Rejected,
}

impl Weight {
    /// Wrap a computed value; non-finite values are rejected.
    pub fn from_value(value: f64) -> Self {
        if value.is_finite() {
            Weight::Accepted(value)
        } else {
            Weight::Rejected
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Weight::Rejected)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Weight::Accepted(w) => Some(*w),
            Weight::Rejected => None,
        }
    }
}

/// Wrap an angle into (−π, π].
pub fn wrap_angle(angle: f64) -> f64 {
    let two_pi = std::f64::consts::TAU;
    let mut a = angle.rem_euclid(two_pi);
    if a > std::f64::consts::PI {
        a -= two_pi;
    }
    a
}
