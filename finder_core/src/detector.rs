//! Interfaces to the external collaborators: detector geometry, drift-time
//! conversion and magnetic field.
//!
//! Concrete implementations live in the `detector_models` crate; the core
//! only depends on these traits.

use crate::types::ChannelId;
use serde::{Deserialize, Serialize};

/// Conversion factor: pt [GeV] = `PT_FACTOR` · Bz [T] · R [cm].
pub const PT_FACTOR: f64 = 0.002_997_924_58;

/// Geometry of one sense wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireGeometry {
    pub layer: u16,
    pub superlayer: u16,
    pub wire: u16,
    pub backward: [f64; 3],
    pub forward: [f64; 3],
    /// Largest physically possible drift length in this cell (cm)
    pub max_drift: f64,
    /// Single-hit drift resolution (cm)
    pub drift_sigma: f64,
    /// Drift velocity (cm/ns)
    pub drift_velocity: f64,
}

impl WireGeometry {
    /// An axial wire has identical transverse end points.
    pub fn is_axial(&self) -> bool {
        (self.backward[0] - self.forward[0]).abs() < 1e-9
            && (self.backward[1] - self.forward[1]).abs() < 1e-9
    }

    /// Transverse wire position at `z` (linear interpolation along the wire).
    pub fn position_at_z(&self, z: f64) -> [f64; 2] {
        let dz = self.forward[2] - self.backward[2];
        let t = if dz.abs() > 0.0 {
            (z - self.backward[2]) / dz
        } else {
            0.5
        };
        [
            self.backward[0] + t * (self.forward[0] - self.backward[0]),
            self.backward[1] + t * (self.forward[1] - self.backward[1]),
        ]
    }
}

/// One cylindrical silicon layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiliconLayerGeometry {
    pub layer: u16,
    pub radius: f64,
    pub half_length: f64,
    pub sigma_rphi: f64,
    pub sigma_z: f64,
    /// Thickness in units of radiation length (x / X0)
    pub radiation_length: f64,
}

/// Geometry / position lookup supplied by the detector description.
pub trait DetectorGeometry {
    /// Wire geometry of `channel`, `None` if the channel is unknown.
    fn wire(&self, channel: ChannelId) -> Option<WireGeometry>;

    /// Drift length (cm) for a T0-corrected drift time (ns).
    fn drift_length(&self, wire: &WireGeometry, drift_time: f64) -> f64 {
        wire.drift_velocity * drift_time
    }

    /// Silicon layers ordered by increasing radius.
    fn silicon_layers(&self) -> &[SiliconLayerGeometry];

    /// Outer radius of the drift chamber (cm).
    fn outer_radius(&self) -> f64;

    fn silicon_layer(&self, layer: u16) -> Option<&SiliconLayerGeometry> {
        self.silicon_layers().iter().find(|l| l.layer == layer)
    }
}

/// Magnetic-field strength lookup.
pub trait MagneticField {
    /// Longitudinal field component (T) at `position` (cm).
    fn bz(&self, position: [f64; 3]) -> f64;
}

impl<T: DetectorGeometry + ?Sized> DetectorGeometry for &T {
    fn wire(&self, channel: ChannelId) -> Option<WireGeometry> {
        (**self).wire(channel)
    }

    fn drift_length(&self, wire: &WireGeometry, drift_time: f64) -> f64 {
        (**self).drift_length(wire, drift_time)
    }

    fn silicon_layers(&self) -> &[SiliconLayerGeometry] {
        (**self).silicon_layers()
    }

    fn outer_radius(&self) -> f64 {
        (**self).outer_radius()
    }
}

impl<T: MagneticField + ?Sized> MagneticField for &T {
    fn bz(&self, position: [f64; 3]) -> f64 {
        (**self).bz(position)
    }
}

/// Transverse momentum (GeV) of a track with curvature `omega` (1/cm).
pub fn pt_from_curvature(omega: f64, bz: f64) -> f64 {
    if omega.abs() < 1e-12 {
        f64::INFINITY
    } else {
        PT_FACTOR * bz.abs() / omega.abs()
    }
}

/// Curvature magnitude (1/cm) of a track with transverse momentum `pt` (GeV).
pub fn curvature_from_pt(pt: f64, bz: f64) -> f64 {
    PT_FACTOR * bz.abs() / pt
}
