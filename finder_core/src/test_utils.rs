//! Shared fixtures for unit tests.

use crate::detector::{DetectorGeometry, MagneticField, SiliconLayerGeometry, WireGeometry};
use crate::facet::{Facet, RightLeft};
use crate::trajectory::HelixParams;
use crate::types::{ChannelId, HitId, WireHit};

/// Small chamber: layer `l` at radius 20 + l cm, six layers per superlayer,
/// odd superlayers stereo; four silicon layers inside.
pub struct TestGeometry {
    pub n_layers: u16,
    pub wires_per_layer: u16,
    pub silicon: Vec<SiliconLayerGeometry>,
}

impl Default for TestGeometry {
    fn default() -> Self {
        Self {
            n_layers: 24,
            wires_per_layer: 128,
            silicon: [3.0, 6.0, 9.0, 12.0]
                .iter()
                .enumerate()
                .map(|(i, &radius)| SiliconLayerGeometry {
                    layer: i as u16 + 1,
                    radius,
                    half_length: 30.0,
                    sigma_rphi: 0.002,
                    sigma_z: 0.004,
                    radiation_length: 0.005,
                })
                .collect(),
        }
    }
}

impl TestGeometry {
    pub fn layer_radius(layer: u16) -> f64 {
        20.0 + layer as f64
    }
}

impl DetectorGeometry for TestGeometry {
    fn wire(&self, channel: ChannelId) -> Option<WireGeometry> {
        let (layer, wire) = (channel.layer(), channel.wire());
        if layer >= self.n_layers || wire >= self.wires_per_layer {
            return None;
        }
        let r = Self::layer_radius(layer);
        let superlayer = layer / 6;
        let twist = if superlayer % 2 == 1 { 0.04 } else { 0.0 };
        let phi = std::f64::consts::TAU * (wire as f64 + 0.5 * (layer % 2) as f64)
            / self.wires_per_layer as f64;
        Some(WireGeometry {
            layer,
            superlayer,
            wire,
            backward: [r * (phi - twist).cos(), r * (phi - twist).sin(), -100.0],
            forward: [r * (phi + twist).cos(), r * (phi + twist).sin(), 100.0],
            max_drift: 1.0,
            drift_sigma: 0.02,
            drift_velocity: 0.004,
        })
    }

    fn silicon_layers(&self) -> &[SiliconLayerGeometry] {
        &self.silicon
    }

    fn outer_radius(&self) -> f64 {
        Self::layer_radius(self.n_layers)
    }
}

pub struct ConstantField(pub f64);

impl MagneticField for ConstantField {
    fn bz(&self, _position: [f64; 3]) -> f64 {
        self.0
    }
}

/// Axial hit with its wire at `pos`.
pub fn axial_hit(index: usize, layer: u16, pos: [f64; 2], drift: f64) -> WireHit {
    WireHit {
        id: HitId(index),
        raw_index: index,
        channel: ChannelId::new(layer, index as u16),
        layer,
        superlayer: layer / 6,
        backward: [pos[0], pos[1], -100.0],
        forward: [pos[0], pos[1], 100.0],
        ref_pos: pos,
        drift_time: drift / 0.004,
        drift_length: drift,
        drift_sigma: 0.02,
        drift_velocity: 0.004,
        axial: true,
    }
}

/// `n` axial hits on consecutive layers (radius 20 + i) whose wires sit at
/// alternating sides of `params`, `drift` away from it.
pub fn axial_hits_on(params: &HelixParams, n: usize, drift: f64) -> Vec<WireHit> {
    (0..n)
        .filter_map(|i| {
            let layer = i as u16;
            let s = params.arc_length_at_radius(TestGeometry::layer_radius(layer))?;
            let p = params.position_2d(s);
            let phi = params.phi_at(s);
            let side = if i % 2 == 0 { 1.0 } else { -1.0 };
            let wire = [p[0] - side * drift * phi.sin(), p[1] + side * drift * phi.cos()];
            Some(axial_hit(i, layer, wire, drift))
        })
        .enumerate()
        .map(|(k, mut h)| {
            h.id = HitId(k);
            h.raw_index = k;
            h
        })
        .collect()
}

/// A straight facet along +x with the given χ².
pub fn facet_with_chi2(chi2: f64) -> Facet {
    Facet {
        hits: [HitId(0), HitId(1), HitId(2)],
        ranks: [0, 1, 2],
        right_left: [RightLeft::Left, RightLeft::Right, RightLeft::Left],
        tangent: [1.0, 0.0],
        start: [20.0, 0.0],
        end: [22.0, 0.0],
        curvature: 0.0,
        chi2,
        weight: 3.0,
    }
}
