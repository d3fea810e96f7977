//! Drift-chamber wire layout.
//!
//! Layers are grouped in superlayers of equally spaced cylindrical layers.
//! Odd layers are staggered by half a cell. Stereo superlayers twist each
//! wire by ±Δφ between the end plates, Δφ = L·tan(α) / r for stereo angle
//! α, half length L and layer radius r.

use finder_core::detector::WireGeometry;
use finder_core::ChannelId;
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SuperlayerParams {
    pub n_layers: u16,
    /// Radius of the innermost layer (cm)
    pub inner_radius: f64,
    /// Radial distance between layers (cm)
    pub layer_spacing: f64,
    pub wires_per_layer: u16,
    /// Stereo angle (rad); 0 for axial superlayers
    pub stereo_angle: f64,
}

/// Physical configuration of the chamber.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChamberParams {
    pub superlayers: Vec<SuperlayerParams>,
    /// Half length of the wires (cm)
    pub half_length: f64,
    /// Drift velocity (cm/ns)
    pub drift_velocity: f64,
    /// Single-hit drift resolution (cm)
    pub drift_sigma: f64,
    /// Largest drift length as a fraction of the cell width
    pub max_drift_fraction: f64,
}

impl Default for ChamberParams {
    fn default() -> Self {
        // six superlayers of six layers, axial and stereo alternating
        let superlayers = (0..6)
            .map(|sl| SuperlayerParams {
                n_layers: 6,
                inner_radius: 20.0 + 8.0 * sl as f64,
                layer_spacing: 1.2,
                wires_per_layer: 96 + 32 * sl as u16,
                stereo_angle: match sl % 4 {
                    1 => 0.06,
                    3 => -0.06,
                    _ => 0.0,
                },
            })
            .collect();
        Self {
            superlayers,
            half_length: 100.0,
            drift_velocity: 0.004,
            drift_sigma: 0.015,
            max_drift_fraction: 0.6,
        }
    }
}

/// Derived description of one layer.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerInfo {
    pub layer: u16,
    pub superlayer: u16,
    pub radius: f64,
    pub wires: u16,
    /// φ of wire 0 at z = 0
    pub phi_offset: f64,
    /// φ twist of the forward end relative to z = 0 (rad)
    pub twist: f64,
}

impl LayerInfo {
    pub fn cell_width(&self) -> f64 {
        TAU * self.radius / self.wires as f64
    }

    pub fn is_axial(&self) -> bool {
        self.twist == 0.0
    }
}

#[derive(Clone, Debug)]
pub struct DriftChamber {
    params: ChamberParams,
    layers: Vec<LayerInfo>,
}

impl DriftChamber {
    pub fn new(params: ChamberParams) -> Self {
        let mut layers = Vec::new();
        for (sl, s) in params.superlayers.iter().enumerate() {
            for i in 0..s.n_layers {
                let radius = s.inner_radius + i as f64 * s.layer_spacing;
                let stagger = if i % 2 == 1 { 0.5 } else { 0.0 };
                layers.push(LayerInfo {
                    layer: layers.len() as u16,
                    superlayer: sl as u16,
                    radius,
                    wires: s.wires_per_layer,
                    phi_offset: TAU * stagger / s.wires_per_layer as f64,
                    twist: params.half_length * s.stereo_angle.tan() / radius,
                });
            }
        }
        Self { params, layers }
    }

    pub fn params(&self) -> &ChamberParams {
        &self.params
    }

    pub fn layers(&self) -> &[LayerInfo] {
        &self.layers
    }

    pub fn layer(&self, layer: u16) -> Option<&LayerInfo> {
        self.layers.get(layer as usize)
    }

    pub fn outer_radius(&self) -> f64 {
        self.layers.last().map_or(0.0, |l| l.radius + 0.5 * self.params.superlayers[l.superlayer as usize].layer_spacing)
    }

    pub fn wire(&self, channel: ChannelId) -> Option<WireGeometry> {
        let info = self.layer(channel.layer())?;
        if channel.wire() >= info.wires {
            return None;
        }
        let phi = info.phi_offset + TAU * channel.wire() as f64 / info.wires as f64;
        let (r, l) = (info.radius, self.params.half_length);
        Some(WireGeometry {
            layer: info.layer,
            superlayer: info.superlayer,
            wire: channel.wire(),
            backward: [r * (phi - info.twist).cos(), r * (phi - info.twist).sin(), -l],
            forward: [r * (phi + info.twist).cos(), r * (phi + info.twist).sin(), l],
            max_drift: self.params.max_drift_fraction * info.cell_width(),
            drift_sigma: self.params.drift_sigma,
            drift_velocity: self.params.drift_velocity,
        })
    }

    /// Azimuthal rotation of a wire at `z` relative to z = 0. Wires are
    /// straight chords, so the rotation is not linear in z.
    fn twist_at_z(&self, info: &LayerInfo, z: f64) -> f64 {
        (info.twist.tan() * z / self.params.half_length).atan()
    }

    /// Transverse distance of the wires of `layer` from the axis at `z`.
    pub fn wire_radius_at_z(&self, layer: u16, z: f64) -> Option<f64> {
        let info = self.layer(layer)?;
        Some(info.radius * info.twist.cos() / self.twist_at_z(info, z).cos())
    }

    /// Wires of `layer` whose cell may contain the point at azimuth `phi`
    /// and height `z`: the nearest wire and its two neighbours.
    pub fn wires_near(&self, layer: u16, phi: f64, z: f64) -> Vec<ChannelId> {
        let Some(info) = self.layer(layer) else {
            return Vec::new();
        };
        let n = info.wires as i64;
        let pos = (phi - info.phi_offset - self.twist_at_z(info, z)) * n as f64 / TAU;
        let nearest = pos.round() as i64;
        (nearest - 1..=nearest + 1)
            .map(|w| ChannelId::new(layer, w.rem_euclid(n) as u16))
            .collect()
    }
}

impl Default for DriftChamber {
    fn default() -> Self {
        Self::new(ChamberParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn default_layout() {
        let ch = DriftChamber::default();
        assert_eq!(ch.layers().len(), 36);
        assert_abs_diff_eq!(ch.layer(0).unwrap().radius, 20.0);
        assert_abs_diff_eq!(ch.layer(35).unwrap().radius, 66.0);
        assert!(ch.layer(0).unwrap().is_axial());
        assert!(!ch.layer(6).unwrap().is_axial());
        assert!(ch.outer_radius() > 66.0);
    }

    #[test]
    fn axial_wire_is_parallel_to_z() {
        let ch = DriftChamber::default();
        let w = ch.wire(ChannelId::new(2, 10)).unwrap();
        assert!(w.is_axial());
        assert_abs_diff_eq!(w.backward[0], w.forward[0], epsilon = 1e-12);
        assert_abs_diff_eq!(w.backward[0].hypot(w.backward[1]), 22.4, epsilon = 1e-9);
        assert!(ch.wire(ChannelId::new(2, 5000)).is_none());
        assert!(ch.wire(ChannelId::new(99, 0)).is_none());
    }

    #[test]
    fn stereo_wire_twist_matches_angle() {
        let ch = DriftChamber::default();
        let w = ch.wire(ChannelId::new(6, 0)).unwrap();
        assert!(!w.is_axial());
        // transverse displacement over the full length ≈ 2L·tan(α)
        let dx = w.forward[0] - w.backward[0];
        let dy = w.forward[1] - w.backward[1];
        assert_abs_diff_eq!(dx.hypot(dy), 200.0 * 0.06f64.tan(), epsilon = 0.2);
    }

    #[test]
    fn nearest_wire_contains_point() {
        let ch = DriftChamber::default();
        for layer in [0u16, 7, 20] {
            let info = ch.layer(layer).unwrap().clone();
            for (phi, z) in [(0.3, 0.0), (-2.9, 40.0), (3.1, -70.0)] {
                let r = ch.wire_radius_at_z(layer, z).unwrap();
                let p = [r * f64::cos(phi), r * f64::sin(phi)];
                let best = ch
                    .wires_near(layer, phi, z)
                    .into_iter()
                    .map(|c| {
                        let w = ch.wire(c).unwrap().position_at_z(z);
                        (w[0] - p[0]).hypot(w[1] - p[1])
                    })
                    .fold(f64::INFINITY, f64::min);
                assert!(best <= 0.5 * info.cell_width() + 1e-6, "layer {layer}: {best}");
                assert!(r <= info.radius + 1e-9);
            }
        }
    }
}
