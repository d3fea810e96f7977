//! Complete detector: drift chamber plus silicon layers.

use crate::chamber::{ChamberParams, DriftChamber};
use finder_core::detector::{DetectorGeometry, SiliconLayerGeometry, WireGeometry};
use finder_core::ChannelId;
use serde::{Deserialize, Serialize};

/// Four silicon layers between 3.9 and 13.5 cm, numbered 1..=4 outwards.
pub fn default_silicon_layers() -> Vec<SiliconLayerGeometry> {
    [(3.9, 12.0), (8.0, 20.0), (10.4, 25.0), (13.5, 30.0)]
        .iter()
        .enumerate()
        .map(|(i, &(radius, half_length))| SiliconLayerGeometry {
            layer: i as u16 + 1,
            radius,
            half_length,
            sigma_rphi: 0.002,
            sigma_z: 0.003,
            radiation_length: 0.006,
        })
        .collect()
}

/// Serializable description from which a [`DetectorSetup`] is built.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SetupParams {
    pub chamber: ChamberParams,
    pub silicon: Vec<SiliconLayerGeometry>,
}

impl Default for SetupParams {
    fn default() -> Self {
        Self {
            chamber: ChamberParams::default(),
            silicon: default_silicon_layers(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DetectorSetup {
    pub chamber: DriftChamber,
    silicon: Vec<SiliconLayerGeometry>,
}

impl DetectorSetup {
    pub fn new(params: SetupParams) -> Self {
        let mut silicon = params.silicon;
        silicon.sort_by(|a, b| a.radius.total_cmp(&b.radius));
        Self {
            chamber: DriftChamber::new(params.chamber),
            silicon,
        }
    }
}

impl Default for DetectorSetup {
    fn default() -> Self {
        Self::new(SetupParams::default())
    }
}

impl DetectorGeometry for DetectorSetup {
    fn wire(&self, channel: ChannelId) -> Option<WireGeometry> {
        self.chamber.wire(channel)
    }

    fn silicon_layers(&self) -> &[SiliconLayerGeometry] {
        &self.silicon
    }

    fn outer_radius(&self) -> f64 {
        self.chamber.outer_radius()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silicon_sorted_and_inside_chamber() {
        let mut params = SetupParams::default();
        params.silicon.reverse();
        let setup = DetectorSetup::new(params);
        let radii: Vec<f64> = setup.silicon_layers().iter().map(|l| l.radius).collect();
        assert!(radii.windows(2).all(|w| w[0] < w[1]));
        assert!(radii[3] < setup.chamber.layers()[0].radius);
        assert_eq!(setup.silicon_layer(2).map(|l| l.radius), Some(8.0));
    }

    #[test]
    fn drift_length_is_linear_in_time() {
        let setup = DetectorSetup::default();
        let w = setup.wire(ChannelId::new(0, 0)).unwrap();
        assert!((setup.drift_length(&w, 100.0) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn params_roundtrip_through_json() {
        let json = serde_json::to_string(&SetupParams::default()).unwrap();
        let back: SetupParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back.silicon.len(), 4);
        assert_eq!(back.chamber.superlayers.len(), 6);
    }
}
