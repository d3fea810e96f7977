//! Raw-hit normalisation.
//!
//! Every raw wire hit is looked up in the detector geometry. Hits whose
//! channel is unknown, or whose readout layer disagrees with the channel,
//! are dropped and reported as geometry inconsistencies. Surviving hits get
//! a dense [`HitId`] in raw order; hits with an implausible drift length or
//! a small pulse height are kept but flagged as background.

use crate::config::PreparationConfig;
use crate::detector::DetectorGeometry;
use crate::error::RecoverableError;
use crate::types::{HitId, HitStatusTable, RawEvent, SpacePoint, SpacePointId, WireHit};
use tracing::debug;

/// Prepared measurements of one event and their fresh status table.
#[derive(Clone, Debug, Default)]
pub struct PreparedEvent {
    pub hits: Vec<WireHit>,
    pub space_points: Vec<SpacePoint>,
    pub status: HitStatusTable,
    pub dropped_hits: usize,
    pub dropped_space_points: usize,
}

impl PreparedEvent {
    pub fn n_background(&self) -> usize {
        self.hits
            .iter()
            .filter(|h| self.status.get(h.id).background)
            .count()
    }
}

pub struct HitPreparer<'a> {
    config: &'a PreparationConfig,
    event_t0: f64,
}

impl<'a> HitPreparer<'a> {
    pub fn new(config: &'a PreparationConfig, event_t0: f64) -> Self {
        Self { config, event_t0 }
    }

    pub fn apply(
        &self,
        raw: &RawEvent,
        geometry: &dyn DetectorGeometry,
        errors: &mut Vec<RecoverableError>,
    ) -> PreparedEvent {
        let mut out = PreparedEvent::default();
        let mut background = Vec::new();

        for (raw_index, rh) in raw.wire_hits.iter().enumerate() {
            let Some(wire) = geometry.wire(rh.channel) else {
                errors.push(RecoverableError::GeometryInconsistency {
                    channel: Some(rh.channel),
                    reason: "unknown channel".into(),
                });
                out.dropped_hits += 1;
                continue;
            };
            if wire.layer != rh.layer {
                errors.push(RecoverableError::GeometryInconsistency {
                    channel: Some(rh.channel),
                    reason: format!("readout layer {} but wire on layer {}", rh.layer, wire.layer),
                });
                out.dropped_hits += 1;
                continue;
            }

            let drift_time = rh.drift_time - self.event_t0;
            let drift_length = geometry.drift_length(&wire, drift_time);
            let id = HitId(out.hits.len());
            if !(0.0..=wire.max_drift).contains(&drift_length) || rh.adc < self.config.min_adc {
                background.push(id);
            }
            out.hits.push(WireHit {
                id,
                raw_index,
                channel: rh.channel,
                layer: wire.layer,
                superlayer: wire.superlayer,
                backward: wire.backward,
                forward: wire.forward,
                ref_pos: wire.position_at_z(0.0),
                drift_time,
                drift_length: if drift_length.is_finite() {
                    drift_length.clamp(0.0, wire.max_drift)
                } else {
                    0.0
                },
                drift_sigma: wire.drift_sigma,
                drift_velocity: wire.drift_velocity,
                axial: wire.is_axial(),
            });
        }

        for (raw_index, rsp) in raw.space_points.iter().enumerate() {
            let Some(layer) = geometry.silicon_layer(rsp.layer) else {
                errors.push(RecoverableError::GeometryInconsistency {
                    channel: None,
                    reason: format!("space point on unknown silicon layer {}", rsp.layer),
                });
                out.dropped_space_points += 1;
                continue;
            };
            let r = rsp.position[0].hypot(rsp.position[1]);
            if (r - layer.radius).abs() > self.config.radial_tolerance {
                errors.push(RecoverableError::GeometryInconsistency {
                    channel: None,
                    reason: format!(
                        "space point at r = {r:.3} off silicon layer {} (r = {})",
                        layer.layer, layer.radius
                    ),
                });
                out.dropped_space_points += 1;
                continue;
            }
            out.space_points.push(SpacePoint {
                id: SpacePointId(out.space_points.len()),
                raw_index,
                layer: layer.layer,
                position: rsp.position,
                sigma_rphi: layer.sigma_rphi,
                sigma_z: layer.sigma_z,
            });
        }

        out.status = HitStatusTable::new(out.hits.len());
        for id in background {
            out.status.set_background(id, true);
        }
        debug!(
            hits = out.hits.len(),
            space_points = out.space_points.len(),
            dropped = out.dropped_hits + out.dropped_space_points,
            background = out.n_background(),
            "hits prepared"
        );
        out
    }
}
