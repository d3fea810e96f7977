//! Event simulator: wire hits, silicon space points and truth.
//!
//! Generates raw events with:
//! - Gaussian drift-length smearing and silicon resolution
//! - Hit inefficiency per wire layer and per silicon layer
//! - Uniform random background hits on random wires
//! - A common drift-time offset (event T0) with optional jitter
//!
//! Only the outgoing half-turn of each helix is simulated.

use crate::particle::ParticleSpec;
use detector_models::DetectorSetup;
use finder_core::detector::{DetectorGeometry, MagneticField};
use finder_core::{ChannelId, EventTruth, RawEvent, RawSpacePoint, RawWireHit, TruthParticle};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Noise and timing parameters of the simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimParams {
    /// Probability that a crossed wire layer records a hit
    pub wire_efficiency: f64,
    /// Probability that a crossed silicon layer records a space point
    pub silicon_efficiency: f64,
    /// Smear drift lengths and space points
    pub smear: bool,
    /// Fraction of all wires that fire as background
    pub background_rate: f64,
    /// Common drift-time offset of the event (ns)
    pub t0_offset: f64,
    /// Gaussian jitter of the offset between events (ns)
    pub t0_jitter: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            wire_efficiency: 0.98,
            silicon_efficiency: 0.99,
            smear: true,
            background_rate: 0.0,
            t0_offset: 0.0,
            t0_jitter: 0.0,
        }
    }
}

/// One simulated event: the raw input and its truth.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimEvent {
    pub raw: RawEvent,
    pub truth: EventTruth,
    /// Offset actually applied to the drift times (ns)
    pub t0: f64,
}

pub struct EventSimulator<'a, F> {
    setup: &'a DetectorSetup,
    field: &'a F,
    pub params: SimParams,
    rng: ChaCha8Rng,
}

/// Standard normal deviate (Box–Muller).
pub fn gauss<R: Rng>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

impl<'a, F: MagneticField> EventSimulator<'a, F> {
    pub fn new(setup: &'a DetectorSetup, field: &'a F, params: SimParams, seed: u64) -> Self {
        Self {
            setup,
            field,
            params,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn generate(&mut self, event_number: u64, particles: &[ParticleSpec]) -> SimEvent {
        let bz = self.field.bz([0.0, 0.0, 0.0]);
        let t0 = self.params.t0_offset + self.params.t0_jitter * gauss(&mut self.rng);

        let mut wire_hits: Vec<(RawWireHit, Option<u64>)> = Vec::new();
        let mut space_points: Vec<(RawSpacePoint, Option<u64>)> = Vec::new();
        let mut truth_particles = Vec::with_capacity(particles.len());

        for p in particles {
            let helix = p.helix(bz);
            truth_particles.push(TruthParticle {
                particle_id: p.id,
                params: helix,
            });
            self.silicon_hits(p.id, &helix, &mut space_points);
            self.wire_hits(p.id, &helix, t0, &mut wire_hits);
        }
        self.background(t0, &mut wire_hits);

        // readout order carries no information
        wire_hits.shuffle(&mut self.rng);
        space_points.shuffle(&mut self.rng);

        let (raw_wires, wire_truth): (Vec<_>, Vec<_>) = wire_hits.into_iter().unzip();
        let (raw_points, point_truth): (Vec<_>, Vec<_>) = space_points.into_iter().unzip();
        SimEvent {
            raw: RawEvent {
                event_number,
                wire_hits: raw_wires,
                space_points: raw_points,
            },
            truth: EventTruth {
                particles: truth_particles,
                wire_hits: wire_truth,
                space_points: point_truth,
            },
            t0,
        }
    }

    fn silicon_hits(
        &mut self,
        id: u64,
        helix: &finder_core::HelixParams,
        out: &mut Vec<(RawSpacePoint, Option<u64>)>,
    ) {
        for layer in self.setup.silicon_layers() {
            let Some(s) = helix.arc_length_at_radius(layer.radius) else {
                break;
            };
            let mut pos = helix.position(s);
            if pos[2].abs() > layer.half_length {
                continue;
            }
            if self.rng.gen::<f64>() > self.params.silicon_efficiency {
                continue;
            }
            if self.params.smear {
                let dphi = layer.sigma_rphi * gauss(&mut self.rng) / layer.radius;
                let phi = pos[1].atan2(pos[0]) + dphi;
                pos[0] = layer.radius * phi.cos();
                pos[1] = layer.radius * phi.sin();
                pos[2] += layer.sigma_z * gauss(&mut self.rng);
            }
            out.push((
                RawSpacePoint {
                    layer: layer.layer,
                    position: pos,
                },
                Some(id),
            ));
        }
    }

    fn wire_hits(
        &mut self,
        id: u64,
        helix: &finder_core::HelixParams,
        t0: f64,
        out: &mut Vec<(RawWireHit, Option<u64>)>,
    ) {
        let chamber = &self.setup.chamber;
        let half_length = chamber.params().half_length;
        for info in chamber.layers() {
            // the wire radius depends on z for stereo layers
            let mut s = match helix.arc_length_at_radius(info.radius) {
                Some(s) => s,
                None => break,
            };
            for _ in 0..3 {
                let r = chamber
                    .wire_radius_at_z(info.layer, helix.z_at(s))
                    .unwrap_or(info.radius);
                match helix.arc_length_at_radius(r) {
                    Some(next) => s = next,
                    None => break,
                }
            }
            let pos = helix.position(s);
            if pos[2].abs() > half_length {
                break;
            }
            if self.rng.gen::<f64>() > self.params.wire_efficiency {
                continue;
            }

            let phi = pos[1].atan2(pos[0]);
            let nearest = chamber
                .wires_near(info.layer, phi, pos[2])
                .into_iter()
                .filter_map(|c| {
                    let w = chamber.wire(c)?;
                    let d = helix.signed_distance(w.position_at_z(pos[2])).abs();
                    Some((c, w, d))
                })
                .min_by(|a, b| a.2.total_cmp(&b.2));
            let Some((channel, wire, dist)) = nearest else {
                continue;
            };
            if dist > wire.max_drift {
                continue;
            }
            let measured = if self.params.smear {
                (dist + wire.drift_sigma * gauss(&mut self.rng)).max(0.0)
            } else {
                dist
            };
            out.push((
                RawWireHit {
                    channel,
                    layer: info.layer,
                    drift_time: measured / wire.drift_velocity + t0,
                    adc: self.rng.gen_range(20..200),
                },
                Some(id),
            ));
        }
    }

    fn background(&mut self, t0: f64, out: &mut Vec<(RawWireHit, Option<u64>)>) {
        if self.params.background_rate <= 0.0 {
            return;
        }
        let layers = self.setup.chamber.layers();
        let total: usize = layers.iter().map(|l| l.wires as usize).sum();
        let n = (self.params.background_rate * total as f64).round() as usize;
        for _ in 0..n {
            let Some(info) = layers.choose(&mut self.rng) else {
                return;
            };
            let channel = ChannelId::new(info.layer, self.rng.gen_range(0..info.wires));
            let Some(wire) = self.setup.wire(channel) else {
                continue;
            };
            let d = self.rng.gen_range(0.0..wire.max_drift);
            out.push((
                RawWireHit {
                    channel,
                    layer: info.layer,
                    drift_time: d / wire.drift_velocity + t0,
                    adc: self.rng.gen_range(5..200),
                },
                None,
            ));
        }
    }
}
