//! Scenario definitions.
//!
//! Each scenario is a named configuration of particles per event and
//! detector noise. All scenarios are deterministic given the same seed.

use crate::event_sim::{EventSimulator, SimEvent, SimParams};
use crate::particle::{ParticleRanges, ParticleSpec};
use detector_models::{DetectorSetup, UniformField};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Which pre-defined scenario to load.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
pub enum ScenarioKind {
    /// One stiff track per event, no noise
    SingleTrack,
    /// Two well separated tracks per event
    TwoTracks,
    /// Ten tracks per event, moderate background
    Multi,
    /// Thirty tracks per event, heavy background
    Dense,
    /// Low-momentum tracks that curl inside the chamber
    Curlers,
    /// Ten tracks with a 12 ns event-T0 offset
    T0Offset,
}

/// A fully configured simulation scenario.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub seed: u64,
    pub n_events: usize,
    pub field: UniformField,
    pub sim: SimParams,
    pub particles: ParticleSource,
}

/// How the particles of each event are chosen.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ParticleSource {
    /// The same particles in every event
    Fixed(Vec<ParticleSpec>),
    /// `count` particles drawn from `ranges`
    Random { count: usize, ranges: ParticleRanges },
}

impl Scenario {
    /// Build the named scenario. Uses `seed` for repeatability.
    pub fn build(kind: ScenarioKind, seed: u64) -> Self {
        match kind {
            ScenarioKind::SingleTrack => Self::single_track(seed),
            ScenarioKind::TwoTracks => Self::two_tracks(seed),
            ScenarioKind::Multi => Self::random("multi", seed, 10, 0.01, ParticleRanges::default()),
            ScenarioKind::Dense => Self::random("dense", seed, 30, 0.04, ParticleRanges::default()),
            ScenarioKind::Curlers => Self::random(
                "curlers",
                seed,
                6,
                0.0,
                ParticleRanges {
                    pt: (0.08, 0.25),
                    ..Default::default()
                },
            ),
            ScenarioKind::T0Offset => {
                let mut s = Self::random("t0-offset", seed, 10, 0.0, ParticleRanges::default());
                s.sim.t0_offset = 12.0;
                s.sim.t0_jitter = 1.0;
                s
            }
        }
    }

    fn single_track(seed: u64) -> Self {
        Self {
            name: "single-track".into(),
            seed,
            n_events: 20,
            field: UniformField::default(),
            sim: SimParams {
                smear: false,
                wire_efficiency: 1.0,
                silicon_efficiency: 1.0,
                ..Default::default()
            },
            particles: ParticleSource::Fixed(vec![spec(0, 1.5, 0.8, 1, 0.3)]),
        }
    }

    fn two_tracks(seed: u64) -> Self {
        Self {
            name: "two-tracks".into(),
            seed,
            n_events: 20,
            field: UniformField::default(),
            sim: SimParams::default(),
            particles: ParticleSource::Fixed(vec![spec(0, 1.2, 0.5, 1, 0.2), spec(1, 0.9, -2.4, -1, -0.3)]),
        }
    }

    fn random(name: &str, seed: u64, count: usize, background_rate: f64, ranges: ParticleRanges) -> Self {
        Self {
            name: name.into(),
            seed,
            n_events: 20,
            field: UniformField::default(),
            sim: SimParams {
                background_rate,
                ..Default::default()
            },
            particles: ParticleSource::Random { count, ranges },
        }
    }

    /// Generate all events of the scenario on `setup`.
    pub fn events(&self, setup: &DetectorSetup) -> Vec<SimEvent> {
        let mut particle_rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut sim = EventSimulator::new(setup, &self.field, self.sim.clone(), self.seed.wrapping_add(1));
        (0..self.n_events)
            .map(|i| {
                let particles = match &self.particles {
                    ParticleSource::Fixed(list) => list.clone(),
                    ParticleSource::Random { count, ranges } => {
                        (0..*count).map(|id| ranges.draw(id as u64, &mut particle_rng)).collect()
                    }
                };
                sim.generate(i as u64, &particles)
            })
            .collect()
    }
}

fn spec(id: u64, pt: f64, phi0: f64, charge: i8, tan_lambda: f64) -> ParticleSpec {
    ParticleSpec {
        id,
        pt,
        phi0,
        tan_lambda,
        charge,
        d0: 0.0,
        z0: 0.0,
    }
}
