//! `sim` — Event simulator: particle helices, wire and silicon hits, replay.

pub mod event_sim;
pub mod particle;
pub mod replay;
pub mod scenarios;

pub use event_sim::{EventSimulator, SimEvent, SimParams};
pub use particle::{ParticleRanges, ParticleSpec};
pub use replay::{load_replay, save_replay, ReplayLog};
pub use scenarios::{ParticleSource, Scenario, ScenarioKind};
