//! `finder_core` — charged-track finding in a cylindrical tracking detector.
//!
//! # Module layout
//! - [`types`]        — IDs, raw input, prepared hits, hit status table, weights
//! - [`detector`]     — Geometry and magnetic-field collaborator traits
//! - [`trajectory`]   — Perigee helix parametrisation
//! - [`fit`]          — Circle fit on drift hits, robust sz line fit
//! - [`hit_preparer`] — Raw-hit normalisation
//! - [`hough`]        — Recursive axial parameter-space search
//! - [`postprocess`]  — Candidate fit / merge / hit appending
//! - [`facet`]        — Hit triples (facets)
//! - [`automaton`]    — Facet relation graph and longest-chain extraction
//! - [`stereo`]       — Stereo-hit combination
//! - [`kf`]           — Helix Kalman filter and cylinder measurement model
//! - [`ckf`]          — Combinatorial Kalman filter into the silicon layers
//! - [`overlap`]      — Overlap resolution between candidates
//! - [`event_t0`]     — Event-T0 extraction
//! - [`filter`]       — Named scoring filters
//! - [`pipeline`]     — Full finding sequence per event
//! - [`metrics`]      — Efficiency, clone and fake rates

pub mod automaton;
pub mod candidate;
pub mod ckf;
pub mod config;
pub mod detector;
pub mod error;
pub mod event_t0;
pub mod facet;
pub mod filter;
pub mod fit;
pub mod hit_preparer;
pub mod hough;
pub mod kf;
pub mod metrics;
pub mod overlap;
pub mod pipeline;
pub mod postprocess;
pub mod stereo;
pub mod trajectory;
pub mod types;

#[cfg(test)]
mod test_utils;

pub use candidate::{Origin, TrackCandidate};
pub use config::FinderConfig;
pub use detector::{DetectorGeometry, MagneticField, SiliconLayerGeometry, WireGeometry};
pub use error::{ConfigError, RecoverableError};
pub use metrics::{EventTruth, FindingMetrics, MatchCriteria, TruthParticle};
pub use pipeline::{EventDiagnostics, EventOutput, TrackFinder};
pub use trajectory::HelixParams;
pub use types::{
    ChannelId, HitId, RawEvent, RawSpacePoint, RawWireHit, SpacePoint, SpacePointId, WireHit,
};
