//! Named, configurable filters.
//!
//! Every pruning decision of the facet automaton and the CKF goes through a
//! [`Filter`]: it receives one candidate object and returns either a finite
//! [`Weight`] or [`Weight::Rejected`]. Filters are looked up by name from the
//! configuration when the finder is built; an unknown name is a
//! [`ConfigError`] and never reaches event processing.
//!
//! # Design choices
//! - Filters are trait objects (`Box<dyn Filter<T>>`) so the selection is a
//!   plain string in the configuration.
//! - Thresholds are copied out of the configuration at construction; scoring
//!   is a pure function of the object.

use crate::config::FinderConfig;
use crate::error::ConfigError;
use crate::facet::Facet;
use crate::types::Weight;

/// Scores one candidate object.
pub trait Filter<T>: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, object: &T) -> Weight;
}

// ---------------------------------------------------------------------------
// Objects seen by the relation and CKF filters
// ---------------------------------------------------------------------------

/// A possible link between two facets, with its geometric quantities.
#[derive(Clone, Copy, Debug)]
pub struct RelationCandidate<'a> {
    pub from: &'a Facet,
    pub to: &'a Facet,
    /// Layer-rank step from the last hit of `from` to the first hit of `to`
    pub layer_step: usize,
    /// Transverse distance between those two hits (cm)
    pub distance: f64,
    /// Angle between the two facet tangents (rad)
    pub tangent_angle: f64,
}

/// A tentative CKF child: the update of a parent state with one space point.
#[derive(Clone, Copy, Debug)]
pub struct StateCandidate {
    pub layer: u16,
    /// χ² of the Kalman update
    pub chi2: f64,
    /// Transverse residual between prediction and space point (cm)
    pub distance: f64,
}

// ---------------------------------------------------------------------------
// Facet filters
// ---------------------------------------------------------------------------

/// Base weight of a facet: the three hits it contributes.
const FACET_BASE_WEIGHT: f64 = 3.0;

struct AllFacets;

impl Filter<Facet> for AllFacets {
    fn name(&self) -> &'static str {
        "all"
    }

    fn score(&self, _facet: &Facet) -> Weight {
        Weight::Accepted(FACET_BASE_WEIGHT)
    }
}

struct NoFacets;

impl Filter<Facet> for NoFacets {
    fn name(&self) -> &'static str {
        "none"
    }

    fn score(&self, _facet: &Facet) -> Weight {
        Weight::Rejected
    }
}

struct Chi2Facets {
    cut: f64,
}

impl Filter<Facet> for Chi2Facets {
    fn name(&self) -> &'static str {
        "chi2"
    }

    fn score(&self, facet: &Facet) -> Weight {
        if !(facet.chi2 <= self.cut) {
            return Weight::Rejected;
        }
        Weight::from_value(FACET_BASE_WEIGHT - facet.chi2 / self.cut)
    }
}

const FACET_FILTERS: &str = "all, chi2, none";

/// Facet filter registered under `name`.
pub fn facet_filter(
    name: &str,
    config: &FinderConfig,
) -> Result<Box<dyn Filter<Facet>>, ConfigError> {
    match name {
        "all" => Ok(Box::new(AllFacets)),
        "none" => Ok(Box::new(NoFacets)),
        "chi2" => Ok(Box::new(Chi2Facets {
            cut: config.facets.chi2_cut,
        })),
        _ => Err(unknown("facet filter", name, FACET_FILTERS)),
    }
}

// ---------------------------------------------------------------------------
// Facet relation filters
// ---------------------------------------------------------------------------

struct AllRelations;

impl<'a> Filter<RelationCandidate<'a>> for AllRelations {
    fn name(&self) -> &'static str {
        "all"
    }

    fn score(&self, rel: &RelationCandidate<'a>) -> Weight {
        Weight::from_value(rel.to.weight)
    }
}

/// Accepts a relation when the layer step, hit distance and tangent angle
/// are all within their bounds.
struct SimpleRelations {
    max_step: usize,
    max_distance: f64,
    max_angle: f64,
}

impl<'a> Filter<RelationCandidate<'a>> for SimpleRelations {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn score(&self, rel: &RelationCandidate<'a>) -> Weight {
        if rel.layer_step == 0 || rel.layer_step > self.max_step {
            return Weight::Rejected;
        }
        if !(rel.distance <= self.max_distance) || !(rel.tangent_angle <= self.max_angle) {
            return Weight::Rejected;
        }
        let bend = rel.tangent_angle / self.max_angle;
        Weight::from_value(rel.to.weight - bend * bend)
    }
}

const RELATION_FILTERS: &str = "all, simple";

/// Facet-relation filter registered under `name`.
pub fn relation_filter(
    name: &str,
    config: &FinderConfig,
) -> Result<Box<dyn for<'a> Filter<RelationCandidate<'a>>>, ConfigError> {
    match name {
        "all" => Ok(Box::new(AllRelations)),
        "simple" => Ok(Box::new(SimpleRelations {
            max_step: 1 + config.facets.layer_jump,
            max_distance: config.facets.max_hit_distance,
            max_angle: config.facets.max_tangent_angle,
        })),
        _ => Err(unknown("facet relation filter", name, RELATION_FILTERS)),
    }
}

// ---------------------------------------------------------------------------
// CKF state filters
// ---------------------------------------------------------------------------

struct AllStates;

impl Filter<StateCandidate> for AllStates {
    fn name(&self) -> &'static str {
        "all"
    }

    fn score(&self, state: &StateCandidate) -> Weight {
        if state.chi2.is_finite() {
            Weight::Accepted(1.0)
        } else {
            Weight::Rejected
        }
    }
}

struct Chi2States {
    cut: f64,
}

impl Filter<StateCandidate> for Chi2States {
    fn name(&self) -> &'static str {
        "chi2"
    }

    fn score(&self, state: &StateCandidate) -> Weight {
        if !(state.chi2 <= self.cut) {
            return Weight::Rejected;
        }
        Weight::from_value(1.0 - state.chi2 / self.cut)
    }
}

struct DistanceStates {
    max_distance: f64,
}

impl Filter<StateCandidate> for DistanceStates {
    fn name(&self) -> &'static str {
        "distance"
    }

    fn score(&self, state: &StateCandidate) -> Weight {
        if !(state.distance <= self.max_distance) {
            return Weight::Rejected;
        }
        Weight::from_value(1.0 - state.distance / self.max_distance)
    }
}

const STATE_FILTERS: &str = "all, chi2, distance";

/// CKF state filter registered under `name`.
pub fn ckf_state_filter(
    name: &str,
    config: &FinderConfig,
) -> Result<Box<dyn Filter<StateCandidate>>, ConfigError> {
    match name {
        "all" => Ok(Box::new(AllStates)),
        "chi2" => Ok(Box::new(Chi2States {
            cut: config.ckf.chi2_cut,
        })),
        "distance" => Ok(Box::new(DistanceStates {
            max_distance: config.ckf.max_distance,
        })),
        _ => Err(unknown("CKF state filter", name, STATE_FILTERS)),
    }
}

fn unknown(kind: &'static str, name: &str, known: &str) -> ConfigError {
    ConfigError::UnknownName {
        kind,
        name: name.to_string(),
        known: known.to_string(),
    }
}
