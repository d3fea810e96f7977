//! Finding metrics against simulation truth: efficiency, clone and fake rates,
//! parameter resolution of matched candidates.

use crate::candidate::TrackCandidate;
use crate::trajectory::HelixParams;
use crate::types::{wrap_angle, SpacePoint, WireHit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// True trajectory of one simulated particle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TruthParticle {
    pub particle_id: u64,
    pub params: HelixParams,
}

/// Truth of one event. Hit truth is indexed by the *raw* position of the
/// measurement; `None` marks background.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventTruth {
    pub particles: Vec<TruthParticle>,
    pub wire_hits: Vec<Option<u64>>,
    pub space_points: Vec<Option<u64>>,
}

/// Matching thresholds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct MatchCriteria {
    /// Fraction of a candidate's measurements from its majority particle
    pub min_purity: f64,
    /// Fraction of the particle's measurements the candidate must cover
    pub min_efficiency: f64,
    /// Particles with fewer measurements are not counted as findable
    pub min_findable_hits: usize,
}

impl Default for MatchCriteria {
    fn default() -> Self {
        Self {
            min_purity: 0.66,
            min_efficiency: 0.5,
            min_findable_hits: 5,
        }
    }
}

/// Accumulated metric statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FindingMetrics {
    pub n_events: u64,
    /// Findable particles seen
    pub n_particles: u64,
    pub n_candidates: u64,
    /// Particles with at least one matched candidate
    pub found: u64,
    /// Matched candidates beyond the first per particle
    pub clones: u64,
    /// Candidates without a majority particle above the purity threshold
    pub fakes: u64,
    /// Matched candidates that do not reach the efficiency threshold
    pub partial: u64,
    /// Sum of squared φ0 errors of matched candidates
    pub sum_sq_phi0_err: f64,
    /// Sum of squared relative curvature errors of matched candidates
    pub sum_sq_rel_curvature_err: f64,
    pub n_matched: u64,
}

impl FindingMetrics {
    /// found / findable
    pub fn efficiency(&self) -> f64 {
        if self.n_particles == 0 {
            1.0
        } else {
            self.found as f64 / self.n_particles as f64
        }
    }

    pub fn clone_rate(&self) -> f64 {
        if self.n_candidates == 0 {
            0.0
        } else {
            self.clones as f64 / self.n_candidates as f64
        }
    }

    pub fn fake_rate(&self) -> f64 {
        if self.n_candidates == 0 {
            0.0
        } else {
            self.fakes as f64 / self.n_candidates as f64
        }
    }

    /// RMS φ0 error (rad).
    pub fn rms_phi0(&self) -> f64 {
        if self.n_matched == 0 {
            return 0.0;
        }
        (self.sum_sq_phi0_err / self.n_matched as f64).sqrt()
    }

    /// RMS relative curvature error.
    pub fn rms_rel_curvature(&self) -> f64 {
        if self.n_matched == 0 {
            return 0.0;
        }
        (self.sum_sq_rel_curvature_err / self.n_matched as f64).sqrt()
    }

    /// Accumulate one event.
    pub fn accumulate(
        &mut self,
        candidates: &[TrackCandidate],
        hits: &[WireHit],
        space_points: &[SpacePoint],
        truth: &EventTruth,
        criteria: &MatchCriteria,
    ) {
        self.n_events += 1;
        self.n_candidates += candidates.len() as u64;

        let mut particle_size: HashMap<u64, usize> = HashMap::new();
        for id in truth.wire_hits.iter().chain(&truth.space_points).flatten() {
            *particle_size.entry(*id).or_default() += 1;
        }
        let findable: Vec<&TruthParticle> = truth
            .particles
            .iter()
            .filter(|p| particle_size.get(&p.particle_id).copied().unwrap_or(0) >= criteria.min_findable_hits)
            .collect();
        self.n_particles += findable.len() as u64;

        let mut matches: HashMap<u64, usize> = HashMap::new();
        for cand in candidates {
            let mut counts: HashMap<u64, usize> = HashMap::new();
            let owners = cand
                .hits
                .iter()
                .map(|h| truth.wire_hits.get(hits[h.0].raw_index).copied().flatten())
                .chain(
                    cand.space_points
                        .iter()
                        .map(|s| truth.space_points.get(space_points[s.0].raw_index).copied().flatten()),
                );
            for owner in owners.flatten() {
                *counts.entry(owner).or_default() += 1;
            }
            let Some((&particle, &n)) = counts.iter().max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0))) else {
                self.fakes += 1;
                continue;
            };
            let total = cand.n_measurements().max(1);
            if (n as f64) / (total as f64) < criteria.min_purity {
                self.fakes += 1;
                continue;
            }
            let size = particle_size.get(&particle).copied().unwrap_or(0).max(1);
            if (n as f64) / (size as f64) < criteria.min_efficiency {
                self.partial += 1;
                continue;
            }

            let seen = matches.entry(particle).or_default();
            *seen += 1;
            if *seen > 1 {
                self.clones += 1;
            }
            if let Some(tp) = truth.particles.iter().find(|p| p.particle_id == particle) {
                let dphi = wrap_angle(cand.params.phi0 - tp.params.phi0);
                self.sum_sq_phi0_err += dphi * dphi;
                if tp.params.curvature.abs() > 1e-12 {
                    let rel = (cand.params.curvature - tp.params.curvature) / tp.params.curvature;
                    self.sum_sq_rel_curvature_err += rel * rel;
                }
                self.n_matched += 1;
            }
        }

        self.found += findable
            .iter()
            .filter(|p| matches.contains_key(&p.particle_id))
            .count() as u64;
    }

    /// Add another accumulator (e.g. from a parallel worker).
    pub fn merge(&mut self, other: &FindingMetrics) {
        self.n_events += other.n_events;
        self.n_particles += other.n_particles;
        self.n_candidates += other.n_candidates;
        self.found += other.found;
        self.clones += other.clones;
        self.fakes += other.fakes;
        self.partial += other.partial;
        self.sum_sq_phi0_err += other.sum_sq_phi0_err;
        self.sum_sq_rel_curvature_err += other.sum_sq_rel_curvature_err;
        self.n_matched += other.n_matched;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Origin;
    use crate::test_utils::axial_hits_on;
    use crate::types::HitId;
    use approx::assert_abs_diff_eq;

    fn setup() -> (Vec<WireHit>, EventTruth) {
        let params = HelixParams::new_2d(0.004, 0.3, 0.0);
        let hits = axial_hits_on(&params, 10, 0.2);
        let mut wire_truth: Vec<Option<u64>> = vec![Some(7); 10];
        wire_truth[9] = None;
        let truth = EventTruth {
            particles: vec![
                TruthParticle {
                    particle_id: 7,
                    params,
                },
                TruthParticle {
                    particle_id: 8,
                    params: HelixParams::new_2d(-0.004, 2.0, 0.0),
                },
            ],
            wire_hits: wire_truth,
            space_points: Vec::new(),
        };
        (hits, truth)
    }

    fn cand(ids: std::ops::Range<usize>, params: HelixParams) -> TrackCandidate {
        TrackCandidate::new(ids.map(HitId).collect(), params, Origin::Hough)
    }

    #[test]
    fn matched_clone_and_fake_are_counted() {
        let (hits, truth) = setup();
        let p = truth.particles[0].params;
        let candidates = vec![cand(0..9, p), cand(0..6, p), cand(8..10, p)];
        let mut m = FindingMetrics::default();
        m.accumulate(&candidates, &hits, &[], &truth, &MatchCriteria::default());

        // particle 8 has no hits and is not findable
        assert_eq!(m.n_particles, 1);
        assert_eq!(m.found, 1);
        assert_eq!(m.clones, 1);
        // 8..10 is half background: purity 0.5
        assert_eq!(m.fakes, 1);
        assert_abs_diff_eq!(m.efficiency(), 1.0);
        assert_abs_diff_eq!(m.fake_rate(), 1.0 / 3.0);
        assert_abs_diff_eq!(m.rms_phi0(), 0.0);
    }

    #[test]
    fn low_coverage_is_partial_not_found() {
        let (hits, truth) = setup();
        let p = truth.particles[0].params;
        let mut m = FindingMetrics::default();
        m.accumulate(&[cand(0..3, p)], &hits, &[], &truth, &MatchCriteria::default());
        assert_eq!(m.found, 0);
        assert_eq!(m.partial, 1);
        assert_abs_diff_eq!(m.efficiency(), 0.0);
    }

    #[test]
    fn merge_adds_counts() {
        let (hits, truth) = setup();
        let p = truth.particles[0].params;
        let mut a = FindingMetrics::default();
        a.accumulate(&[cand(0..9, p)], &hits, &[], &truth, &MatchCriteria::default());
        let mut b = a.clone();
        b.merge(&a);
        assert_eq!(b.n_events, 2);
        assert_eq!(b.found, 2);
        assert_eq!(b.n_particles, 2);
    }
}
