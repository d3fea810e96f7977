//! Event-T0 extraction from the drift residuals of fitted candidates.
//!
//! A common offset Δ of all drift times changes every drift length by
//! −v·Δ. With the circles held fixed, the Δ minimising
//! Σ w·(|dist| − (d − v·Δ))² has the closed form
//!
//!   δ = −Σ w·v·(|dist| − d) / Σ w·v²
//!
//! The step is applied to the drift lengths, the circles are refitted and
//! the procedure repeats until |δ| < `minimalDeltaT0` or `maxIterations`
//! steps were made.

use crate::candidate::TrackCandidate;
use crate::error::RecoverableError;
use crate::fit::fit_drift_hits;
use crate::types::{HitId, WireHit};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct T0Estimate {
    /// Event T0 (ns): configured value plus the fitted offset
    pub t0: f64,
    /// Fitted offset relative to the configured event T0 (ns)
    pub delta: f64,
    pub iterations: usize,
    pub converged: bool,
    /// Hits contributing to the estimate
    pub n_hits: usize,
}

pub struct EventT0Extractor {
    pub max_iterations: usize,
    pub minimal_delta_t0: f64,
    pub event_t0: f64,
    pub refit_passes: usize,
}

impl EventT0Extractor {
    /// Fit the offset, correct the drift times and lengths of all `hits` and
    /// refit the circles of `candidates`. `None` if no candidate hit has a drift
    /// length to fit.
    pub fn apply(
        &self,
        candidates: &mut [TrackCandidate],
        hits: &mut [WireHit],
        errors: &mut Vec<RecoverableError>,
    ) -> Option<T0Estimate> {
        let mut used: Vec<HitId> = candidates
            .iter()
            .flat_map(|c| c.hits.iter().copied())
            .filter(|h| hits[h.0].axial && hits[h.0].drift_length > 0.0)
            .collect();
        used.sort_unstable();
        used.dedup();
        if used.is_empty() {
            return None;
        }
        let initial: Vec<f64> = hits.iter().map(|h| h.drift_length).collect();

        let mut delta = 0.0;
        let mut estimate = T0Estimate {
            n_hits: used.len(),
            ..Default::default()
        };
        for _ in 0..self.max_iterations {
            let mut num = 0.0;
            let mut den = 0.0;
            for cand in candidates.iter() {
                for &id in cand.hits.iter().filter(|h| used.binary_search(h).is_ok()) {
                    let h = &hits[id.0];
                    let w = 1.0 / h.drift_sigma.max(1e-4).powi(2);
                    let dist = cand.params.signed_distance(h.ref_pos).abs();
                    num += w * h.drift_velocity * (dist - h.drift_length);
                    den += w * h.drift_velocity * h.drift_velocity;
                }
            }
            if !(den > 0.0) {
                break;
            }
            let step = -num / den;
            delta += step;
            estimate.iterations += 1;

            for &id in &used {
                let h = &mut hits[id.0];
                h.drift_length = (initial[id.0] - h.drift_velocity * delta).max(0.0);
            }
            self.refit(candidates, hits, errors);

            if step.abs() < self.minimal_delta_t0 {
                estimate.converged = true;
                break;
            }
        }

        // the offset is common to every hit of the event, stereo ones included
        for (h, &d) in hits.iter_mut().zip(&initial) {
            h.drift_length = (d - h.drift_velocity * delta).max(0.0);
            h.drift_time -= delta;
        }
        estimate.delta = delta;
        estimate.t0 = self.event_t0 + delta;
        debug!(
            t0 = estimate.t0,
            iterations = estimate.iterations,
            converged = estimate.converged,
            "event T0 extracted"
        );
        Some(estimate)
    }

    fn refit(&self, candidates: &mut [TrackCandidate], hits: &[WireHit], errors: &mut Vec<RecoverableError>) {
        for cand in candidates.iter_mut() {
            let axial: Vec<&WireHit> = cand
                .hits
                .iter()
                .map(|h| &hits[h.0])
                .filter(|h| h.axial)
                .collect();
            match fit_drift_hits(&axial, Some(&cand.params), self.refit_passes) {
                Ok(fit) => cand.set_fit(fit.params, fit.chi2, fit.ndf),
                Err(RecoverableError::FitNonConvergence { reason, .. }) => {
                    errors.push(RecoverableError::FitNonConvergence {
                        stage: "event-t0",
                        reason,
                    })
                }
                Err(e) => errors.push(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Origin;
    use crate::test_utils::axial_hits_on;
    use crate::trajectory::HelixParams;
    use approx::assert_abs_diff_eq;

    fn extractor() -> EventT0Extractor {
        EventT0Extractor {
            max_iterations: 10,
            minimal_delta_t0: 0.2,
            event_t0: 5.0,
            refit_passes: 2,
        }
    }

    #[test]
    fn recovers_injected_offset() {
        let truth = HelixParams::new_2d(0.004, 1.1, 0.0);
        let mut hits = axial_hits_on(&truth, 18, 0.3);
        let offset = 10.0;
        for h in &mut hits {
            h.drift_length += h.drift_velocity * offset;
            h.drift_time += offset;
        }
        let mut cands = vec![TrackCandidate::new(hits.iter().map(|h| h.id).collect(), truth, Origin::Hough)];
        let mut errors = Vec::new();
        let est = extractor().apply(&mut cands, &mut hits, &mut errors).unwrap();

        assert!(errors.is_empty());
        assert!(est.converged);
        assert!(est.iterations <= 3);
        assert_abs_diff_eq!(est.delta, offset, epsilon = 0.5);
        assert_abs_diff_eq!(est.t0, 5.0 + offset, epsilon = 0.5);
        assert!(hits.iter().all(|h| (h.drift_length - 0.3).abs() < 0.01));
        assert_abs_diff_eq!(cands[0].params.curvature, 0.004, epsilon = 1e-4);
    }

    #[test]
    fn no_offset_converges_immediately() {
        let truth = HelixParams::new_2d(-0.003, -0.4, 0.0);
        let mut hits = axial_hits_on(&truth, 12, 0.25);
        let mut cands = vec![TrackCandidate::new(hits.iter().map(|h| h.id).collect(), truth, Origin::Hough)];
        let est = extractor().apply(&mut cands, &mut hits, &mut Vec::new()).unwrap();
        assert_eq!(est.iterations, 1);
        assert!(est.delta.abs() < 0.2);
    }

    #[test]
    fn iteration_bound_is_respected() {
        let truth = HelixParams::new_2d(0.004, 1.1, 0.0);
        let mut hits = axial_hits_on(&truth, 12, 0.3);
        let mut cands = vec![TrackCandidate::new(hits.iter().map(|h| h.id).collect(), truth, Origin::Hough)];
        let ex = EventT0Extractor {
            max_iterations: 1,
            minimal_delta_t0: 1e-12,
            ..extractor()
        };
        let est = ex.apply(&mut cands, &mut hits, &mut Vec::new()).unwrap();
        assert_eq!(est.iterations, 1);
    }

    #[test]
    fn nothing_to_fit_without_candidates() {
        let mut hits = axial_hits_on(&HelixParams::new_2d(0.004, 1.1, 0.0), 6, 0.3);
        assert!(extractor().apply(&mut [], &mut hits, &mut Vec::new()).is_none());
    }
}
