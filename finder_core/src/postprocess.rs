//! Post-processing of 2D candidates: circle fit, merging, hit appending.

use crate::candidate::TrackCandidate;
use crate::config::PostprocessConfig;
use crate::error::RecoverableError;
use crate::fit::{drift_chi2, drift_residual, fit_drift_hits};
use crate::trajectory::HelixParams;
use crate::types::{wrap_angle, HitId, HitStatusTable, WireHit};
use tracing::debug;

/// Refit the circle of `cand` from its axial hits, starting the drift side
/// resolution from `seed` when given.
pub fn fit_candidate(
    cand: &mut TrackCandidate,
    hits: &[WireHit],
    seed: Option<HelixParams>,
    refit_passes: usize,
) -> Result<(), RecoverableError> {
    let axial: Vec<&WireHit> = cand
        .hits
        .iter()
        .map(|h| &hits[h.0])
        .filter(|h| h.axial)
        .collect();
    let fit = fit_drift_hits(&axial, seed.as_ref(), refit_passes)?;
    cand.set_fit(fit.params, fit.chi2, fit.ndf);
    Ok(())
}

pub struct CandidatePostprocessor<'a> {
    config: &'a PostprocessConfig,
    pub fit_tracks: bool,
    pub merge_tracks: bool,
    pub append_hits: bool,
}

impl<'a> CandidatePostprocessor<'a> {
    pub fn new(config: &'a PostprocessConfig, fit_tracks: bool, merge_tracks: bool, append_hits: bool) -> Self {
        Self {
            config,
            fit_tracks,
            merge_tracks,
            append_hits,
        }
    }

    /// Fit, merge and extend `candidates` in place.
    pub fn apply(
        &self,
        candidates: &mut Vec<TrackCandidate>,
        hits: &[WireHit],
        status: &mut HitStatusTable,
        errors: &mut Vec<RecoverableError>,
    ) {
        for cand in candidates.iter_mut() {
            self.fit_or_score(cand, hits, errors);
        }
        if self.merge_tracks {
            let merged = self.merge(candidates, hits);
            if merged > 0 {
                debug!(merged, "candidates merged");
            }
        }
        if self.append_hits {
            let appended = self.append(candidates, hits, status, errors);
            if appended > 0 {
                debug!(appended, "hits appended");
            }
        }
        for cand in candidates.iter_mut() {
            cand.sort_hits(hits);
        }
    }

    fn fit_or_score(&self, cand: &mut TrackCandidate, hits: &[WireHit], errors: &mut Vec<RecoverableError>) {
        if self.fit_tracks {
            let seed = cand.params;
            match fit_candidate(cand, hits, Some(seed), self.config.refit_passes) {
                Ok(()) => return,
                Err(e) => errors.push(e),
            }
        }
        let refs: Vec<&WireHit> = cand.hits.iter().map(|h| &hits[h.0]).collect();
        let chi2 = drift_chi2(&refs, &cand.params);
        let params = cand.params;
        cand.set_fit(params, chi2, refs.len().saturating_sub(3));
    }

    /// Merge pairs with close φ0 whose combined fit is good, until no pair
    /// merges. Returns the number of merges.
    pub fn merge(&self, candidates: &mut Vec<TrackCandidate>, hits: &[WireHit]) -> usize {
        let mut merges = 0;
        'outer: loop {
            for i in 0..candidates.len() {
                for j in (i + 1)..candidates.len() {
                    let (a, b) = (&candidates[i], &candidates[j]);
                    if wrap_angle(a.params.phi0 - b.params.phi0).abs() > self.config.merge_phi_window {
                        continue;
                    }
                    let mut union: Vec<HitId> = a.hits.iter().chain(&b.hits).copied().collect();
                    union.sort_unstable();
                    union.dedup();
                    let refs: Vec<&WireHit> = union.iter().map(|h| &hits[h.0]).collect();
                    let Ok(fit) = fit_drift_hits(&refs, Some(&a.params), self.config.refit_passes) else {
                        continue;
                    };
                    if fit.chi2_per_ndf() > self.config.merge_chi2_cut {
                        continue;
                    }
                    let origin = a.origin;
                    let mut merged = TrackCandidate::new(union, fit.params, origin);
                    merged.set_fit(fit.params, fit.chi2, fit.ndf);
                    candidates[i] = merged;
                    candidates.remove(j);
                    merges += 1;
                    continue 'outer;
                }
            }
            break;
        }
        merges
    }

    /// Give every unused axial hit to the candidate it fits best, if any.
    pub fn append(
        &self,
        candidates: &mut [TrackCandidate],
        hits: &[WireHit],
        status: &mut HitStatusTable,
        errors: &mut Vec<RecoverableError>,
    ) -> usize {
        let mut changed = vec![false; candidates.len()];
        let mut appended = 0;
        let free: Vec<&WireHit> = hits
            .iter()
            .filter(|h| h.axial && status.is_available(h.id))
            .collect();
        for hit in free {
            let best = candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| c.params.arc_length_to(hit.ref_pos) > 0.0)
                .map(|(k, c)| (k, drift_residual(hit, &c.params).abs()))
                .filter(|&(_, res)| res <= self.config.append_distance)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((k, _)) = best {
                candidates[k].hits.push(hit.id);
                status.set_taken(hit.id, true);
                changed[k] = true;
                appended += 1;
            }
        }
        for (cand, changed) in candidates.iter_mut().zip(changed) {
            if changed {
                self.fit_or_score(cand, hits, errors);
            }
        }
        appended
    }
}
