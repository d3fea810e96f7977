//! Facets: triples of axial wire hits on consecutive layer ranks.
//!
//! ## Facet fit
//! For the first and last hit the common tangent of their drift circles is
//! computed for all four right/left hypotheses. With signed drift radii
//! ρ = σ·d (σ = +1 when the wire lies left of the track) the unit normal n
//! of the tangent satisfies n·(c3 − c1) = ρ3 − ρ1, giving
//! n = a·Δ̂ + √(1 − a²)·Δ̂⊥ with a = (ρ3 − ρ1)/|Δ|. The middle drift circle
//! is compared to this line; the residual over the combined uncertainty is
//! the facet χ² and the best hypothesis is kept.

use crate::config::FacetConfig;
use crate::error::RecoverableError;
use crate::filter::Filter;
use crate::types::{HitId, HitStatusTable, Weight, WireHit};
use std::collections::BTreeMap;
use tracing::warn;

/// Side of the track the wire lies on, looking along the direction of flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RightLeft {
    Right,
    Left,
}

impl RightLeft {
    pub fn sign(self) -> f64 {
        match self {
            RightLeft::Left => 1.0,
            RightLeft::Right => -1.0,
        }
    }

    fn from_sign(sign: f64) -> Self {
        if sign >= 0.0 {
            RightLeft::Left
        } else {
            RightLeft::Right
        }
    }
}

#[derive(Clone, Debug)]
pub struct Facet {
    pub hits: [HitId; 3],
    /// Axial layer rank of each hit, strictly increasing
    pub ranks: [usize; 3],
    pub right_left: [RightLeft; 3],
    /// Unit direction of the fitted tangent
    pub tangent: [f64; 2],
    /// Touch point of the tangent on the first drift circle
    pub start: [f64; 2],
    /// Touch point of the tangent on the last drift circle
    pub end: [f64; 2],
    /// Curvature of the circle through the three touch points
    pub curvature: f64,
    pub chi2: f64,
    /// Filter weight, set when the facet is accepted
    pub weight: f64,
}

impl Facet {
    pub fn first_rank(&self) -> usize {
        self.ranks[0]
    }

    pub fn last_rank(&self) -> usize {
        self.ranks[2]
    }

    pub fn shares_hit(&self, other: &Facet) -> bool {
        self.hits.iter().any(|h| other.hits.contains(h))
    }
}

/// Rank of every axial layer that carries at least one hit.
pub fn axial_layer_ranks(hits: &[WireHit]) -> BTreeMap<u16, usize> {
    let mut layers: Vec<u16> = hits.iter().filter(|h| h.axial).map(|h| h.layer).collect();
    layers.sort_unstable();
    layers.dedup();
    layers.into_iter().enumerate().map(|(rank, l)| (l, rank)).collect()
}

fn dot(a: [f64; 2], b: [f64; 2]) -> f64 {
    a[0] * b[0] + a[1] * b[1]
}

fn sub(a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    [a[0] - b[0], a[1] - b[1]]
}

fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - b[0]).hypot(a[1] - b[1])
}

/// Signed curvature of the circle through three points (positive when the
/// points turn left).
fn three_point_curvature(p1: [f64; 2], p2: [f64; 2], p3: [f64; 2]) -> f64 {
    let a = sub(p2, p1);
    let b = sub(p3, p1);
    let cross = a[0] * b[1] - a[1] * b[0];
    let denom = distance(p1, p2) * distance(p1, p3) * distance(p2, p3);
    if denom < 1e-12 {
        0.0
    } else {
        2.0 * cross / denom
    }
}

/// Best tangent-consistency fit of three hits, `None` if no right/left
/// hypothesis admits a common tangent.
pub fn fit_facet(h1: &WireHit, hm: &WireHit, h3: &WireHit) -> Option<FacetFitResult> {
    let (c1, cm, c3) = (h1.ref_pos, hm.ref_pos, h3.ref_pos);
    let delta = sub(c3, c1);
    let len = distance(c1, c3);
    if len < 1e-9 {
        return None;
    }
    let dir = [delta[0] / len, delta[1] / len];
    let perp = [-dir[1], dir[0]];
    let variance = h1.drift_sigma.powi(2) + hm.drift_sigma.powi(2) + h3.drift_sigma.powi(2);

    let mut best: Option<FacetFitResult> = None;
    for s1 in [1.0, -1.0] {
        for s3 in [1.0, -1.0] {
            let rho1 = s1 * h1.drift_length;
            let rho3 = s3 * h3.drift_length;
            let a = (rho3 - rho1) / len;
            if a.abs() >= 1.0 {
                continue;
            }
            let b = (1.0 - a * a).sqrt();
            let n = [a * dir[0] + b * perp[0], a * dir[1] + b * perp[1]];
            let k = dot(n, c1) - rho1;
            let offset = dot(n, cm) - k;
            let sm = if offset >= 0.0 { 1.0 } else { -1.0 };
            let residual = offset - sm * hm.drift_length;
            let chi2 = residual * residual / variance;

            if best.as_ref().map_or(true, |prev| chi2 < prev.chi2) {
                let start = [c1[0] - rho1 * n[0], c1[1] - rho1 * n[1]];
                let end = [c3[0] - rho3 * n[0], c3[1] - rho3 * n[1]];
                let middle = [cm[0] - sm * hm.drift_length * n[0], cm[1] - sm * hm.drift_length * n[1]];
                best = Some(FacetFitResult {
                    right_left: [
                        RightLeft::from_sign(s1),
                        RightLeft::from_sign(sm),
                        RightLeft::from_sign(s3),
                    ],
                    tangent: [n[1], -n[0]],
                    start,
                    end,
                    curvature: three_point_curvature(start, middle, end),
                    chi2,
                });
            }
        }
    }
    best
}

/// Output of [`fit_facet`].
#[derive(Clone, Debug)]
pub struct FacetFitResult {
    pub right_left: [RightLeft; 3],
    pub tangent: [f64; 2],
    pub start: [f64; 2],
    pub end: [f64; 2],
    pub curvature: f64,
    pub chi2: f64,
}

/// Creates every accepted facet of one event.
pub struct FacetBuilder<'a> {
    config: &'a FacetConfig,
    filter: &'a dyn Filter<Facet>,
}

impl<'a> FacetBuilder<'a> {
    pub fn new(config: &'a FacetConfig, filter: &'a dyn Filter<Facet>) -> Self {
        Self { config, filter }
    }

    /// Build facets from the available axial hits.
    pub fn apply(
        &self,
        hits: &[WireHit],
        status: &HitStatusTable,
        ranks: &BTreeMap<u16, usize>,
        errors: &mut Vec<RecoverableError>,
    ) -> Vec<Facet> {
        let n_ranks = ranks.len();
        let mut by_rank: Vec<Vec<&WireHit>> = vec![Vec::new(); n_ranks];
        for hit in hits.iter().filter(|h| h.axial && status.is_available(h.id)) {
            if let Some(&rank) = ranks.get(&hit.layer) {
                by_rank[rank].push(hit);
            }
        }

        let gap = self.config.max_layer_gap;
        let max_dist = self.config.max_hit_distance;
        let mut facets = Vec::new();

        for r1 in 0..n_ranks {
            for h1 in &by_rank[r1] {
                for r2 in (r1 + 1)..=(r1 + gap).min(n_ranks.saturating_sub(1)) {
                    for h2 in &by_rank[r2] {
                        if distance(h1.ref_pos, h2.ref_pos) > max_dist {
                            continue;
                        }
                        for r3 in (r2 + 1)..=(r2 + gap).min(n_ranks.saturating_sub(1)) {
                            for h3 in &by_rank[r3] {
                                if distance(h2.ref_pos, h3.ref_pos) > max_dist {
                                    continue;
                                }
                                let Some(fit) = fit_facet(h1, h2, h3) else {
                                    continue;
                                };
                                // outgoing direction: away from the origin
                                if dot(fit.tangent, h1.ref_pos) < 0.0 {
                                    continue;
                                }
                                let mut facet = Facet {
                                    hits: [h1.id, h2.id, h3.id],
                                    ranks: [r1, r2, r3],
                                    right_left: fit.right_left,
                                    tangent: fit.tangent,
                                    start: fit.start,
                                    end: fit.end,
                                    curvature: fit.curvature,
                                    chi2: fit.chi2,
                                    weight: 0.0,
                                };
                                if let Weight::Accepted(w) = self.filter.score(&facet) {
                                    facet.weight = w;
                                    facets.push(facet);
                                    if facets.len() >= self.config.max_facets {
                                        warn!(limit = self.config.max_facets, "facet bound reached");
                                        errors.push(RecoverableError::CombinatorialOverflow {
                                            stage: "facets",
                                            bound: "maxFacets",
                                            limit: self.config.max_facets,
                                        });
                                        return facets;
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        facets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FinderConfig;
    use crate::filter::facet_filter;
    use crate::test_utils::axial_hits_on;
    use crate::trajectory::HelixParams;
    use approx::assert_abs_diff_eq;

    #[test]
    fn facet_on_true_track_has_small_chi2_and_right_sides() {
        let track = HelixParams::new_2d(0.002, 0.3, 0.0);
        let hits = axial_hits_on(&track, 3, 0.3);
        let fit = fit_facet(&hits[0], &hits[1], &hits[2]).unwrap();
        assert!(fit.chi2 < 1.0, "chi2 = {}", fit.chi2);
        // axial_hits_on alternates left / right starting on the left
        assert_eq!(
            fit.right_left,
            [RightLeft::Left, RightLeft::Right, RightLeft::Left]
        );
        assert_abs_diff_eq!(fit.tangent[0], 0.3f64.cos(), epsilon = 0.02);
    }

    #[test]
    fn displaced_middle_hit_fails_chi2_filter() {
        let track = HelixParams::new_2d(0.0, 1.0, 0.0);
        let mut hits = axial_hits_on(&track, 3, 0.2);
        hits[1].ref_pos[0] += 0.5;
        let cfg = FinderConfig::default();
        let filter = facet_filter("chi2", &cfg).unwrap();
        let fit = fit_facet(&hits[0], &hits[1], &hits[2]).unwrap();
        assert!(fit.chi2 > cfg.facets.chi2_cut);

        let status = HitStatusTable::new(hits.len());
        let ranks = axial_layer_ranks(&hits);
        let mut errors = Vec::new();
        let facets = FacetBuilder::new(&cfg.facets, filter.as_ref()).apply(&hits, &status, &ranks, &mut errors);
        assert!(facets.is_empty());

        let permissive = facet_filter("all", &cfg).unwrap();
        let facets = FacetBuilder::new(&cfg.facets, permissive.as_ref()).apply(&hits, &status, &ranks, &mut errors);
        assert_eq!(facets.len(), 1);
    }

    #[test]
    fn builder_uses_strictly_increasing_ranks_and_available_hits() {
        let track = HelixParams::new_2d(-0.003, 2.0, 0.0);
        let hits = axial_hits_on(&track, 6, 0.25);
        let cfg = FinderConfig::default();
        let filter = facet_filter("chi2", &cfg).unwrap();
        let mut status = HitStatusTable::new(hits.len());
        let ranks = axial_layer_ranks(&hits);
        let mut errors = Vec::new();
        let builder = FacetBuilder::new(&cfg.facets, filter.as_ref());

        let facets = builder.apply(&hits, &status, &ranks, &mut errors);
        // gap 1: one facet per starting rank
        assert_eq!(facets.len(), 4);
        for f in &facets {
            assert!(f.ranks[0] < f.ranks[1] && f.ranks[1] < f.ranks[2]);
        }

        status.set_taken(HitId(2), true);
        let facets = builder.apply(&hits, &status, &ranks, &mut errors);
        assert!(facets.iter().all(|f| !f.hits.contains(&HitId(2))));
        assert!(errors.is_empty());
    }

    #[test]
    fn facet_bound_truncates() {
        let track = HelixParams::new_2d(0.0, 0.0, 0.0);
        let hits = axial_hits_on(&track, 8, 0.2);
        let mut cfg = FinderConfig::default();
        cfg.facets.max_facets = 2;
        let filter = facet_filter("all", &cfg).unwrap();
        let mut errors = Vec::new();
        let facets = FacetBuilder::new(&cfg.facets, filter.as_ref()).apply(
            &hits,
            &HitStatusTable::new(hits.len()),
            &axial_layer_ranks(&hits),
            &mut errors,
        );
        assert_eq!(facets.len(), 2);
        assert!(errors[0].is_overflow());
    }
}
