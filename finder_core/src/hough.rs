//! Recursive parameter-space search on axial hits (AxialHoughFinder).
//!
//! # Parameter space
//! Circles through the origin are described by their signed curvature ω and
//! the direction φ0 at the origin. A wire at (r, φh) with drift length d is
//! compatible with every (ω, φ) on the two curves
//!
//! ω(φ) = (2r·sin(φh − φ) ± 2d) / (r² − d²)
//!
//! each widened by `bandSigma · 2σ / (r² − d²)`.
//!
//! # Design choices
//! - Boxes live in a per-event arena ([`HoughTree`]); children are stored
//!   contiguously and referenced by an index range.
//! - Depth-first search with an explicit stack, no recursion.
//! - Box/band intersection uses the exact range of the sinusoid over the
//!   box's φ interval (end points plus interior extrema).

use crate::config::HoughConfig;
use crate::detector::{curvature_from_pt, DetectorGeometry, MagneticField};
use crate::error::RecoverableError;
use crate::types::{wrap_angle, HitId, HitStatusTable, WireHit};
use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, TAU};
use std::ops::Range;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Box arena
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct HoughBox {
    pub omega: [f64; 2],
    pub phi: [f64; 2],
    pub level: usize,
    pub parent: Option<usize>,
    /// Index range of the children in the arena (empty if not subdivided)
    pub children: Range<usize>,
    /// Hits voting for this box; cleared once the box is subdivided
    pub hits: Vec<HitId>,
}

impl HoughBox {
    pub fn center(&self) -> (f64, f64) {
        (
            0.5 * (self.omega[0] + self.omega[1]),
            0.5 * (self.phi[0] + self.phi[1]),
        )
    }
}

/// Arena of every box created for one event.
#[derive(Clone, Debug, Default)]
pub struct HoughTree {
    pub boxes: Vec<HoughBox>,
}

impl HoughTree {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn children(&self, index: usize) -> &[HoughBox] {
        &self.boxes[self.boxes[index].children.clone()]
    }
}

/// Split `[lo, hi]` into `n` equal parts; the last boundary is `hi` exactly.
fn split(lo: f64, hi: f64, n: usize, i: usize) -> f64 {
    if i == n {
        hi
    } else {
        lo + (hi - lo) * i as f64 / n as f64
    }
}

// ---------------------------------------------------------------------------
// Hit bands
// ---------------------------------------------------------------------------

/// Range of sin(x) for x in [lo, hi].
fn sin_range(lo: f64, hi: f64) -> (f64, f64) {
    let (a, b) = (lo.sin(), hi.sin());
    let mut min = a.min(b);
    let mut max = a.max(b);
    if contains_angle(lo, hi, FRAC_PI_2) {
        max = 1.0;
    }
    if contains_angle(lo, hi, -FRAC_PI_2) {
        min = -1.0;
    }
    (min, max)
}

/// True if `c + 2πk` lies in [lo, hi] for some integer k.
fn contains_angle(lo: f64, hi: f64, c: f64) -> bool {
    let k = ((lo - c) / TAU).ceil();
    c + k * TAU <= hi
}

/// A hit in conformal form.
#[derive(Clone, Copy, Debug)]
struct HitBand {
    r: f64,
    phi: f64,
    drift: f64,
    /// r² − d²
    denom: f64,
    width: f64,
}

impl HitBand {
    fn new(hit: &WireHit, band_sigma: f64) -> Self {
        let r = hit.ref_r();
        let denom = (r * r - hit.drift_length * hit.drift_length).max(1e-9);
        Self {
            r,
            phi: hit.ref_phi(),
            drift: hit.drift_length,
            denom,
            width: band_sigma * 2.0 * hit.drift_sigma,
        }
    }

    /// True if one of the two widened curves passes through the box.
    fn intersects(&self, omega: [f64; 2], phi: [f64; 2]) -> bool {
        let (smin, smax) = sin_range(self.phi - phi[1], self.phi - phi[0]);
        let lo = 2.0 * self.r * smin;
        let hi = 2.0 * self.r * smax;
        [1.0, -1.0].iter().any(|sign| {
            let shift = sign * 2.0 * self.drift;
            let band_lo = (lo + shift - self.width) / self.denom;
            let band_hi = (hi + shift + self.width) / self.denom;
            band_lo <= omega[1] && band_hi >= omega[0]
        })
    }

    /// True if the hit lies ahead of the direction φ for some φ in the box.
    fn ahead(&self, phi: [f64; 2]) -> bool {
        // cos(φh − φ) = sin(φh − φ + π/2)
        let (_, max) = sin_range(self.phi - phi[1] + FRAC_PI_2, self.phi - phi[0] + FRAC_PI_2);
        max > 0.0
    }
}

// ---------------------------------------------------------------------------
// Finder
// ---------------------------------------------------------------------------

/// Raw candidate of the parameter-space search.
#[derive(Clone, Debug)]
pub struct HoughCandidate {
    pub hits: Vec<HitId>,
    pub curvature: f64,
    pub phi0: f64,
}

/// Counts reported by one search.
#[derive(Clone, Copy, Debug, Default)]
pub struct HoughStats {
    pub boxes: usize,
    pub leaves: usize,
    pub candidates: usize,
}

pub struct AxialHoughFinder<'a> {
    config: &'a HoughConfig,
    min_track_hits: usize,
    reconstruct_curler: bool,
}

impl<'a> AxialHoughFinder<'a> {
    pub fn new(config: &'a HoughConfig, min_track_hits: usize, reconstruct_curler: bool) -> Self {
        Self {
            config,
            min_track_hits,
            reconstruct_curler,
        }
    }

    /// Curvature bound of the root box.
    pub fn max_curvature(&self, geometry: &dyn DetectorGeometry, field: &dyn MagneticField) -> f64 {
        if self.reconstruct_curler {
            return self.config.curler_max_curvature;
        }
        let bz = field.bz([0.0, 0.0, 0.0]);
        let leave_chamber = 2.0 / geometry.outer_radius();
        if bz.abs() < 1e-9 {
            leave_chamber
        } else {
            curvature_from_pt(self.config.min_pt, bz).min(leave_chamber)
        }
    }

    /// Depth-first search; returns the arena and the qualifying leaves.
    pub fn search(
        &self,
        hits: &[WireHit],
        status: &HitStatusTable,
        max_curvature: f64,
        errors: &mut Vec<RecoverableError>,
    ) -> (HoughTree, Vec<usize>) {
        let bands: HashMap<HitId, HitBand> = hits
            .iter()
            .filter(|h| h.axial && status.is_available(h.id))
            .map(|h| (h.id, HitBand::new(h, self.config.band_sigma)))
            .collect();
        let mut root_hits: Vec<HitId> = bands.keys().copied().collect();
        root_hits.sort_unstable();

        let mut tree = HoughTree::default();
        let mut leaves = Vec::new();
        if root_hits.len() < self.config.min_box_hits {
            return (tree, leaves);
        }
        tree.boxes.push(HoughBox {
            omega: [-max_curvature, max_curvature],
            phi: [0.0, TAU],
            level: 0,
            parent: None,
            children: 0..0,
            hits: root_hits,
        });

        let n = self.config.branching;
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            let level = tree.boxes[index].level;
            if level >= self.config.max_level {
                leaves.push(index);
                continue;
            }
            if tree.boxes.len() + n * n > self.config.max_boxes {
                warn!(limit = self.config.max_boxes, "hough box bound reached, search truncated");
                errors.push(RecoverableError::CombinatorialOverflow {
                    stage: "hough",
                    bound: "maxBoxes",
                    limit: self.config.max_boxes,
                });
                break;
            }

            let parent_hits = std::mem::take(&mut tree.boxes[index].hits);
            let (omega, phi) = (tree.boxes[index].omega, tree.boxes[index].phi);
            let first_child = tree.boxes.len();
            for i in 0..n {
                let w = [split(omega[0], omega[1], n, i), split(omega[0], omega[1], n, i + 1)];
                for j in 0..n {
                    let p = [split(phi[0], phi[1], n, j), split(phi[0], phi[1], n, j + 1)];
                    let child_hits: Vec<HitId> = parent_hits
                        .iter()
                        .copied()
                        .filter(|id| {
                            let band = &bands[id];
                            band.intersects(w, p) && (self.reconstruct_curler || band.ahead(p))
                        })
                        .collect();
                    tree.boxes.push(HoughBox {
                        omega: w,
                        phi: p,
                        level: level + 1,
                        parent: Some(index),
                        children: 0..0,
                        hits: child_hits,
                    });
                }
            }
            let children = first_child..tree.boxes.len();
            tree.boxes[index].children = children.clone();
            // reversed so the first child is explored first
            for child in children.rev() {
                if tree.boxes[child].hits.len() >= self.config.min_box_hits {
                    stack.push(child);
                }
            }
        }
        (tree, leaves)
    }

    /// Merge leaves that describe the same track.
    pub fn merge_leaves(&self, tree: &HoughTree, leaves: &[usize]) -> Vec<HoughCandidate> {
        let n = leaves.len();
        let mut uf = crate::overlap::UnionFind::new(n);

        for a in 0..n {
            let (wa, pa) = tree.boxes[leaves[a]].center();
            for b in (a + 1)..n {
                let (wb, pb) = tree.boxes[leaves[b]].center();
                if (wa - wb).abs() <= self.config.merge_curvature_tolerance
                    && wrap_angle(pa - pb).abs() <= self.config.merge_phi_tolerance
                {
                    uf.union(a, b);
                }
            }
        }

        // shared-hit counts through the inverted index hit → leaves
        let mut by_hit: HashMap<HitId, Vec<usize>> = HashMap::new();
        for (k, &leaf) in leaves.iter().enumerate() {
            for &h in &tree.boxes[leaf].hits {
                by_hit.entry(h).or_default().push(k);
            }
        }
        let mut shared: HashMap<(usize, usize), usize> = HashMap::new();
        for owners in by_hit.values() {
            for (i, &a) in owners.iter().enumerate() {
                for &b in &owners[i + 1..] {
                    *shared.entry((a.min(b), a.max(b))).or_default() += 1;
                }
            }
        }
        for (&(a, b), &count) in &shared {
            let smaller = tree.boxes[leaves[a]].hits.len().min(tree.boxes[leaves[b]].hits.len());
            if count as f64 >= self.config.merge_hit_fraction * smaller as f64 {
                uf.union(a, b);
            }
        }

        let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
        for k in 0..n {
            groups.entry(uf.find(k)).or_default().push(k);
        }
        let mut candidates: Vec<HoughCandidate> = groups
            .into_values()
            .map(|members| {
                let mut hits: Vec<HitId> = Vec::new();
                let (mut sw, mut sum_w, mut sum_c, mut sum_s) = (0.0, 0.0, 0.0, 0.0);
                let reference = tree.boxes[leaves[members[0]]].center().1;
                for &k in &members {
                    let b = &tree.boxes[leaves[k]];
                    let (w, p) = b.center();
                    let weight = b.hits.len() as f64;
                    sw += weight;
                    sum_w += weight * w;
                    // average directions relative to the first member
                    let dp = wrap_angle(p - reference);
                    sum_c += weight * dp.cos();
                    sum_s += weight * dp.sin();
                    hits.extend_from_slice(&b.hits);
                }
                hits.sort_unstable();
                hits.dedup();
                HoughCandidate {
                    hits,
                    curvature: sum_w / sw,
                    phi0: wrap_angle(reference + sum_s.atan2(sum_c)),
                }
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.hits
                .len()
                .cmp(&a.hits.len())
                .then(a.phi0.total_cmp(&b.phi0))
        });
        candidates
    }

    /// Full stage: search, merge, minimum size, take hits.
    pub fn apply(
        &self,
        hits: &[WireHit],
        status: &mut HitStatusTable,
        geometry: &dyn DetectorGeometry,
        field: &dyn MagneticField,
        errors: &mut Vec<RecoverableError>,
    ) -> (Vec<HoughCandidate>, HoughStats) {
        let max_curvature = self.max_curvature(geometry, field);
        let (tree, leaves) = self.search(hits, status, max_curvature, errors);
        let merged = self.merge_leaves(&tree, &leaves);

        let mut accepted = Vec::new();
        for mut cand in merged {
            cand.hits.retain(|&h| status.is_available(h));
            if cand.hits.len() < self.min_track_hits {
                continue;
            }
            status.take_all(&cand.hits);
            accepted.push(cand);
        }

        let stats = HoughStats {
            boxes: tree.len(),
            leaves: leaves.len(),
            candidates: accepted.len(),
        };
        debug!(
            boxes = stats.boxes,
            leaves = stats.leaves,
            candidates = stats.candidates,
            max_curvature,
            "hough search"
        );
        (accepted, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{Origin, TrackCandidate};
    use crate::config::FinderConfig;
    use crate::overlap::{OverlapPolicyKind, OverlapResolver};
    use crate::test_utils::{axial_hits_on, ConstantField, TestGeometry};
    use crate::trajectory::HelixParams;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sin_range_includes_interior_extrema() {
        let (lo, hi) = sin_range(0.0, 3.0);
        assert_abs_diff_eq!(hi, 1.0);
        assert_abs_diff_eq!(lo, 0.0);
        let (lo, _) = sin_range(-7.0, -4.0);
        // -π/2 - 2π ≈ -7.85 is outside, -π/2 ≈ -1.57 too
        assert!(lo > -1.0);
        let (lo, hi) = sin_range(4.0, 5.0);
        assert_abs_diff_eq!(lo, -1.0);
        assert_abs_diff_eq!(hi, 4.0f64.sin().max(5.0f64.sin()));
    }

    #[test]
    fn children_partition_parent_at_every_depth() {
        let cfg = FinderConfig::default();
        let track = HelixParams::new_2d(0.005, 1.2, 0.0);
        let hits = axial_hits_on(&track, 20, 0.3);
        let finder = AxialHoughFinder::new(&cfg.hough, cfg.min_track_hits, false);
        let mut errors = Vec::new();
        let (tree, _) = finder.search(&hits, &HitStatusTable::new(hits.len()), 0.02, &mut errors);
        assert!(tree.len() > 1);

        for b in tree.boxes.iter().filter(|b| !b.children.is_empty()) {
            let children = &tree.boxes[b.children.clone()];
            assert_eq!(children.len(), cfg.hough.branching * cfg.hough.branching);
            let area: f64 = children
                .iter()
                .map(|c| (c.omega[1] - c.omega[0]) * (c.phi[1] - c.phi[0]))
                .sum();
            let parent_area = (b.omega[1] - b.omega[0]) * (b.phi[1] - b.phi[0]);
            assert_abs_diff_eq!(area, parent_area, epsilon = parent_area * 1e-12);
            for c in children {
                assert!(c.omega[0] >= b.omega[0] && c.omega[1] <= b.omega[1]);
                assert!(c.phi[0] >= b.phi[0] && c.phi[1] <= b.phi[1]);
                assert_eq!(c.level, b.level + 1);
            }
            // shared boundaries are bit-identical
            let n = cfg.hough.branching;
            for i in 0..n {
                for j in 0..n - 1 {
                    assert_eq!(children[i * n + j].phi[1], children[i * n + j + 1].phi[0]);
                }
            }
            assert_eq!(children[0].omega[0], b.omega[0]);
            assert_eq!(children[n * n - 1].omega[1], b.omega[1]);
        }
    }

    #[test]
    fn single_circle_lands_in_one_leaf_with_all_hits() {
        let cfg = FinderConfig::default();
        let track = HelixParams::new_2d(-0.004, 2.2, 0.0);
        let hits = axial_hits_on(&track, 16, 0.25);
        let finder = AxialHoughFinder::new(&cfg.hough, cfg.min_track_hits, false);
        let mut errors = Vec::new();
        let (tree, leaves) = finder.search(&hits, &HitStatusTable::new(hits.len()), 0.02, &mut errors);
        assert!(leaves.iter().any(|&l| tree.boxes[l].hits.len() == hits.len()));

        let mut status = HitStatusTable::new(hits.len());
        let (cands, stats) = finder.apply(&hits, &mut status, &TestGeometry::default(), &ConstantField(1.5), &mut errors);
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].hits.len(), hits.len());
        assert_abs_diff_eq!(cands[0].curvature, -0.004, epsilon = 5e-4);
        assert!(wrap_angle(cands[0].phi0 - 2.2).abs() < 0.05);
        assert_eq!(status.count_taken(), hits.len());
        assert!(stats.boxes > stats.leaves);
        assert!(errors.is_empty());
    }

    #[test]
    fn separated_circles_give_disjoint_candidates() {
        let cfg = FinderConfig::default();
        let mut hits = axial_hits_on(&HelixParams::new_2d(0.003, 0.5, 0.0), 16, 0.25);
        let n_first = hits.len();
        for (k, mut h) in axial_hits_on(&HelixParams::new_2d(-0.004, 3.6, 0.0), 16, 0.25)
            .into_iter()
            .enumerate()
        {
            h.id = HitId(n_first + k);
            h.raw_index = n_first + k;
            hits.push(h);
        }
        let finder = AxialHoughFinder::new(&cfg.hough, cfg.min_track_hits, false);
        let mut status = HitStatusTable::new(hits.len());
        let mut errors = Vec::new();
        let (found, _) = finder.apply(&hits, &mut status, &TestGeometry::default(), &ConstantField(1.5), &mut errors);
        let candidates: Vec<TrackCandidate> = found
            .into_iter()
            .map(|c| TrackCandidate::new(c.hits, HelixParams::new_2d(c.curvature, c.phi0, 0.0), Origin::Hough))
            .collect();

        let resolved = OverlapResolver::new(OverlapPolicyKind::Greedy, &cfg.overlap).apply(candidates, &mut errors);
        assert_eq!(resolved.len(), 2);
        let mut circles: Vec<bool> = resolved
            .iter()
            .map(|c| {
                let first = c.hits.iter().all(|h| h.0 < n_first);
                assert!(first || c.hits.iter().all(|h| h.0 >= n_first), "mixed candidate");
                assert!(c.hits.len() >= cfg.hough.min_box_hits);
                first
            })
            .collect();
        circles.sort_unstable();
        assert_eq!(circles, vec![false, true]);
        let mut all: Vec<HitId> = resolved.iter().flat_map(|c| c.hits.iter().copied()).collect();
        let n = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), n);
        assert!(errors.is_empty());
    }

    #[test]
    fn box_bound_truncates_search() {
        let mut cfg = FinderConfig::default();
        cfg.hough.max_boxes = 9;
        let hits = axial_hits_on(&HelixParams::new_2d(0.001, 0.0, 0.0), 16, 0.2);
        let finder = AxialHoughFinder::new(&cfg.hough, cfg.min_track_hits, false);
        let mut errors = Vec::new();
        let (tree, leaves) = finder.search(&hits, &HitStatusTable::new(hits.len()), 0.02, &mut errors);
        assert!(tree.len() <= 9);
        assert!(leaves.is_empty());
        assert!(errors.iter().any(|e| e.is_overflow()));
    }

    #[test]
    fn taken_hits_do_not_vote() {
        let cfg = FinderConfig::default();
        let hits = axial_hits_on(&HelixParams::new_2d(0.002, 0.7, 0.0), 16, 0.2);
        let mut status = HitStatusTable::new(hits.len());
        for h in &hits[..10] {
            status.set_taken(h.id, true);
        }
        let finder = AxialHoughFinder::new(&cfg.hough, cfg.min_track_hits, false);
        let mut errors = Vec::new();
        let (tree, leaves) = finder.search(&hits, &status, 0.02, &mut errors);
        assert!(tree.is_empty());
        assert!(leaves.is_empty());
    }
}
