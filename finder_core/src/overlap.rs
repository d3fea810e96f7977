//! Overlap resolution between candidates that share measurements.
//!
//! # Policies
//! - `greedy` (default): descending quality; a candidate is accepted only if
//!   none of its wire hits or space points is already claimed.
//! - `global`: candidates are grouped into conflict components (union-find
//!   over shared measurements). Components up to `maxComponentSize` are
//!   solved exactly for the largest total quality of a conflict-free subset;
//!   larger ones fall back to greedy and are reported as an overflow.

use crate::candidate::TrackCandidate;
use crate::config::OverlapConfig;
use crate::error::{ConfigError, RecoverableError};
use crate::types::{HitId, SpacePointId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Union-Find (path halving + union by rank)
// ---------------------------------------------------------------------------

pub struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        match self.rank[rx].cmp(&self.rank[ry]) {
            std::cmp::Ordering::Less => self.parent[rx] = ry,
            std::cmp::Ordering::Greater => self.parent[ry] = rx,
            std::cmp::Ordering::Equal => {
                self.parent[ry] = rx;
                self.rank[rx] += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapPolicyKind {
    Greedy,
    Global,
}

impl OverlapPolicyKind {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "greedy" => Ok(OverlapPolicyKind::Greedy),
            "global" => Ok(OverlapPolicyKind::Global),
            _ => Err(ConfigError::UnknownName {
                kind: "overlap policy",
                name: name.to_string(),
                known: "greedy, global".to_string(),
            }),
        }
    }
}

/// Quality first, then more measurements, then lower first hit id.
fn by_rank(a: &TrackCandidate, b: &TrackCandidate) -> std::cmp::Ordering {
    b.quality
        .total_cmp(&a.quality)
        .then(b.n_measurements().cmp(&a.n_measurements()))
        .then(a.hits.first().cmp(&b.hits.first()))
        .then(a.space_points.first().cmp(&b.space_points.first()))
}

#[derive(Default)]
struct Claims {
    hits: HashSet<HitId>,
    space_points: HashSet<SpacePointId>,
}

impl Claims {
    fn is_free(&self, c: &TrackCandidate) -> bool {
        !c.hits.iter().any(|h| self.hits.contains(h))
            && !c.space_points.iter().any(|s| self.space_points.contains(s))
    }

    fn claim(&mut self, c: &TrackCandidate) {
        self.hits.extend(c.hits.iter().copied());
        self.space_points.extend(c.space_points.iter().copied());
    }
}

pub struct OverlapResolver {
    policy: OverlapPolicyKind,
    max_component_size: usize,
}

impl OverlapResolver {
    pub fn new(policy: OverlapPolicyKind, config: &OverlapConfig) -> Self {
        Self {
            policy,
            max_component_size: config.max_component_size,
        }
    }

    /// Conflict-free subset of `candidates`, ordered by descending quality.
    pub fn apply(
        &self,
        mut candidates: Vec<TrackCandidate>,
        errors: &mut Vec<RecoverableError>,
    ) -> Vec<TrackCandidate> {
        candidates.sort_by(by_rank);
        let n_in = candidates.len();
        let mut out = match self.policy {
            OverlapPolicyKind::Greedy => greedy(candidates),
            OverlapPolicyKind::Global => self.global(candidates, errors),
        };
        out.sort_by(by_rank);
        debug!(input = n_in, output = out.len(), policy = ?self.policy, "overlap resolved");
        out
    }

    fn global(
        &self,
        candidates: Vec<TrackCandidate>,
        errors: &mut Vec<RecoverableError>,
    ) -> Vec<TrackCandidate> {
        let n = candidates.len();
        let mut uf = UnionFind::new(n);
        let mut hit_owner: HashMap<HitId, usize> = HashMap::new();
        let mut sp_owner: HashMap<SpacePointId, usize> = HashMap::new();
        for (k, c) in candidates.iter().enumerate() {
            for &h in &c.hits {
                if let Some(&other) = hit_owner.get(&h) {
                    uf.union(k, other);
                } else {
                    hit_owner.insert(h, k);
                }
            }
            for &s in &c.space_points {
                if let Some(&other) = sp_owner.get(&s) {
                    uf.union(k, other);
                } else {
                    sp_owner.insert(s, k);
                }
            }
        }

        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for k in 0..n {
            components.entry(uf.find(k)).or_default().push(k);
        }

        let mut keep = vec![false; n];
        for members in components.values() {
            if members.len() == 1 {
                keep[members[0]] = true;
                continue;
            }
            let chosen = if members.len() <= self.max_component_size {
                best_disjoint_subset(&candidates, members)
            } else {
                warn!(size = members.len(), "conflict component too large, using greedy");
                errors.push(RecoverableError::CombinatorialOverflow {
                    stage: "overlap",
                    bound: "maxComponentSize",
                    limit: self.max_component_size,
                });
                let mut claims = Claims::default();
                let mut chosen = Vec::new();
                // members are in rank order since candidates were sorted
                for &k in members {
                    if claims.is_free(&candidates[k]) {
                        claims.claim(&candidates[k]);
                        chosen.push(k);
                    }
                }
                chosen
            };
            for k in chosen {
                keep[k] = true;
            }
        }

        candidates
            .into_iter()
            .zip(keep)
            .filter_map(|(c, keep)| keep.then_some(c))
            .collect()
    }
}

fn greedy(candidates: Vec<TrackCandidate>) -> Vec<TrackCandidate> {
    let mut claims = Claims::default();
    let mut out = Vec::new();
    for c in candidates {
        if claims.is_free(&c) {
            claims.claim(&c);
            out.push(c);
        }
    }
    out
}

/// Exact maximum-quality conflict-free subset of `members` (branch and bound
/// over conflict bitmasks).
fn best_disjoint_subset(candidates: &[TrackCandidate], members: &[usize]) -> Vec<usize> {
    let k = members.len();
    let conflicts: Vec<u64> = (0..k)
        .map(|i| {
            (0..k)
                .filter(|&j| j != i && candidates[members[i]].shares_measurements(&candidates[members[j]]))
                .fold(0u64, |mask, j| mask | (1 << j))
        })
        .collect();
    let quality: Vec<f64> = members.iter().map(|&m| candidates[m].quality).collect();
    // suffix sums bound what the remaining candidates can add
    let mut remaining = vec![0.0; k + 1];
    for i in (0..k).rev() {
        remaining[i] = remaining[i + 1] + quality[i];
    }

    struct Search<'a> {
        conflicts: &'a [u64],
        quality: &'a [f64],
        remaining: &'a [f64],
        best_mask: u64,
        best_value: f64,
    }

    impl Search<'_> {
        fn visit(&mut self, i: usize, mask: u64, value: f64) {
            if value > self.best_value {
                self.best_value = value;
                self.best_mask = mask;
            }
            if i == self.quality.len() || value + self.remaining[i] <= self.best_value {
                return;
            }
            if self.conflicts[i] & mask == 0 {
                self.visit(i + 1, mask | (1 << i), value + self.quality[i]);
            }
            self.visit(i + 1, mask, value);
        }
    }

    let mut search = Search {
        conflicts: &conflicts,
        quality: &quality,
        remaining: &remaining,
        best_mask: 0,
        best_value: f64::NEG_INFINITY,
    };
    search.visit(0, 0, 0.0);

    (0..k)
        .filter(|&i| search.best_mask & (1 << i) != 0)
        .map(|i| members[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Origin;
    use crate::trajectory::HelixParams;

    fn cand(hits: &[usize], quality: f64) -> TrackCandidate {
        let mut c = TrackCandidate::new(hits.iter().map(|&h| HitId(h)).collect(), HelixParams::default(), Origin::Hough);
        c.quality = quality;
        c
    }

    fn hit_sets(cands: &[TrackCandidate]) -> Vec<Vec<usize>> {
        cands.iter().map(|c| c.hits.iter().map(|h| h.0).collect()).collect()
    }

    #[test]
    fn union_find_groups() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(3, 4);
        uf.union(1, 4);
        assert_eq!(uf.find(0), uf.find(3));
        assert_ne!(uf.find(0), uf.find(2));
    }

    #[test]
    fn unknown_policy_is_config_error() {
        assert!(OverlapPolicyKind::from_name("random").is_err());
        assert_eq!(OverlapPolicyKind::from_name("global").unwrap(), OverlapPolicyKind::Global);
    }

    #[test]
    fn greedy_keeps_best_of_conflicting_pair() {
        let resolver = OverlapResolver::new(OverlapPolicyKind::Greedy, &OverlapConfig::default());
        let mut errors = Vec::new();
        let out = resolver.apply(vec![cand(&[1, 2, 3], 2.0), cand(&[3, 4, 5], 5.0), cand(&[7, 8], 1.0)], &mut errors);
        assert_eq!(hit_sets(&out), vec![vec![3, 4, 5], vec![7, 8]]);
    }

    #[test]
    fn global_beats_greedy_on_chain_conflict() {
        // middle candidate conflicts with both neighbours
        let input = vec![cand(&[1, 2], 3.0), cand(&[2, 3], 4.0), cand(&[3, 4], 3.0)];
        let mut errors = Vec::new();
        let greedy = OverlapResolver::new(OverlapPolicyKind::Greedy, &OverlapConfig::default())
            .apply(input.clone(), &mut errors);
        let global = OverlapResolver::new(OverlapPolicyKind::Global, &OverlapConfig::default())
            .apply(input, &mut errors);
        assert_eq!(greedy.len(), 1);
        assert_eq!(hit_sets(&global), vec![vec![1, 2], vec![3, 4]]);
        assert!(errors.is_empty());
    }

    #[test]
    fn oversized_component_falls_back_to_greedy() {
        let input: Vec<TrackCandidate> = (0..5).map(|i| cand(&[i, i + 1], 1.0 + i as f64)).collect();
        let mut errors = Vec::new();
        let out = OverlapResolver::new(OverlapPolicyKind::Global, &OverlapConfig { max_component_size: 3 })
            .apply(input, &mut errors);
        assert!(errors.iter().any(|e| e.is_overflow()));
        let mut all: Vec<usize> = hit_sets(&out).concat();
        let n = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), n);
    }

    #[test]
    fn idempotent_on_disjoint_sets() {
        for policy in [OverlapPolicyKind::Greedy, OverlapPolicyKind::Global] {
            let resolver = OverlapResolver::new(policy, &OverlapConfig::default());
            let mut errors = Vec::new();
            let input = vec![cand(&[1, 2, 3], 2.0), cand(&[1, 9], 3.0), cand(&[4, 5], 1.0)];
            let once = resolver.apply(input, &mut errors);
            let twice = resolver.apply(once.clone(), &mut errors);
            assert_eq!(hit_sets(&once), hit_sets(&twice));
        }
    }
}
