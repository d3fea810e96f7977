//! Facet graph and cellular automaton (FacetLinker).
//!
//! # Algorithm
//! 1. Facets of the hits left by the Hough stage are built by
//!    [`FacetBuilder`].
//! 2. Relations A → B are proposed when B starts 1..=1+layerJump ranks after
//!    A ends; the relation filter weighs them or returns the reject sentinel.
//! 3. Cell states: `state = 1 + max(state of accepted predecessors)`,
//!    evaluated in increasing first-rank order (a topological order because
//!    every relation strictly increases the rank).
//! 4. Extraction: the unused facet with the highest state ends the longest
//!    path; it is traced back through predecessors with state exactly one
//!    lower, choosing the heaviest relation. The path's facets and every
//!    facet sharing one of its hits become unusable, states are recomputed
//!    and extraction repeats while the best state ≥ `minChainLength`.

use crate::config::FacetConfig;
use crate::error::RecoverableError;
use crate::facet::{axial_layer_ranks, Facet, FacetBuilder};
use crate::filter::{Filter, RelationCandidate};
use crate::types::{HitId, HitStatusTable, Weight, WireHit};
use tracing::debug;

/// Directed edge of the facet graph.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Relation {
    pub from: usize,
    pub to: usize,
    pub weight: Weight,
}

/// Facets and relations of one event, relations grouped by target facet.
#[derive(Clone, Debug, Default)]
pub struct FacetGraph {
    pub facets: Vec<Facet>,
    pub relations: Vec<Relation>,
    /// Relation indices ending at each facet
    incoming: Vec<Vec<usize>>,
}

/// Ordered chain of facets and the hits they cover.
#[derive(Clone, Debug)]
pub struct Segment {
    pub facets: Vec<usize>,
    pub hits: Vec<HitId>,
}

fn angle_between(a: [f64; 2], b: [f64; 2]) -> f64 {
    let cos = (a[0] * b[0] + a[1] * b[1]).clamp(-1.0, 1.0);
    cos.acos()
}

impl FacetGraph {
    /// Propose and weigh every relation between `facets`.
    pub fn build(
        mut facets: Vec<Facet>,
        hits: &[WireHit],
        layer_jump: usize,
        filter: &dyn for<'r> Filter<RelationCandidate<'r>>,
    ) -> Self {
        facets.sort_by(|a, b| {
            a.first_rank()
                .cmp(&b.first_rank())
                .then(a.ranks.cmp(&b.ranks))
                .then(a.hits.cmp(&b.hits))
        });
        let mut relations = Vec::new();
        let mut incoming = vec![Vec::new(); facets.len()];

        for (ia, a) in facets.iter().enumerate() {
            let lo = a.last_rank() + 1;
            let hi = a.last_rank() + 1 + layer_jump;
            // facets are sorted by first rank: skip straight to the window
            let start = facets.partition_point(|f| f.first_rank() < lo);
            for (ib, b) in facets.iter().enumerate().skip(start) {
                if b.first_rank() > hi {
                    break;
                }
                let last = &hits[a.hits[2].0];
                let first = &hits[b.hits[0].0];
                let gap = [first.ref_pos[0] - a.end[0], first.ref_pos[1] - a.end[1]];
                let forward = gap[0] * a.tangent[0] + gap[1] * a.tangent[1] > 0.0;
                let candidate = RelationCandidate {
                    from: a,
                    to: b,
                    layer_step: b.first_rank() - a.last_rank(),
                    distance: (first.ref_pos[0] - last.ref_pos[0])
                        .hypot(first.ref_pos[1] - last.ref_pos[1]),
                    tangent_angle: if forward {
                        angle_between(a.tangent, b.tangent)
                    } else {
                        std::f64::consts::PI
                    },
                };
                let weight = filter.score(&candidate);
                incoming[ib].push(relations.len());
                relations.push(Relation {
                    from: ia,
                    to: ib,
                    weight,
                });
            }
        }

        Self {
            facets,
            relations,
            incoming,
        }
    }

    pub fn n_accepted_relations(&self) -> usize {
        self.relations.iter().filter(|r| !r.weight.is_rejected()).count()
    }

    fn accepted_incoming(&self, facet: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.incoming[facet].iter().filter_map(|&ri| {
            let rel = &self.relations[ri];
            rel.weight.value().map(|w| (rel.from, w))
        })
    }

    /// Cell states of the usable facets (0 for unusable ones).
    pub fn compute_states(&self, usable: &[bool]) -> Vec<usize> {
        let mut state = vec![0usize; self.facets.len()];
        // index order is increasing first rank, predecessors come first
        for f in 0..self.facets.len() {
            if !usable[f] {
                continue;
            }
            let best_pred = self
                .accepted_incoming(f)
                .filter(|&(from, _)| usable[from])
                .map(|(from, _)| state[from])
                .max()
                .unwrap_or(0);
            state[f] = best_pred + 1;
        }
        state
    }

    /// Longest path ending at `end`, traced back through predecessors whose
    /// state is exactly one lower, preferring the heaviest relation.
    pub fn trace_back(&self, end: usize, state: &[usize], usable: &[bool]) -> Vec<usize> {
        let mut path = vec![end];
        let mut current = end;
        while state[current] > 1 {
            let wanted = state[current] - 1;
            let next = self
                .accepted_incoming(current)
                .filter(|&(from, _)| usable[from] && state[from] == wanted)
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(from, _)| from);
            match next {
                Some(prev) => {
                    path.push(prev);
                    current = prev;
                }
                None => break,
            }
        }
        path.reverse();
        path
    }

    /// Repeatedly extract the longest chain.
    pub fn extract_segments(&self, min_chain_length: usize) -> Vec<Segment> {
        let n = self.facets.len();
        let mut usable = vec![true; n];
        let mut segments = Vec::new();

        for _ in 0..n {
            let state = self.compute_states(&usable);
            let Some(end) = (0..n)
                .filter(|&f| usable[f])
                .max_by(|&a, &b| state[a].cmp(&state[b]).then(b.cmp(&a)))
            else {
                break;
            };
            if state[end] < min_chain_length {
                break;
            }

            let path = self.trace_back(end, &state, &usable);
            let mut hits: Vec<HitId> = Vec::with_capacity(3 * path.len());
            for &f in &path {
                for h in self.facets[f].hits {
                    if !hits.contains(&h) {
                        hits.push(h);
                    }
                }
            }
            for f in 0..n {
                if usable[f] && self.facets[f].hits.iter().any(|h| hits.contains(h)) {
                    usable[f] = false;
                }
            }
            segments.push(Segment { facets: path, hits });
        }
        segments
    }
}

/// Counts reported by one linker run.
#[derive(Clone, Copy, Debug, Default)]
pub struct LinkerStats {
    pub facets: usize,
    pub relations: usize,
    pub accepted_relations: usize,
    pub segments: usize,
}

/// Builds segments from the axial hits the Hough stage left.
pub struct FacetLinker<'a> {
    config: &'a FacetConfig,
    facet_filter: &'a dyn Filter<Facet>,
    relation_filter: &'a dyn for<'r> Filter<RelationCandidate<'r>>,
}

impl<'a> FacetLinker<'a> {
    pub fn new(
        config: &'a FacetConfig,
        facet_filter: &'a dyn Filter<Facet>,
        relation_filter: &'a dyn for<'r> Filter<RelationCandidate<'r>>,
    ) -> Self {
        Self {
            config,
            facet_filter,
            relation_filter,
        }
    }

    pub fn apply(
        &self,
        hits: &[WireHit],
        status: &HitStatusTable,
        errors: &mut Vec<RecoverableError>,
    ) -> (Vec<Segment>, LinkerStats) {
        let ranks = axial_layer_ranks(hits);
        let facets = FacetBuilder::new(self.config, self.facet_filter).apply(hits, status, &ranks, errors);
        let graph = FacetGraph::build(facets, hits, self.config.layer_jump, self.relation_filter);
        let segments = graph.extract_segments(self.config.min_chain_length);

        let stats = LinkerStats {
            facets: graph.facets.len(),
            relations: graph.relations.len(),
            accepted_relations: graph.n_accepted_relations(),
            segments: segments.len(),
        };
        debug!(
            facets = stats.facets,
            relations = stats.relations,
            accepted = stats.accepted_relations,
            segments = stats.segments,
            "facet linker"
        );
        (segments, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FinderConfig;
    use crate::filter::{facet_filter, relation_filter};
    use crate::test_utils::{axial_hits_on, facet_with_chi2};
    use crate::trajectory::HelixParams;

    fn chain_facet(first_rank: usize, hit_base: usize) -> Facet {
        let mut f = facet_with_chi2(0.5);
        f.ranks = [first_rank, first_rank + 1, first_rank + 2];
        f.hits = [HitId(hit_base), HitId(hit_base + 1), HitId(hit_base + 2)];
        let x = 20.0 + first_rank as f64;
        f.start = [x, 0.0];
        f.end = [x + 2.0, 0.0];
        f
    }

    fn straight_hits(n: usize) -> Vec<WireHit> {
        axial_hits_on(&HelixParams::new_2d(0.0, 0.0, 0.0), n, 0.0)
    }

    #[test]
    fn path_length_equals_terminal_state() {
        let cfg = FinderConfig::default();
        let rel = relation_filter("simple", &cfg).unwrap();
        let hits = straight_hits(12);
        let facets = vec![chain_facet(0, 0), chain_facet(3, 3), chain_facet(6, 6), chain_facet(9, 9)];
        let graph = FacetGraph::build(facets, &hits, cfg.facets.layer_jump, rel.as_ref());

        let usable = vec![true; graph.facets.len()];
        let state = graph.compute_states(&usable);
        assert_eq!(state, vec![1, 2, 3, 4]);
        let path = graph.trace_back(3, &state, &usable);
        assert_eq!(path.len(), state[3]);
        assert_eq!(path, vec![0, 1, 2, 3]);

        let segments = graph.extract_segments(2);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].hits.len(), 12);
    }

    #[test]
    fn rejected_relation_breaks_the_chain() {
        let mut cfg = FinderConfig::default();
        let hits = straight_hits(12);
        let mut bent = chain_facet(3, 3);
        bent.tangent = [0.8, 0.6];
        let facets = vec![chain_facet(0, 0), bent.clone()];

        let rel = relation_filter("simple", &cfg).unwrap();
        let graph = FacetGraph::build(facets.clone(), &hits, cfg.facets.layer_jump, rel.as_ref());
        assert_eq!(graph.relations.len(), 1);
        assert!(graph.relations[0].weight.is_rejected());
        assert_eq!(graph.compute_states(&[true, true]), vec![1, 1]);

        // loosening the tangent bound accepts the same relation
        cfg.facets.max_tangent_angle = 1.0;
        let rel = relation_filter("simple", &cfg).unwrap();
        let graph = FacetGraph::build(facets, &hits, cfg.facets.layer_jump, rel.as_ref());
        assert!(!graph.relations[0].weight.is_rejected());
    }

    #[test]
    fn highest_weight_predecessor_wins() {
        let cfg = FinderConfig::default();
        let rel = relation_filter("simple", &cfg).unwrap();
        let hits = straight_hits(12);
        let mut weak = chain_facet(0, 6);
        weak.weight = 2.1;
        weak.tangent = [0.995, 0.0998];
        let strong = chain_facet(0, 0);
        let end = chain_facet(3, 3);
        let graph = FacetGraph::build(vec![weak, strong, end], &hits, cfg.facets.layer_jump, rel.as_ref());
        let usable = vec![true; 3];
        let state = graph.compute_states(&usable);
        let last = graph.facets.iter().position(|f| f.first_rank() == 3).unwrap();
        let path = graph.trace_back(last, &state, &usable);
        assert_eq!(graph.facets[path[0]].hits[0], HitId(0));
    }

    #[test]
    fn linker_recovers_track_from_hits() {
        let cfg = FinderConfig::default();
        let ff = facet_filter(&cfg.facet_filter, &cfg).unwrap();
        let rf = relation_filter(&cfg.facet_relation_filter, &cfg).unwrap();
        let hits = axial_hits_on(&HelixParams::new_2d(0.004, -0.5, 0.0), 12, 0.3);
        let linker = FacetLinker::new(&cfg.facets, ff.as_ref(), rf.as_ref());
        let mut errors = Vec::new();
        let (segments, stats) = linker.apply(&hits, &HitStatusTable::new(hits.len()), &mut errors);
        assert!(stats.facets >= 4);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].hits.len() >= 9);
        let mut unique = segments[0].hits.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), segments[0].hits.len());
    }
}
