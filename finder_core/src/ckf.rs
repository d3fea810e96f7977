//! Combinatorial Kalman filter: extension of candidates into the silicon
//! layers as a tree search.
//!
//! # Algorithm per seed
//! 1. The seed state is the candidate's helix with covariance from
//!    `ckf.seedSigma` (z uncertainties widened for 2D candidates).
//! 2. Silicon layers inside the innermost wire hit are visited inwards.
//! 3. A node is extrapolated to the next layer (Newton crossing of the
//!    cylinder), the covariance inflated by multiple scattering, and every
//!    space point in the preselection window is tried as a Kalman update.
//! 4. Each update is scored by the state filter for the layer (inner filter
//!    for layers ≤ `toggleOnLayer`). Rejected updates, and accepted ones
//!    beyond the best `useNStates`, become pruned nodes.
//! 5. If a layer yields no accepted child, up to `hitJumping` further layers
//!    are tried. A node without children is finalized.
//!
//! The best finalized node (most hits, then largest weight) defines the
//! result. All nodes live in one arena ([`CkfTree`]) and point to their
//! parent by index.

use crate::candidate::{Origin, TrackCandidate};
use crate::config::{CkfConfig, FinderConfig};
use crate::detector::{DetectorGeometry, MagneticField, SiliconLayerGeometry};
use crate::error::RecoverableError;
use crate::filter::{Filter, StateCandidate};
use crate::kf::{
    cylinder_crossing, cylinder_measurement, to_params, to_state, HelixKalmanFilter, KalmanFilter,
    MaterialCrossing, StateCov, StateVec,
};
use crate::trajectory::HelixParams;
use crate::types::{wrap_angle, SpacePoint, SpacePointId, Weight, WireHit};
use nalgebra::{Matrix2, Vector2, Vector5};
use std::collections::HashMap;
use tracing::{debug, warn};

/// z0 / tanλ seed uncertainties of candidates without sz fit.
const UNKNOWN_Z_SIGMA: [f64; 2] = [1.0, 20.0];

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CkfStage {
    Seeded,
    Extrapolated,
    Updated,
    Finalized,
    Pruned,
}

#[derive(Clone, Debug)]
pub struct CkfNode {
    pub parent: Option<usize>,
    /// Position in the inward layer list of the search
    pub layer_index: Option<usize>,
    pub space_point: Option<SpacePointId>,
    pub state: StateVec,
    pub cov: StateCov,
    /// Arc length of the crossing with this node's layer
    pub arc_length: f64,
    pub chi2: f64,
    /// Sum of the filter weights along the branch
    pub weight: f64,
    pub n_hits: usize,
    pub stage: CkfStage,
}

#[derive(Clone, Debug, Default)]
pub struct CkfTree {
    pub nodes: Vec<CkfNode>,
}

impl CkfTree {
    pub fn children_of(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(move |(_, n)| n.parent == Some(index))
            .map(|(i, _)| i)
    }

    /// Node indices from the root to `index`.
    pub fn path(&self, index: usize) -> Vec<usize> {
        let mut path = vec![index];
        let mut current = index;
        while let Some(parent) = self.nodes[current].parent {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }

    pub fn count(&self, stage: CkfStage) -> usize {
        self.nodes.iter().filter(|n| n.stage == stage).count()
    }
}

/// Search tree of one seed and its best finalized node.
#[derive(Clone, Debug)]
pub struct CkfResult {
    pub tree: CkfTree,
    /// Best finalized node with at least one space point
    pub best: Option<usize>,
}

impl CkfResult {
    /// Space points of the best branch, innermost first.
    pub fn space_points(&self) -> Vec<SpacePointId> {
        let Some(best) = self.best else {
            return Vec::new();
        };
        let mut ids: Vec<SpacePointId> = self
            .tree
            .path(best)
            .into_iter()
            .filter_map(|i| self.tree.nodes[i].space_point)
            .collect();
        ids.reverse();
        ids
    }
}

/// Counts reported by one CKF run.
#[derive(Clone, Copy, Debug, Default)]
pub struct CkfStats {
    pub seeds: usize,
    pub extended: usize,
    pub nodes: usize,
    pub pruned: usize,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

pub struct CkfSearch<'a> {
    config: &'a CkfConfig,
    hit_jumping: usize,
    use_n_states: usize,
    toggle_on_layer: i32,
    outer_filter: &'a dyn Filter<StateCandidate>,
    inner_filter: &'a dyn Filter<StateCandidate>,
    kf: HelixKalmanFilter,
}

/// Tentative child before the `useNStates` selection.
struct Child {
    space_point: SpacePointId,
    state: StateVec,
    cov: StateCov,
    arc_length: f64,
    chi2: f64,
    weight: Weight,
}

impl<'a> CkfSearch<'a> {
    pub fn new(
        config: &'a FinderConfig,
        outer_filter: &'a dyn Filter<StateCandidate>,
        inner_filter: &'a dyn Filter<StateCandidate>,
    ) -> Self {
        Self {
            config: &config.ckf,
            hit_jumping: config.hit_jumping,
            use_n_states: config.use_n_states,
            toggle_on_layer: config.toggle_on_layer,
            outer_filter,
            inner_filter,
            kf: HelixKalmanFilter,
        }
    }

    fn filter_for(&self, layer: u16) -> &dyn Filter<StateCandidate> {
        if self.toggle_on_layer >= 0 && i32::from(layer) <= self.toggle_on_layer {
            self.inner_filter
        } else {
            self.outer_filter
        }
    }

    /// Seed covariance for `params`.
    pub fn seed_cov(&self, has_z: bool) -> StateCov {
        let mut sigma = self.config.seed_sigma;
        if !has_z {
            sigma[3] = sigma[3].max(UNKNOWN_Z_SIGMA[0]);
            sigma[4] = sigma[4].max(UNKNOWN_Z_SIGMA[1]);
        }
        StateCov::from_diagonal(&Vector5::from(sigma.map(|s| s * s)))
    }

    /// Try every space point of `layer` as an update of `node`.
    fn expand_layer(
        &self,
        node: &CkfNode,
        layer: &SiliconLayerGeometry,
        points: &[&SpacePoint],
        field: &dyn MagneticField,
    ) -> Vec<Child> {
        let Some(crossing) = cylinder_crossing(&node.state, layer.radius) else {
            return Vec::new();
        };
        // inwards: strictly decreasing arc length, not far behind the perigee
        if !(crossing.arc_length < node.arc_length)
            || crossing.arc_length < -self.config.direction_tolerance
        {
            return Vec::new();
        }
        let material = self.config.include_material.then(|| MaterialCrossing {
            radiation_length: layer.radiation_length,
            bz: field.bz(crossing.position),
        });
        let (state, cov) = self.kf.predict(&node.state, &node.cov, material);

        let phi = crossing.position[1].atan2(crossing.position[0]);
        let s = crossing.arc_length;
        let z_sigma = (cov[(4, 4)] + s * s * cov[(3, 3)]).sqrt();
        let window = self.config.preselection_window;
        let r = Matrix2::from_diagonal(&Vector2::new(
            layer.sigma_rphi * layer.sigma_rphi,
            layer.sigma_z * layer.sigma_z,
        ));
        let filter = self.filter_for(layer.layer);

        points
            .iter()
            .filter(|sp| {
                let dphi = wrap_angle(sp.phi() - phi);
                (layer.radius * dphi).abs() <= window
                    && (sp.position[2] - crossing.position[2]).abs() <= window + 3.0 * z_sigma
            })
            .filter_map(|sp| {
                let (residual, h, _) = cylinder_measurement(&state, layer.radius, sp.position)?;
                let update = self.kf.update(&state, &cov, &residual, &h, &r)?;
                let weight = filter.score(&StateCandidate {
                    layer: layer.layer,
                    chi2: update.chi2,
                    distance: residual[0].abs(),
                });
                Some(Child {
                    space_point: sp.id,
                    state: update.state,
                    cov: update.cov,
                    arc_length: s,
                    chi2: update.chi2,
                    weight,
                })
            })
            .collect()
    }

    /// Finalize `index` and every open node once the tree holds `maxNodes`.
    fn stop_at_node_bound(
        &self,
        tree: &mut CkfTree,
        index: usize,
        stack: &mut Vec<usize>,
        errors: &mut Vec<RecoverableError>,
    ) {
        warn!(limit = self.config.max_nodes, "CKF node bound reached");
        errors.push(RecoverableError::CombinatorialOverflow {
            stage: "ckf",
            bound: "maxNodes",
            limit: self.config.max_nodes,
        });
        tree.nodes[index].stage = CkfStage::Finalized;
        for rest in stack.drain(..) {
            tree.nodes[rest].stage = CkfStage::Finalized;
        }
    }

    /// Tree search for one seed. The tree never holds more than `maxNodes`
    /// nodes.
    #[allow(clippy::too_many_arguments)]
    pub fn search(
        &self,
        seed: &HelixParams,
        seed_cov: StateCov,
        start_arc_length: f64,
        layers: &[&SiliconLayerGeometry],
        points_by_layer: &HashMap<u16, Vec<&SpacePoint>>,
        field: &dyn MagneticField,
        errors: &mut Vec<RecoverableError>,
    ) -> CkfResult {
        let mut tree = CkfTree::default();
        tree.nodes.push(CkfNode {
            parent: None,
            layer_index: None,
            space_point: None,
            state: to_state(seed),
            cov: seed_cov,
            arc_length: start_arc_length,
            chi2: 0.0,
            weight: 0.0,
            n_hits: 0,
            stage: CkfStage::Seeded,
        });

        let no_points: Vec<&SpacePoint> = Vec::new();
        let mut stack = vec![0usize];
        while let Some(index) = stack.pop() {
            if tree.nodes.len() >= self.config.max_nodes {
                self.stop_at_node_bound(&mut tree, index, &mut stack, errors);
                break;
            }
            if tree.nodes[index].n_hits >= self.config.max_depth {
                tree.nodes[index].stage = CkfStage::Finalized;
                continue;
            }

            let next = tree.nodes[index].layer_index.map_or(0, |l| l + 1);
            let last = (next + self.hit_jumping + 1).min(layers.len());
            let mut children = Vec::new();
            let mut child_layer = next;
            for li in next..last {
                let points = points_by_layer.get(&layers[li].layer).unwrap_or(&no_points);
                children = self.expand_layer(&tree.nodes[index], layers[li], points, field);
                child_layer = li;
                if children.iter().any(|c| !c.weight.is_rejected()) {
                    break;
                }
            }

            let (mut accepted, rejected): (Vec<Child>, Vec<Child>) =
                children.into_iter().partition(|c| !c.weight.is_rejected());
            accepted.sort_by(|a, b| {
                let (wa, wb) = (a.weight.value().unwrap_or(0.0), b.weight.value().unwrap_or(0.0));
                wb.total_cmp(&wa).then(a.space_point.cmp(&b.space_point))
            });
            let keep = if self.use_n_states == 0 {
                accepted.len()
            } else {
                self.use_n_states.min(accepted.len())
            };

            let parent = &tree.nodes[index];
            let (base_chi2, base_weight, base_hits) = (parent.chi2, parent.weight, parent.n_hits);
            tree.nodes[index].stage = if keep == 0 {
                CkfStage::Finalized
            } else {
                CkfStage::Extrapolated
            };

            let dropped = accepted.split_off(keep);
            let mut bound_reached = false;
            for (child, stage) in accepted
                .into_iter()
                .map(|c| (c, CkfStage::Updated))
                .chain(dropped.into_iter().chain(rejected).map(|c| (c, CkfStage::Pruned)))
            {
                if tree.nodes.len() >= self.config.max_nodes {
                    bound_reached = true;
                    break;
                }
                let new_index = tree.nodes.len();
                tree.nodes.push(CkfNode {
                    parent: Some(index),
                    layer_index: Some(child_layer),
                    space_point: Some(child.space_point),
                    state: child.state,
                    cov: child.cov,
                    arc_length: child.arc_length,
                    chi2: base_chi2 + child.chi2,
                    weight: base_weight + child.weight.value().unwrap_or(0.0),
                    n_hits: base_hits + 1,
                    stage,
                });
                if stage == CkfStage::Updated {
                    stack.push(new_index);
                }
            }
            if bound_reached {
                self.stop_at_node_bound(&mut tree, index, &mut stack, errors);
                break;
            }
        }

        let best = tree
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.stage == CkfStage::Finalized && n.n_hits > 0)
            .max_by(|(ia, a), (ib, b)| {
                a.n_hits
                    .cmp(&b.n_hits)
                    .then(a.weight.total_cmp(&b.weight))
                    .then(ib.cmp(ia))
            })
            .map(|(i, _)| i);
        CkfResult { tree, best }
    }

    /// Extend every candidate into the silicon layers.
    pub fn apply(
        &self,
        candidates: &mut [TrackCandidate],
        hits: &[WireHit],
        space_points: &[SpacePoint],
        geometry: &dyn DetectorGeometry,
        field: &dyn MagneticField,
        errors: &mut Vec<RecoverableError>,
    ) -> CkfStats {
        let mut points_by_layer: HashMap<u16, Vec<&SpacePoint>> = HashMap::new();
        for sp in space_points {
            points_by_layer.entry(sp.layer).or_default().push(sp);
        }
        let mut stats = CkfStats::default();

        for cand in candidates.iter_mut() {
            let Some(start_radius) = cand
                .hits
                .iter()
                .map(|h| hits[h.0].ref_r())
                .min_by(|a, b| a.total_cmp(b))
            else {
                continue;
            };
            let start_arc = cand
                .hits
                .iter()
                .map(|h| cand.params.arc_length_to(hits[h.0].ref_pos))
                .fold(f64::INFINITY, f64::min);

            let mut layers: Vec<&SiliconLayerGeometry> = geometry
                .silicon_layers()
                .iter()
                .filter(|l| l.radius < start_radius)
                .collect();
            layers.sort_by(|a, b| b.radius.total_cmp(&a.radius));
            if layers.is_empty() {
                continue;
            }

            stats.seeds += 1;
            let result = self.search(
                &cand.params,
                self.seed_cov(cand.has_z),
                start_arc,
                &layers,
                &points_by_layer,
                field,
                errors,
            );
            stats.nodes += result.tree.nodes.len();
            stats.pruned += result.tree.count(CkfStage::Pruned);

            if let Some(best) = result.best {
                let node = &result.tree.nodes[best];
                let mut params = to_params(&node.state);
                if !cand.has_z && node.n_hits < 2 {
                    // a single space point does not fix the sz line
                    params.tan_lambda = cand.params.tan_lambda;
                    params.z0 = cand.params.z0;
                }
                cand.has_z |= node.n_hits >= 2;
                cand.params = params;
                cand.space_points = result.space_points();
                cand.origin = Origin::Ckf;
                cand.update_quality();
                stats.extended += 1;
            }
        }
        debug!(
            seeds = stats.seeds,
            extended = stats.extended,
            nodes = stats.nodes,
            pruned = stats.pruned,
            "ckf"
        );
        stats
    }
}
