//! Finder configuration.
//!
//! One [`FinderConfig`] value is built (or loaded from JSON), validated once,
//! and handed by reference to every stage constructor. JSON keys are
//! camelCase (`minTrackHits`, `useNStates`, ...); missing keys keep their
//! defaults.

use crate::error::ConfigError;
use crate::filter;
use crate::overlap::OverlapPolicyKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration of the track finder.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FinderConfig {
    /// Minimum number of axial hits of a 2D candidate
    pub min_track_hits: usize,
    /// Search the high-curvature (curling) part of parameter space
    pub reconstruct_curler: bool,
    /// Fit a circle to candidates instead of using the Hough box centre
    pub fit_tracks: bool,
    /// Merge compatible 2D candidates
    pub merge_tracks: bool,
    /// Append unused compatible axial hits to candidates
    pub append_hits: bool,
    /// Number of silicon layers the CKF may skip in a row
    pub hit_jumping: usize,
    /// Children kept per CKF parent (0 = unlimited)
    pub use_n_states: usize,
    /// Silicon layer index at and below which the inner CKF filter applies
    /// (negative disables the inner filter)
    pub toggle_on_layer: i32,
    /// Iteration bound of the event-T0 extraction
    pub max_iterations: usize,
    /// Convergence threshold of the event-T0 extraction (ns)
    pub minimal_delta_t0: f64,
    /// Run the event-T0 extraction after finding
    pub extract_t0: bool,
    /// Event T0 assumed when converting drift times (ns)
    pub event_t0: f64,
    /// Run the CKF extension into the silicon layers
    pub extend_to_silicon: bool,

    pub facet_filter: String,
    pub facet_relation_filter: String,
    pub ckf_state_filter: String,
    pub ckf_inner_state_filter: String,
    pub overlap_policy: String,

    pub preparation: PreparationConfig,
    pub hough: HoughConfig,
    pub postprocess: PostprocessConfig,
    pub facets: FacetConfig,
    pub stereo: StereoConfig,
    pub ckf: CkfConfig,
    pub overlap: OverlapConfig,
}

impl Default for FinderConfig {
    fn default() -> Self {
        Self {
            min_track_hits: 5,
            reconstruct_curler: false,
            fit_tracks: true,
            merge_tracks: true,
            append_hits: true,
            hit_jumping: 1,
            use_n_states: 5,
            toggle_on_layer: -1,
            max_iterations: 10,
            minimal_delta_t0: 0.2,
            extract_t0: false,
            event_t0: 0.0,
            extend_to_silicon: true,
            facet_filter: "chi2".into(),
            facet_relation_filter: "simple".into(),
            ckf_state_filter: "chi2".into(),
            ckf_inner_state_filter: "chi2".into(),
            overlap_policy: "greedy".into(),
            preparation: PreparationConfig::default(),
            hough: HoughConfig::default(),
            postprocess: PostprocessConfig::default(),
            facets: FacetConfig::default(),
            stereo: StereoConfig::default(),
            ckf: CkfConfig::default(),
            overlap: OverlapConfig::default(),
        }
    }
}

/// Hit preparation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PreparationConfig {
    /// Hits with a smaller pulse height are flagged as background
    pub min_adc: u16,
    /// Allowed deviation of a space point from its layer radius (cm)
    pub radial_tolerance: f64,
}

impl Default for PreparationConfig {
    fn default() -> Self {
        Self {
            min_adc: 0,
            radial_tolerance: 0.5,
        }
    }
}

/// Recursive parameter-space search.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HoughConfig {
    /// Children per axis at each subdivision
    pub branching: usize,
    /// Maximal recursion depth
    pub max_level: usize,
    /// Hits needed for a box to be subdivided / to become a leaf
    pub min_box_hits: usize,
    /// Lower transverse-momentum bound of the search (GeV)
    pub min_pt: f64,
    /// Curvature bound used when curlers are reconstructed (1/cm)
    pub curler_max_curvature: f64,
    /// Band half-width in units of the drift uncertainty
    pub band_sigma: f64,
    /// Total number of boxes allowed per event
    pub max_boxes: usize,
    pub merge_curvature_tolerance: f64,
    pub merge_phi_tolerance: f64,
    /// Leaves sharing at least this fraction of the smaller hit set merge
    pub merge_hit_fraction: f64,
}

impl Default for HoughConfig {
    fn default() -> Self {
        Self {
            branching: 2,
            max_level: 8,
            min_box_hits: 10,
            min_pt: 0.3,
            curler_max_curvature: 0.15,
            band_sigma: 3.0,
            max_boxes: 400_000,
            merge_curvature_tolerance: 5e-4,
            merge_phi_tolerance: 0.03,
            merge_hit_fraction: 0.5,
        }
    }
}

/// Candidate fitting, merging and hit appending.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PostprocessConfig {
    /// Largest χ²/ndf of the combined fit for two candidates to merge
    pub merge_chi2_cut: f64,
    /// Only candidates closer than this in φ0 are tried for merging (rad)
    pub merge_phi_window: f64,
    /// Largest | |dist| − drift | for an appended hit (cm)
    pub append_distance: f64,
    /// Drift-circle refinement passes after the first circle fit
    pub refit_passes: usize,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            merge_chi2_cut: 10.0,
            merge_phi_window: 0.2,
            append_distance: 0.1,
            refit_passes: 2,
        }
    }
}

/// Facet construction and cellular automaton.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FacetConfig {
    /// Largest layer-rank step between consecutive facet hits
    pub max_layer_gap: usize,
    /// Largest transverse distance between consecutive hits (cm)
    pub max_hit_distance: f64,
    /// Facet tangent-consistency χ² cut
    pub chi2_cut: f64,
    /// Additional layer ranks a relation may bridge
    pub layer_jump: usize,
    /// Largest tangent angle between related facets (rad)
    pub max_tangent_angle: f64,
    /// Minimal number of facets in an extracted chain
    pub min_chain_length: usize,
    /// Hard bound on facets per event
    pub max_facets: usize,
}

impl Default for FacetConfig {
    fn default() -> Self {
        Self {
            max_layer_gap: 1,
            max_hit_distance: 8.0,
            chi2_cut: 9.0,
            layer_jump: 1,
            max_tangent_angle: 0.3,
            min_chain_length: 2,
            max_facets: 200_000,
        }
    }
}

/// Stereo hit assignment and sz fit.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StereoConfig {
    /// Residual cut in units of the z uncertainty
    pub residual_cut: f64,
    /// Smallest absolute z residual tolerated by the cut (cm)
    pub min_residual: f64,
    /// Minimal number of stereo hits of a 3D candidate
    pub min_stereo_hits: usize,
    /// Keep candidates without stereo solution as 2D output
    pub demote_on_failure: bool,
    /// Margin on the wire fraction outside [0, 1] still accepted
    pub wire_margin: f64,
    /// |tanλ| range of the drift-side vote
    pub max_tan_lambda: f64,
    /// Number of tanλ bins of the vote
    pub tan_lambda_bins: usize,
    /// |z0| range of the vote (cm)
    pub max_z0: f64,
    /// Width of the z0 window that collects the votes of one line (cm)
    pub vote_window: f64,
}

impl Default for StereoConfig {
    fn default() -> Self {
        Self {
            residual_cut: 4.0,
            min_residual: 1.0,
            min_stereo_hits: 3,
            demote_on_failure: true,
            wire_margin: 0.05,
            max_tan_lambda: 1.5,
            tan_lambda_bins: 150,
            max_z0: 30.0,
            vote_window: 4.0,
        }
    }
}

/// Combinatorial Kalman filter into the silicon layers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CkfConfig {
    /// Maximal number of added space points per branch
    pub max_depth: usize,
    /// χ² cut of the `chi2` state filter
    pub chi2_cut: f64,
    /// Transverse distance cut of the `distance` state filter (cm)
    pub max_distance: f64,
    /// Geometric preselection window around the extrapolation (cm)
    pub preselection_window: f64,
    /// Seed uncertainties: ω, φ0, d0, tanλ, z0
    pub seed_sigma: [f64; 5],
    /// Inflate the covariance by multiple scattering at each layer
    pub include_material: bool,
    /// Tolerance of the directional check on the arc length (cm)
    pub direction_tolerance: f64,
    /// Node bound of one seed's search tree
    pub max_nodes: usize,
}

impl Default for CkfConfig {
    fn default() -> Self {
        Self {
            max_depth: 8,
            chi2_cut: 20.0,
            max_distance: 0.5,
            preselection_window: 3.0,
            seed_sigma: [1e-4, 5e-3, 0.2, 0.02, 1.5],
            include_material: true,
            direction_tolerance: 0.5,
            max_nodes: 20_000,
        }
    }
}

/// Overlap resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OverlapConfig {
    /// Largest conflict component solved exactly by the `global` policy
    pub max_component_size: usize,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            max_component_size: 16,
        }
    }
}

impl FinderConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: FinderConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and resolve every named selection once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_track_hits < 3 {
            return Err(ConfigError::out_of_range(
                "minTrackHits",
                self.min_track_hits,
                "a circle needs at least 3 hits",
            ));
        }
        if !(self.minimal_delta_t0 > 0.0) {
            return Err(ConfigError::out_of_range(
                "minimalDeltaT0",
                self.minimal_delta_t0,
                "must be positive",
            ));
        }
        if self.extract_t0 && self.max_iterations == 0 {
            return Err(ConfigError::out_of_range(
                "maxIterations",
                self.max_iterations,
                "T0 extraction needs at least one iteration",
            ));
        }

        let h = &self.hough;
        if h.branching < 2 {
            return Err(ConfigError::out_of_range(
                "hough.branching",
                h.branching,
                "must split each axis at least in two",
            ));
        }
        if h.max_level == 0 || h.max_level > 20 {
            return Err(ConfigError::out_of_range(
                "hough.maxLevel",
                h.max_level,
                "must be in 1..=20",
            ));
        }
        if h.min_box_hits == 0 {
            return Err(ConfigError::out_of_range(
                "hough.minBoxHits",
                h.min_box_hits,
                "must be positive",
            ));
        }
        if !(h.min_pt > 0.0) {
            return Err(ConfigError::out_of_range("hough.minPt", h.min_pt, "must be positive"));
        }
        if !(h.curler_max_curvature > 0.0) {
            return Err(ConfigError::out_of_range(
                "hough.curlerMaxCurvature",
                h.curler_max_curvature,
                "must be positive",
            ));
        }
        if !(0.0..=1.0).contains(&h.merge_hit_fraction) {
            return Err(ConfigError::out_of_range(
                "hough.mergeHitFraction",
                h.merge_hit_fraction,
                "must be a fraction",
            ));
        }
        if h.max_boxes < h.branching * h.branching + 1 {
            return Err(ConfigError::out_of_range(
                "hough.maxBoxes",
                h.max_boxes,
                "cannot hold a single subdivision",
            ));
        }

        let f = &self.facets;
        if f.max_layer_gap == 0 {
            return Err(ConfigError::out_of_range(
                "facets.maxLayerGap",
                f.max_layer_gap,
                "must be positive",
            ));
        }
        if !(f.chi2_cut > 0.0) {
            return Err(ConfigError::out_of_range("facets.chi2Cut", f.chi2_cut, "must be positive"));
        }
        if f.min_chain_length == 0 {
            return Err(ConfigError::out_of_range(
                "facets.minChainLength",
                f.min_chain_length,
                "must be positive",
            ));
        }

        if self.stereo.min_stereo_hits < 3 {
            return Err(ConfigError::out_of_range(
                "stereo.minStereoHits",
                self.stereo.min_stereo_hits,
                "the leave-one-out line fit needs at least 3 hits",
            ));
        }
        if self.stereo.tan_lambda_bins == 0 {
            return Err(ConfigError::out_of_range(
                "stereo.tanLambdaBins",
                self.stereo.tan_lambda_bins,
                "must be positive",
            ));
        }
        for (name, value) in [
            ("stereo.maxTanLambda", self.stereo.max_tan_lambda),
            ("stereo.maxZ0", self.stereo.max_z0),
            ("stereo.voteWindow", self.stereo.vote_window),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::out_of_range(name, value, "must be positive"));
            }
        }

        let c = &self.ckf;
        if !(c.chi2_cut > 0.0) {
            return Err(ConfigError::out_of_range("ckf.chi2Cut", c.chi2_cut, "must be positive"));
        }
        if c.seed_sigma.iter().any(|s| !(*s > 0.0)) {
            return Err(ConfigError::out_of_range(
                "ckf.seedSigma",
                format!("{:?}", c.seed_sigma),
                "all uncertainties must be positive",
            ));
        }

        if c.max_nodes == 0 {
            return Err(ConfigError::out_of_range("ckf.maxNodes", c.max_nodes, "must be positive"));
        }
        if !(1..=64).contains(&self.overlap.max_component_size) {
            return Err(ConfigError::out_of_range(
                "overlap.maxComponentSize",
                self.overlap.max_component_size,
                "must be in 1..=64",
            ));
        }

        filter::facet_filter(&self.facet_filter, self)?;
        filter::relation_filter(&self.facet_relation_filter, self)?;
        filter::ckf_state_filter(&self.ckf_state_filter, self)?;
        filter::ckf_state_filter(&self.ckf_inner_state_filter, self)?;
        OverlapPolicyKind::from_name(&self.overlap_policy)?;
        Ok(())
    }
}
