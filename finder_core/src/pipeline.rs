//! Pipeline orchestrator: the full finding sequence for one event.
//!
//! # Processing steps per event
//! 1. Prepare hits (geometry lookup, drift lengths, background flags)
//! 2. Axial Hough search on all available axial hits
//! 3. Post-process the Hough candidates (fit, merge, append)
//! 4. Facet linker on the axial hits the Hough stage left
//! 5. Event-T0 extraction (optional), correcting drift lengths in place
//! 6. Stereo combination (sz line fit)
//! 7. CKF extension into the silicon layers (optional)
//! 8. Overlap resolution
//!
//! # Design choices
//! - [`TrackFinder`] owns the validated configuration, the collaborators
//!   and the named filters resolved once at construction. It keeps no
//!   per-event state, so `process_event` takes `&self` and one finder can
//!   serve parallel workers.
//! - Recoverable failures are collected in [`EventDiagnostics`]; nothing
//!   inside an event aborts the event.

use crate::{
    automaton::FacetLinker,
    candidate::{Origin, TrackCandidate},
    ckf::{CkfSearch, CkfStats},
    config::FinderConfig,
    detector::{DetectorGeometry, MagneticField},
    error::{ConfigError, RecoverableError},
    event_t0::{EventT0Extractor, T0Estimate},
    facet::Facet,
    filter::{ckf_state_filter, facet_filter, relation_filter, Filter, RelationCandidate, StateCandidate},
    hit_preparer::HitPreparer,
    hough::AxialHoughFinder,
    overlap::{OverlapPolicyKind, OverlapResolver},
    postprocess::{fit_candidate, CandidatePostprocessor},
    stereo::StereoCombiner,
    trajectory::HelixParams,
    types::{RawEvent, SpacePoint, WireHit},
};
use serde::Serialize;
use std::time::Instant;
use tracing::debug;

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Counts and timings of one event.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EventDiagnostics {
    pub dropped_hits: usize,
    pub dropped_space_points: usize,
    pub background_hits: usize,
    pub hough_boxes: usize,
    pub hough_candidates: usize,
    pub merged_candidates: usize,
    pub facets: usize,
    pub relations: usize,
    pub segments: usize,
    pub stereo_with_z: usize,
    pub ckf: CkfCounts,
    pub overlap_removed: usize,
    /// Failures recovered inside the event
    #[serde(skip)]
    pub recoverable: Vec<RecoverableError>,
    pub n_recoverable: usize,
    /// Timings in microseconds
    pub timing_prepare_us: u64,
    pub timing_hough_us: u64,
    pub timing_postprocess_us: u64,
    pub timing_automaton_us: u64,
    pub timing_t0_us: u64,
    pub timing_stereo_us: u64,
    pub timing_ckf_us: u64,
    pub timing_overlap_us: u64,
}

/// Serializable copy of [`CkfStats`].
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct CkfCounts {
    pub seeds: usize,
    pub extended: usize,
    pub nodes: usize,
    pub pruned: usize,
}

impl From<CkfStats> for CkfCounts {
    fn from(s: CkfStats) -> Self {
        Self {
            seeds: s.seeds,
            extended: s.extended,
            nodes: s.nodes,
            pruned: s.pruned,
        }
    }
}

impl EventDiagnostics {
    pub fn count_overflows(&self) -> usize {
        self.recoverable.iter().filter(|e| e.is_overflow()).count()
    }
}

/// Result of one event.
#[derive(Clone, Debug, Serialize)]
pub struct EventOutput {
    pub event_number: u64,
    /// Final candidates by descending quality
    pub candidates: Vec<TrackCandidate>,
    /// Prepared hits; drift lengths are T0-corrected when T0 was extracted
    pub hits: Vec<WireHit>,
    pub space_points: Vec<SpacePoint>,
    pub t0: Option<T0Estimate>,
    pub diagnostics: EventDiagnostics,
    /// Wall-clock time of processing
    pub total_time_us: u64,
}

// ---------------------------------------------------------------------------
// Finder
// ---------------------------------------------------------------------------

pub struct TrackFinder<G, F> {
    config: FinderConfig,
    geometry: G,
    field: F,
    facet_filter: Box<dyn Filter<Facet>>,
    relation_filter: Box<dyn for<'r> Filter<RelationCandidate<'r>>>,
    ckf_filter: Box<dyn Filter<StateCandidate>>,
    ckf_inner_filter: Box<dyn Filter<StateCandidate>>,
    overlap_policy: OverlapPolicyKind,
}

impl<G: DetectorGeometry, F: MagneticField> TrackFinder<G, F> {
    /// Validate `config` and resolve every named selection.
    pub fn new(config: FinderConfig, geometry: G, field: F) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            facet_filter: facet_filter(&config.facet_filter, &config)?,
            relation_filter: relation_filter(&config.facet_relation_filter, &config)?,
            ckf_filter: ckf_state_filter(&config.ckf_state_filter, &config)?,
            ckf_inner_filter: ckf_state_filter(&config.ckf_inner_state_filter, &config)?,
            overlap_policy: OverlapPolicyKind::from_name(&config.overlap_policy)?,
            config,
            geometry,
            field,
        })
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }

    pub fn geometry(&self) -> &G {
        &self.geometry
    }

    /// Run the full sequence on one event.
    pub fn process_event(&self, raw: &RawEvent) -> EventOutput {
        let start_total = Instant::now();
        let cfg = &self.config;
        let mut diag = EventDiagnostics::default();
        let mut errors: Vec<RecoverableError> = Vec::new();

        // -----------------------------------------------------------------
        // Step 1: Hit preparation
        // -----------------------------------------------------------------
        let t0 = Instant::now();
        let prepared = HitPreparer::new(&cfg.preparation, cfg.event_t0).apply(raw, &self.geometry, &mut errors);
        diag.dropped_hits = prepared.dropped_hits;
        diag.dropped_space_points = prepared.dropped_space_points;
        diag.background_hits = prepared.n_background();
        let mut hits = prepared.hits;
        let space_points = prepared.space_points;
        let mut status = prepared.status;
        diag.timing_prepare_us = t0.elapsed().as_micros() as u64;

        // -----------------------------------------------------------------
        // Step 2: Axial Hough search
        // -----------------------------------------------------------------
        let t0 = Instant::now();
        let hough = AxialHoughFinder::new(&cfg.hough, cfg.min_track_hits, cfg.reconstruct_curler);
        let (hough_cands, hough_stats) = hough.apply(&hits, &mut status, &self.geometry, &self.field, &mut errors);
        diag.hough_boxes = hough_stats.boxes;
        diag.hough_candidates = hough_stats.candidates;
        let mut candidates: Vec<TrackCandidate> = hough_cands
            .into_iter()
            .map(|c| TrackCandidate::new(c.hits, HelixParams::new_2d(c.curvature, c.phi0, 0.0), Origin::Hough))
            .collect();
        diag.timing_hough_us = t0.elapsed().as_micros() as u64;

        // -----------------------------------------------------------------
        // Step 3: Post-processing of the Hough candidates
        // -----------------------------------------------------------------
        let t0 = Instant::now();
        let n_before = candidates.len();
        CandidatePostprocessor::new(&cfg.postprocess, cfg.fit_tracks, cfg.merge_tracks, cfg.append_hits)
            .apply(&mut candidates, &hits, &mut status, &mut errors);
        diag.merged_candidates = n_before - candidates.len();
        diag.timing_postprocess_us = t0.elapsed().as_micros() as u64;

        // -----------------------------------------------------------------
        // Step 4: Facet linker on the leftover axial hits
        // -----------------------------------------------------------------
        let t0 = Instant::now();
        let linker = FacetLinker::new(&cfg.facets, self.facet_filter.as_ref(), self.relation_filter.as_ref());
        let (segments, linker_stats) = linker.apply(&hits, &status, &mut errors);
        diag.facets = linker_stats.facets;
        diag.relations = linker_stats.relations;
        diag.segments = linker_stats.segments;
        for segment in segments {
            if segment.hits.len() < cfg.min_track_hits {
                continue;
            }
            let mut cand = TrackCandidate::new(segment.hits, HelixParams::default(), Origin::Automaton);
            match fit_candidate(&mut cand, &hits, None, cfg.postprocess.refit_passes) {
                Ok(()) => {
                    status.take_all(&cand.hits);
                    cand.sort_hits(&hits);
                    candidates.push(cand);
                }
                Err(e) => errors.push(e),
            }
        }
        diag.timing_automaton_us = t0.elapsed().as_micros() as u64;

        // -----------------------------------------------------------------
        // Step 5: Event T0
        // -----------------------------------------------------------------
        let t0 = Instant::now();
        let t0_estimate = if cfg.extract_t0 {
            EventT0Extractor {
                max_iterations: cfg.max_iterations,
                minimal_delta_t0: cfg.minimal_delta_t0,
                event_t0: cfg.event_t0,
                refit_passes: cfg.postprocess.refit_passes,
            }
            .apply(&mut candidates, &mut hits, &mut errors)
        } else {
            None
        };
        diag.timing_t0_us = t0.elapsed().as_micros() as u64;

        // -----------------------------------------------------------------
        // Step 6: Stereo combination
        // -----------------------------------------------------------------
        let t0 = Instant::now();
        let stereo = StereoCombiner::new(&cfg.stereo).apply(&mut candidates, &hits, &mut status, &mut errors);
        diag.stereo_with_z = stereo.with_z;
        diag.timing_stereo_us = t0.elapsed().as_micros() as u64;

        // -----------------------------------------------------------------
        // Step 7: CKF into the silicon layers
        // -----------------------------------------------------------------
        let t0 = Instant::now();
        if cfg.extend_to_silicon && !space_points.is_empty() {
            let search = CkfSearch::new(cfg, self.ckf_filter.as_ref(), self.ckf_inner_filter.as_ref());
            let stats = search.apply(&mut candidates, &hits, &space_points, &self.geometry, &self.field, &mut errors);
            diag.ckf = stats.into();
        }
        diag.timing_ckf_us = t0.elapsed().as_micros() as u64;

        // -----------------------------------------------------------------
        // Step 8: Overlap resolution
        // -----------------------------------------------------------------
        let t0 = Instant::now();
        let n_before = candidates.len();
        let candidates = OverlapResolver::new(self.overlap_policy, &cfg.overlap).apply(candidates, &mut errors);
        diag.overlap_removed = n_before - candidates.len();
        diag.timing_overlap_us = t0.elapsed().as_micros() as u64;

        diag.n_recoverable = errors.len();
        diag.recoverable = errors;
        let total_time_us = start_total.elapsed().as_micros() as u64;
        debug!(
            event = raw.event_number,
            candidates = candidates.len(),
            recoverable = diag.n_recoverable,
            total_time_us,
            "event processed"
        );

        EventOutput {
            event_number: raw.event_number,
            candidates,
            hits,
            space_points,
            t0: t0_estimate,
            diagnostics: diag,
            total_time_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ConstantField, TestGeometry};
    use crate::types::{ChannelId, RawWireHit};

    fn finder(config: FinderConfig) -> Result<TrackFinder<TestGeometry, ConstantField>, ConfigError> {
        TrackFinder::new(config, TestGeometry::default(), ConstantField(1.5))
    }

    #[test]
    fn unknown_names_fail_construction() {
        let bad_filter = FinderConfig {
            facet_filter: "mystery".into(),
            ..Default::default()
        };
        assert!(matches!(finder(bad_filter), Err(ConfigError::UnknownName { .. })));

        let bad_policy = FinderConfig {
            overlap_policy: "random".into(),
            ..Default::default()
        };
        assert!(matches!(finder(bad_policy), Err(ConfigError::UnknownName { .. })));

        let bad_range = FinderConfig {
            min_track_hits: 1,
            ..Default::default()
        };
        assert!(matches!(finder(bad_range), Err(ConfigError::OutOfRange { .. })));
    }

    #[test]
    fn empty_event_gives_empty_output() {
        let f = finder(FinderConfig::default()).unwrap();
        let out = f.process_event(&RawEvent {
            event_number: 42,
            ..Default::default()
        });
        assert_eq!(out.event_number, 42);
        assert!(out.candidates.is_empty());
        assert!(out.diagnostics.recoverable.is_empty());
        assert!(out.t0.is_none());
    }

    #[test]
    fn geometry_errors_are_recovered() {
        let f = finder(FinderConfig::default()).unwrap();
        let out = f.process_event(&RawEvent {
            event_number: 1,
            wire_hits: vec![RawWireHit {
                channel: ChannelId::new(500, 0),
                layer: 500,
                drift_time: 10.0,
                adc: 50,
            }],
            space_points: Vec::new(),
        });
        assert_eq!(out.diagnostics.dropped_hits, 1);
        assert_eq!(out.diagnostics.n_recoverable, 1);
        assert!(out.diagnostics.recoverable[0].is_geometry());
        assert!(out.hits.is_empty());
    }

    #[test]
    fn diagnostics_serialize_without_error_values() {
        let f = finder(FinderConfig::default()).unwrap();
        let out = f.process_event(&RawEvent::default());
        let json = serde_json::to_value(&out.diagnostics).unwrap();
        assert!(json.get("recoverable").is_none());
        assert!(json.get("timing_hough_us").is_some());
    }
}
