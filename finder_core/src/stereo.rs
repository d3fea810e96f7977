//! StereoCombiner: adds stereo wire hits and the sz line to 2D candidates.
//!
//! A stereo wire runs from `backward` to `forward`; its transverse
//! projection crosses the 2D trajectory. For either drift side σ the wire
//! fraction t with signed distance σ·d to the circle is solved in closed
//! form (a quadratic for a circle, linear for a straight line). The crossing
//! gives the arc length s and z = z_b + t·(z_f − z_b); the z uncertainty is
//! the drift uncertainty scaled by |Δz| / |D·n|, D the projected wire
//! direction and n the trajectory normal at the crossing.
//!
//! The mirror option of a hit can sit tens of cm away in z, so sides are
//! resolved by a vote in (tanλ, z0) before any line fit.

use crate::candidate::TrackCandidate;
use crate::config::StereoConfig;
use crate::error::RecoverableError;
use crate::fit::{fit_line_leave_one_out, LineFit, SzPoint};
use crate::trajectory::HelixParams;
use crate::types::{HitId, HitStatusTable, WireHit};
use tracing::debug;

/// sz observation of `hit` for drift side `sign` (+1 = wire left of track).
pub fn wire_crossing(hit: &WireHit, params: &HelixParams, sign: f64, margin: f64) -> Option<SzPoint> {
    let b = [hit.backward[0], hit.backward[1]];
    let d = [hit.forward[0] - b[0], hit.forward[1] - b[1]];
    let signed_drift = sign * hit.drift_length;

    let fractions: Vec<f64> = match params.center() {
        Some(c) => {
            let rho = params.radius() - params.curvature.signum() * signed_drift;
            if rho <= 0.0 {
                return None;
            }
            let bc = [b[0] - c[0], b[1] - c[1]];
            let qa = d[0] * d[0] + d[1] * d[1];
            if qa < 1e-12 {
                return None;
            }
            let qb = 2.0 * (d[0] * bc[0] + d[1] * bc[1]);
            let qc = bc[0] * bc[0] + bc[1] * bc[1] - rho * rho;
            let disc = qb * qb - 4.0 * qa * qc;
            if disc < 0.0 {
                return None;
            }
            let root = disc.sqrt();
            vec![(-qb - root) / (2.0 * qa), (-qb + root) / (2.0 * qa)]
        }
        None => {
            let n = params.normal();
            let p0 = params.perigee();
            let nd = n[0] * d[0] + n[1] * d[1];
            if nd.abs() < 1e-12 {
                return None;
            }
            let offset = n[0] * (b[0] - p0[0]) + n[1] * (b[1] - p0[1]);
            vec![(signed_drift - offset) / nd]
        }
    };

    fractions
        .into_iter()
        .filter(|t| (-margin..=1.0 + margin).contains(t))
        .filter_map(|t| {
            let p = [b[0] + t * d[0], b[1] + t * d[1]];
            let s = params.arc_length_to(p);
            if s <= 0.0 {
                return None;
            }
            let phi = params.phi_at(s);
            let dn = (-phi.sin() * d[0] + phi.cos() * d[1]).abs();
            if dn < 1e-9 {
                return None;
            }
            let dz = hit.forward[2] - hit.backward[2];
            Some(SzPoint {
                s,
                z: hit.backward[2] + t * dz,
                sigma: hit.drift_sigma * dz.abs() / dn,
            })
        })
        .min_by(|x, y| x.s.total_cmp(&y.s))
}

/// Both drift-side options of one stereo hit.
#[derive(Clone, Copy, Debug)]
pub struct StereoObservation {
    pub hit: HitId,
    pub left: Option<SzPoint>,
    pub right: Option<SzPoint>,
}

impl StereoObservation {
    pub fn options(&self) -> impl Iterator<Item = SzPoint> {
        self.left.into_iter().chain(self.right)
    }

    /// Option closer to `line`.
    fn closer(&self, line: &LineFit) -> Option<SzPoint> {
        self.options()
            .min_by(|a, b| line.residual(a).abs().total_cmp(&line.residual(b).abs()))
    }
}

/// Winning cell of the (tanλ, z0) vote.
#[derive(Clone, Copy, Debug)]
struct Vote {
    tan_lambda: f64,
    z0: f64,
    count: usize,
    spread: f64,
}

/// Counts reported by one combiner run.
#[derive(Clone, Copy, Debug, Default)]
pub struct StereoStats {
    pub with_z: usize,
    pub demoted: usize,
    pub discarded: usize,
}

pub struct StereoCombiner<'a> {
    config: &'a StereoConfig,
}

impl<'a> StereoCombiner<'a> {
    pub fn new(config: &'a StereoConfig) -> Self {
        Self { config }
    }

    /// Observations of every usable stereo hit for `params`.
    pub fn observations(&self, params: &HelixParams, hits: &[WireHit], status: &HitStatusTable) -> Vec<StereoObservation> {
        hits.iter()
            .filter(|h| !h.axial && status.is_available(h.id))
            .filter_map(|h| {
                let left = wire_crossing(h, params, 1.0, self.config.wire_margin);
                let right = wire_crossing(h, params, -1.0, self.config.wire_margin);
                (left.is_some() || right.is_some()).then_some(StereoObservation {
                    hit: h.id,
                    left,
                    right,
                })
            })
            .collect()
    }

    /// Line through the largest number of observations. For each tanλ bin
    /// every option votes z0 = z − tanλ·s; the z0 window of width
    /// `voteWindow` holding the most distinct hits wins, ties going to the
    /// narrowest window.
    fn vote(&self, obs: &[StereoObservation]) -> Option<Vote> {
        let bins = self.config.tan_lambda_bins;
        let max_t = self.config.max_tan_lambda;
        let window = self.config.vote_window;
        let mut best: Option<Vote> = None;
        let mut entries: Vec<(f64, usize)> = Vec::with_capacity(2 * obs.len());
        let mut counts = vec![0usize; obs.len()];

        for bin in 0..bins {
            let t = -max_t + (bin as f64 + 0.5) * 2.0 * max_t / bins as f64;
            entries.clear();
            for (i, o) in obs.iter().enumerate() {
                for p in o.options() {
                    let z0 = p.z - t * p.s;
                    if z0.abs() <= self.config.max_z0 {
                        entries.push((z0, i));
                    }
                }
            }
            entries.sort_by(|a, b| a.0.total_cmp(&b.0));
            counts.fill(0);

            let (mut lo, mut distinct) = (0, 0);
            for hi in 0..entries.len() {
                let i = entries[hi].1;
                counts[i] += 1;
                if counts[i] == 1 {
                    distinct += 1;
                }
                while entries[hi].0 - entries[lo].0 > window {
                    let j = entries[lo].1;
                    counts[j] -= 1;
                    if counts[j] == 0 {
                        distinct -= 1;
                    }
                    lo += 1;
                }
                let spread = entries[hi].0 - entries[lo].0;
                let better = best.map_or(true, |b| distinct > b.count || (distinct == b.count && spread < b.spread));
                if better {
                    best = Some(Vote {
                        tan_lambda: t,
                        z0: 0.5 * (entries[hi].0 + entries[lo].0),
                        count: distinct,
                        spread,
                    });
                }
            }
        }
        best
    }

    /// sz fit with drift sides resolved by the (tanλ, z0) vote, then robust
    /// refits with outlier removal. Returns the line and the hits kept.
    pub fn fit(&self, mut obs: Vec<StereoObservation>) -> Result<(LineFit, Vec<HitId>), RecoverableError> {
        let too_few = |n: usize| RecoverableError::FitNonConvergence {
            stage: "stereo",
            reason: format!("{n} stereo hits, {} needed", self.config.min_stereo_hits),
        };
        obs.retain(|o| o.left.is_some() || o.right.is_some());
        if obs.len() < self.config.min_stereo_hits {
            return Err(too_few(obs.len()));
        }

        let vote = self.vote(&obs).ok_or_else(|| too_few(0))?;
        let mut line = LineFit {
            z0: vote.z0,
            tan_lambda: vote.tan_lambda,
            chi2: 0.0,
        };
        // hits off the voted line belong to other tracks
        let window = self.config.vote_window;
        obs.retain(|o| o.options().any(|p| line.residual(&p).abs() <= window));
        if obs.len() < self.config.min_stereo_hits {
            return Err(too_few(obs.len()));
        }

        loop {
            let points: Vec<SzPoint> = obs.iter().filter_map(|o| o.closer(&line)).collect();
            line = fit_line_leave_one_out(&points)?;

            let worst = points
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let cut = (self.config.residual_cut * p.sigma).max(self.config.min_residual);
                    (i, line.residual(p).abs() / cut)
                })
                .filter(|&(_, excess)| excess > 1.0)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            match worst {
                None => break,
                Some((i, _)) => {
                    if obs.len() <= self.config.min_stereo_hits {
                        return Err(too_few(obs.len() - 1));
                    }
                    obs.remove(i);
                }
            }
        }
        Ok((line, obs.iter().map(|o| o.hit).collect()))
    }

    /// Process 2D candidates in descending quality.
    pub fn apply(
        &self,
        candidates: &mut Vec<TrackCandidate>,
        hits: &[WireHit],
        status: &mut HitStatusTable,
        errors: &mut Vec<RecoverableError>,
    ) -> StereoStats {
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| candidates[b].quality.total_cmp(&candidates[a].quality).then(a.cmp(&b)));

        let mut stats = StereoStats::default();
        let mut discard = vec![false; candidates.len()];
        for k in order {
            let cand = &mut candidates[k];
            if cand.has_z {
                continue;
            }
            let obs = self.observations(&cand.params, hits, status);
            match self.fit(obs) {
                Ok((line, stereo_hits)) => {
                    cand.params.z0 = line.z0;
                    cand.params.tan_lambda = line.tan_lambda;
                    cand.has_z = true;
                    status.take_all(&stereo_hits);
                    cand.hits.extend(stereo_hits);
                    cand.sort_hits(hits);
                    cand.update_quality();
                    stats.with_z += 1;
                }
                Err(e) => {
                    errors.push(e);
                    if self.config.demote_on_failure {
                        stats.demoted += 1;
                    } else {
                        for &h in &cand.hits {
                            status.set_taken(h, false);
                        }
                        discard[k] = true;
                        stats.discarded += 1;
                    }
                }
            }
        }

        let mut k = 0;
        candidates.retain(|_| {
            let keep = !discard[k];
            k += 1;
            keep
        });
        debug!(
            with_z = stats.with_z,
            demoted = stats.demoted,
            discarded = stats.discarded,
            "stereo combiner"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Origin;
    use crate::config::FinderConfig;
    use crate::detector::DetectorGeometry;
    use crate::test_utils::{axial_hits_on, TestGeometry};
    use crate::types::ChannelId;
    use approx::assert_abs_diff_eq;

    /// Stereo hits of `truth` on the stereo layers 6..12 of the test chamber.
    fn stereo_hits_on(truth: &HelixParams, first_id: usize) -> Vec<WireHit> {
        let geo = TestGeometry::default();
        let mut out = Vec::new();
        for layer in 6..12u16 {
            let r = TestGeometry::layer_radius(layer);
            let Some(s) = truth.arc_length_at_radius(r) else { continue };
            let pos = truth.position(s);
            // the wire nearest to the crossing at its z, on the outgoing arm
            let best = (0..geo.wires_per_layer)
                .filter_map(|w| geo.wire(ChannelId::new(layer, w)))
                .map(|wg| {
                    let p = wg.position_at_z(pos[2]);
                    let dist = truth.signed_distance(p);
                    (wg, p, dist)
                })
                .filter(|(_, p, _)| truth.arc_length_to(*p) > 0.0)
                .min_by(|a, b| a.2.abs().total_cmp(&b.2.abs()))
                .unwrap();
            let (wg, p, dist) = best;
            let id = first_id + out.len();
            out.push(WireHit {
                id: HitId(id),
                raw_index: id,
                channel: ChannelId::new(layer, wg.wire),
                layer,
                superlayer: wg.superlayer,
                backward: wg.backward,
                forward: wg.forward,
                ref_pos: p,
                drift_time: dist.abs() / 0.004,
                drift_length: dist.abs(),
                drift_sigma: 0.02,
                drift_velocity: 0.004,
                axial: false,
            });
        }
        out
    }

    #[test]
    fn crossing_recovers_z_on_straight_track() {
        let truth = HelixParams {
            curvature: 0.0,
            phi0: 0.3,
            d0: 0.0,
            tan_lambda: 0.5,
            z0: 1.0,
        };
        let hits = stereo_hits_on(&truth, 0);
        assert!(!hits.is_empty());
        for h in &hits {
            let options = [wire_crossing(h, &truth, 1.0, 0.05), wire_crossing(h, &truth, -1.0, 0.05)];
            let best = options
                .iter()
                .flatten()
                .map(|p| (p.z - truth.z_at(p.s)).abs())
                .fold(f64::INFINITY, f64::min);
            // the wire chord runs slightly inside the layer radius
            assert!(best < 0.05, "z error {best}");
        }
    }

    #[test]
    fn combiner_fits_sz_line() {
        let truth = HelixParams {
            curvature: 0.004,
            phi0: -0.8,
            d0: 0.0,
            tan_lambda: -0.3,
            z0: 2.0,
        };
        let mut hits = axial_hits_on(&HelixParams::new_2d(truth.curvature, truth.phi0, 0.0), 6, 0.3);
        let n_axial = hits.len();
        hits.extend(stereo_hits_on(&truth, n_axial));
        assert!(hits.len() >= n_axial + 5);

        let cfg = FinderConfig::default();
        let mut status = HitStatusTable::new(hits.len());
        let mut cand = TrackCandidate::new(
            (0..n_axial).map(HitId).collect(),
            HelixParams::new_2d(truth.curvature, truth.phi0, 0.0),
            Origin::Hough,
        );
        cand.quality = 10.0;
        status.take_all(&cand.hits);
        let mut cands = vec![cand];
        let mut errors = Vec::new();
        let stats = StereoCombiner::new(&cfg.stereo).apply(&mut cands, &hits, &mut status, &mut errors);

        assert_eq!(stats.with_z, 1);
        assert!(cands[0].has_z);
        assert_abs_diff_eq!(cands[0].params.tan_lambda, -0.3, epsilon = 0.01);
        assert_abs_diff_eq!(cands[0].params.z0, 2.0, epsilon = 0.5);
        assert_eq!(status.count_taken(), hits.len());
    }

    #[test]
    fn sides_resolve_when_mirror_options_are_far_in_z() {
        let truth = HelixParams {
            curvature: -0.003,
            phi0: 2.2,
            d0: 0.0,
            tan_lambda: 0.45,
            z0: -1.5,
        };
        let hits = stereo_hits_on(&truth, 0);
        let cfg = FinderConfig::default();
        let combiner = StereoCombiner::new(&cfg.stereo);
        let obs = combiner.observations(&truth, &hits, &HitStatusTable::new(hits.len()));
        assert_eq!(obs.len(), hits.len());

        let (line, kept) = combiner.fit(obs.clone()).unwrap();
        assert_eq!(kept.len(), hits.len());
        assert_abs_diff_eq!(line.tan_lambda, 0.45, epsilon = 0.01);
        assert_abs_diff_eq!(line.z0, -1.5, epsilon = 0.5);
        // every kept hit uses the option on the true line
        for o in &obs {
            let chosen = o.closer(&line).unwrap();
            assert!((chosen.z - truth.z_at(chosen.s)).abs() < 0.1);
        }
    }

    #[test]
    fn hits_off_the_voted_line_stay_free() {
        let truth = HelixParams {
            curvature: 0.002,
            phi0: 0.6,
            d0: 0.0,
            tan_lambda: 0.2,
            z0: 0.5,
        };
        let mut hits = stereo_hits_on(&truth, 0);
        let n_true = hits.len();
        // two hits on wires displaced along z: both options lie far off the line
        let stray: Vec<WireHit> = hits[1..3]
            .iter()
            .enumerate()
            .map(|(k, h)| {
                let mut h = h.clone();
                h.id = HitId(n_true + k);
                h.backward[2] += 150.0;
                h.forward[2] += 150.0;
                h
            })
            .collect();
        hits.extend(stray);

        let cfg = FinderConfig::default();
        let combiner = StereoCombiner::new(&cfg.stereo);
        let obs = combiner.observations(&truth, &hits, &HitStatusTable::new(hits.len()));
        let (line, kept) = combiner.fit(obs).unwrap();
        assert_abs_diff_eq!(line.tan_lambda, 0.2, epsilon = 0.01);
        assert!(kept.iter().all(|h| h.0 < n_true), "kept {kept:?}");
        assert_eq!(kept.len(), n_true);
    }

    #[test]
    fn too_few_stereo_hits_demote_or_discard() {
        let truth = HelixParams::new_2d(0.002, 1.0, 0.0);
        let hits = axial_hits_on(&truth, 6, 0.2);
        let mut cfg = FinderConfig::default();
        let mut errors = Vec::new();

        let mut cands = vec![TrackCandidate::new(hits.iter().map(|h| h.id).collect(), truth, Origin::Hough)];
        let mut status = HitStatusTable::new(hits.len());
        let stats = StereoCombiner::new(&cfg.stereo).apply(&mut cands, &hits, &mut status, &mut errors);
        assert_eq!(stats.demoted, 1);
        assert_eq!(cands.len(), 1);
        assert!(!cands[0].has_z);
        assert!(errors[0].is_fit());

        cfg.stereo.demote_on_failure = false;
        let stats = StereoCombiner::new(&cfg.stereo).apply(&mut cands, &hits, &mut status, &mut errors);
        assert_eq!(stats.discarded, 1);
        assert!(cands.is_empty());
    }
}
