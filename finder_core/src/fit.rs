//! Circle and line fits used by every stage.
//!
//! # Circle fit
//! Weighted Karimäki fit around the origin. With weighted (co)variances of
//! x, y and r² the direction at the perigee solves
//! tan 2φ = 2·q1 / q2, q1 = Crr·Cxy − Cxr·Cyr, q2 = Crr·(Cxx − Cyy) − Cxr² + Cyr²
//! and curvature / impact parameter follow in closed form. Drift-chamber hits
//! are refined by moving each wire position by its full drift length onto
//! the side of the previous solution and fitting again. The first solution
//! is the caller's seed (box centre, earlier fit) when there is one.
//!
//! # Line fit
//! z = z0 + tanλ·s, estimated by averaging all leave-one-out weighted least
//! squares solutions.

use crate::error::RecoverableError;
use crate::trajectory::HelixParams;
use crate::types::WireHit;

/// Result of a circle fit.
#[derive(Clone, Copy, Debug)]
pub struct CircleFit {
    pub params: HelixParams,
    pub chi2: f64,
    pub ndf: usize,
}

impl CircleFit {
    pub fn chi2_per_ndf(&self) -> f64 {
        if self.ndf == 0 {
            0.0
        } else {
            self.chi2 / self.ndf as f64
        }
    }
}

fn fit_error(stage: &'static str, reason: impl Into<String>) -> RecoverableError {
    RecoverableError::FitNonConvergence {
        stage,
        reason: reason.into(),
    }
}

/// Weighted Karimäki circle fit of `points`. The returned direction points
/// away from the origin towards the bulk of the points.
pub fn fit_circle(points: &[[f64; 2]], weights: &[f64]) -> Result<HelixParams, RecoverableError> {
    if points.len() < 3 {
        return Err(fit_error("circle fit", format!("{} points", points.len())));
    }
    let sw: f64 = weights.iter().sum();
    if !(sw > 0.0) {
        return Err(fit_error("circle fit", "zero total weight"));
    }

    let (mut mx, mut my, mut mxx, mut myy, mut mxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    let (mut mr2, mut mr4, mut mxr2, mut myr2) = (0.0, 0.0, 0.0, 0.0);
    for (p, &w) in points.iter().zip(weights) {
        let (x, y) = (p[0], p[1]);
        let r2 = x * x + y * y;
        mx += w * x;
        my += w * y;
        mxx += w * x * x;
        myy += w * y * y;
        mxy += w * x * y;
        mr2 += w * r2;
        mr4 += w * r2 * r2;
        mxr2 += w * x * r2;
        myr2 += w * y * r2;
    }
    for m in [
        &mut mx, &mut my, &mut mxx, &mut myy, &mut mxy, &mut mr2, &mut mr4, &mut mxr2, &mut myr2,
    ] {
        *m /= sw;
    }

    let cxx = mxx - mx * mx;
    let cxy = mxy - mx * my;
    let cyy = myy - my * my;
    let cxr = mxr2 - mx * mr2;
    let cyr = myr2 - my * mr2;
    let crr = mr4 - mr2 * mr2;
    if crr.abs() < 1e-12 {
        return Err(fit_error("circle fit", "degenerate radial spread"));
    }

    let q1 = crr * cxy - cxr * cyr;
    let q2 = crr * (cxx - cyy) - cxr * cxr + cyr * cyr;
    let phi = 0.5 * (2.0 * q1).atan2(q2);
    let (sin_phi, cos_phi) = phi.sin_cos();
    let kappa = (sin_phi * cxr - cos_phi * cyr) / crr;
    let delta = -kappa * mr2 + sin_phi * mx - cos_phi * my;
    let root = 1.0 - 4.0 * delta * kappa;
    if root <= 0.0 {
        return Err(fit_error("circle fit", "negative discriminant"));
    }
    let root = root.sqrt();
    let mut rho = 2.0 * kappa / root;
    if rho.abs() < 1e-10 {
        rho = 0.0;
    }
    let d = 2.0 * delta / (1.0 + root);

    // Karimäki curvature is positive for clockwise motion
    let mut params = HelixParams::new_2d(-rho, phi, d);
    if !params.curvature.is_finite() || !params.d0.is_finite() {
        return Err(fit_error("circle fit", "non-finite parameters"));
    }

    let mean_arc: f64 = points
        .iter()
        .zip(weights)
        .map(|(p, w)| w * params.arc_length_to(*p))
        .sum::<f64>()
        / sw;
    if mean_arc < 0.0 {
        params = HelixParams::new_2d(-params.curvature, params.phi0 + std::f64::consts::PI, -params.d0);
    }
    Ok(params)
}

/// Point on the drift circle of `hit` on the side that faces the
/// trajectory. The side follows the sign of the signed distance.
fn drift_corrected_position(hit: &WireHit, params: &HelixParams) -> [f64; 2] {
    let w = hit.ref_pos;
    let dist = params.signed_distance(w);
    if dist.abs() < 1e-12 {
        return w;
    }
    // closest point of the trajectory to the wire lies along the local normal
    let s = params.arc_length_to(w);
    let phi = params.phi_at(s);
    let n = [-phi.sin(), phi.cos()];
    let sign = if dist > 0.0 { -1.0 } else { 1.0 };
    let shift = hit.drift_length;
    [w[0] + sign * shift * n[0], w[1] + sign * shift * n[1]]
}

/// Residual of a drift hit: |distance of the wire| − drift length.
pub fn drift_residual(hit: &WireHit, params: &HelixParams) -> f64 {
    params.signed_distance(hit.ref_pos).abs() - hit.drift_length
}

/// χ² of `hits` with respect to `params`.
pub fn drift_chi2(hits: &[&WireHit], params: &HelixParams) -> f64 {
    hits.iter()
        .map(|h| {
            let r = drift_residual(h, params) / h.drift_sigma.max(1e-4);
            r * r
        })
        .sum()
}

/// Fit a circle to axial drift hits, `refit_passes` times on drift-corrected
/// points. The sides of the first pass come from `seed`; without one they
/// come from a fit on wire positions weighted by the unknown drift side.
/// A seeded fit makes at least one pass.
pub fn fit_drift_hits(
    hits: &[&WireHit],
    seed: Option<&HelixParams>,
    refit_passes: usize,
) -> Result<CircleFit, RecoverableError> {
    let mut points: Vec<[f64; 2]> = hits.iter().map(|h| h.ref_pos).collect();
    let (mut params, passes) = match seed {
        Some(seed) if seed.curvature.is_finite() && seed.phi0.is_finite() && seed.d0.is_finite() => {
            if points.len() < 3 {
                return Err(fit_error("circle fit", format!("{} points", points.len())));
            }
            (*seed, refit_passes.max(1))
        }
        _ => {
            let weights: Vec<f64> = hits
                .iter()
                .map(|h| 1.0 / (h.drift_sigma.max(1e-4).powi(2) + h.drift_length.powi(2)))
                .collect();
            (fit_circle(&points, &weights)?, refit_passes)
        }
    };

    let fine_weights: Vec<f64> = hits
        .iter()
        .map(|h| 1.0 / h.drift_sigma.max(1e-4).powi(2))
        .collect();
    for _ in 0..passes {
        for (p, h) in points.iter_mut().zip(hits) {
            *p = drift_corrected_position(h, &params);
        }
        params = fit_circle(&points, &fine_weights)?;
    }

    let chi2 = drift_chi2(hits, &params);
    Ok(CircleFit {
        params,
        chi2,
        ndf: hits.len().saturating_sub(3),
    })
}

/// One (s, z) observation of the sz fit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SzPoint {
    pub s: f64,
    pub z: f64,
    pub sigma: f64,
}

/// Result of an sz line fit.
#[derive(Clone, Copy, Debug)]
pub struct LineFit {
    pub z0: f64,
    pub tan_lambda: f64,
    pub chi2: f64,
}

impl LineFit {
    pub fn residual(&self, p: &SzPoint) -> f64 {
        p.z - (self.z0 + self.tan_lambda * p.s)
    }
}

/// Weighted least squares over `points`, skipping index `skip`.
fn weighted_line(points: &[SzPoint], skip: Option<usize>) -> Option<(f64, f64)> {
    let (mut sw, mut ss, mut sz, mut sss, mut ssz) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (i, p) in points.iter().enumerate() {
        if Some(i) == skip {
            continue;
        }
        let w = 1.0 / p.sigma.max(1e-6).powi(2);
        sw += w;
        ss += w * p.s;
        sz += w * p.z;
        sss += w * p.s * p.s;
        ssz += w * p.s * p.z;
    }
    let det = sw * sss - ss * ss;
    if det.abs() < 1e-12 * sw * sss.max(1.0) || !(sw > 0.0) {
        return None;
    }
    let slope = (sw * ssz - ss * sz) / det;
    let intercept = (sz - slope * ss) / sw;
    Some((intercept, slope))
}

/// Robust sz fit: the mean of every leave-one-out weighted line fit.
pub fn fit_line_leave_one_out(points: &[SzPoint]) -> Result<LineFit, RecoverableError> {
    if points.len() < 3 {
        return Err(fit_error("sz fit", format!("{} points", points.len())));
    }
    let solutions: Vec<(f64, f64)> = (0..points.len())
        .filter_map(|i| weighted_line(points, Some(i)))
        .collect();
    if solutions.is_empty() {
        return Err(fit_error("sz fit", "no leave-one-out solution"));
    }
    let n = solutions.len() as f64;
    let z0 = solutions.iter().map(|s| s.0).sum::<f64>() / n;
    let tan_lambda = solutions.iter().map(|s| s.1).sum::<f64>() / n;
    let mut fit = LineFit {
        z0,
        tan_lambda,
        chi2: 0.0,
    };
    fit.chi2 = points
        .iter()
        .map(|p| (fit.residual(p) / p.sigma.max(1e-6)).powi(2))
        .sum();
    if !fit.z0.is_finite() || !fit.tan_lambda.is_finite() {
        return Err(fit_error("sz fit", "non-finite parameters"));
    }
    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::axial_hits_on;
    use approx::assert_abs_diff_eq;

    #[test]
    fn recovers_circle_through_origin() {
        let truth = HelixParams::new_2d(0.01, 0.4, 0.0);
        let points: Vec<[f64; 2]> = (1..12)
            .map(|i| truth.position_2d(10.0 * i as f64))
            .collect();
        let weights = vec![1.0; points.len()];
        let fit = fit_circle(&points, &weights).unwrap();
        assert_abs_diff_eq!(fit.curvature, 0.01, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.phi0, 0.4, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.d0, 0.0, epsilon = 1e-7);
    }

    #[test]
    fn recovers_direction_for_negative_charge_and_offset() {
        let truth = HelixParams::new_2d(-0.004, 2.5, 0.8);
        let points: Vec<[f64; 2]> = (1..20)
            .map(|i| truth.position_2d(5.0 * i as f64))
            .collect();
        let fit = fit_circle(&points, &vec![1.0; points.len()]).unwrap();
        assert_abs_diff_eq!(fit.curvature, -0.004, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.phi0, 2.5, epsilon = 1e-8);
        assert_abs_diff_eq!(fit.d0, 0.8, epsilon = 1e-6);
    }

    #[test]
    fn straight_points_give_zero_curvature() {
        let points: Vec<[f64; 2]> = (1..8).map(|i| [i as f64 * 3.0, i as f64 * 3.0]).collect();
        let fit = fit_circle(&points, &vec![1.0; points.len()]).unwrap();
        assert_abs_diff_eq!(fit.curvature, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(fit.phi0, std::f64::consts::FRAC_PI_4, epsilon = 1e-9);
    }

    #[test]
    fn drift_refinement_reduces_chi2() {
        let truth = HelixParams::new_2d(0.006, -1.0, 0.0);
        let hits = axial_hits_on(&truth, 20, 0.4);
        let refs: Vec<&WireHit> = hits.iter().collect();
        let coarse = fit_drift_hits(&refs, None, 0).unwrap();
        let fine = fit_drift_hits(&refs, None, 3).unwrap();
        assert!(fine.chi2 <= coarse.chi2 + 1e-9);
        assert_abs_diff_eq!(fine.params.curvature, 0.006, epsilon = 2e-4);
    }

    #[test]
    fn seeded_fit_keeps_a_close_seed_close() {
        let truth = HelixParams::new_2d(0.005, 0.9, 0.0);
        let hits = axial_hits_on(&truth, 15, 0.3);
        let refs: Vec<&WireHit> = hits.iter().collect();
        let seed = HelixParams::new_2d(0.0048, 0.91, 0.0);
        let fit = fit_drift_hits(&refs, Some(&seed), 2).unwrap();
        assert_abs_diff_eq!(fit.params.curvature, 0.005, epsilon = 1e-5);
        assert_abs_diff_eq!(fit.params.phi0, 0.9, epsilon = 1e-5);
        assert!(fit.chi2 < drift_chi2(&refs, &seed));
        assert!(fit.chi2_per_ndf() < 1e-3);
    }

    #[test]
    fn corrected_points_sit_a_full_drift_length_from_the_wire() {
        let truth = HelixParams::new_2d(0.0, 0.0, 0.0);
        let hits = axial_hits_on(&truth, 4, 0.3);
        // seed displaced by less than the drift length keeps the sides
        let seed = HelixParams::new_2d(0.0, 0.0, 0.1);
        for h in &hits {
            let p = drift_corrected_position(h, &seed);
            let moved = (p[0] - h.ref_pos[0]).hypot(p[1] - h.ref_pos[1]);
            assert_abs_diff_eq!(moved, 0.3, epsilon = 1e-12);
            assert_abs_diff_eq!(truth.signed_distance(p), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn leave_one_out_is_insensitive_to_single_outlier() {
        let mut points: Vec<SzPoint> = (0..10)
            .map(|i| {
                let s = 10.0 + 8.0 * i as f64;
                SzPoint {
                    s,
                    z: 2.0 + 0.5 * s,
                    sigma: 1.0,
                }
            })
            .collect();
        let clean = fit_line_leave_one_out(&points).unwrap();
        assert_abs_diff_eq!(clean.tan_lambda, 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(clean.z0, 2.0, epsilon = 1e-9);

        points[4].z += 20.0;
        let robust = fit_line_leave_one_out(&points).unwrap();
        assert!(robust.residual(&points[4]).abs() > 15.0);
    }

    #[test]
    fn too_few_points_do_not_converge() {
        let points = [SzPoint { s: 1.0, z: 1.0, sigma: 1.0 }; 2];
        assert!(fit_line_leave_one_out(&points).unwrap_err().is_fit());
    }
}
