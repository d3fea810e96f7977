//! Kalman filter on perigee helix parameters.
//!
//! # Design choices
//! - The state is the 5-vector x = [ω, φ0, d0, tanλ, z0]ᵀ with a 5×5
//!   covariance, `nalgebra` fixed-size types throughout.
//! - The perigee parameters do not change along the trajectory, so the
//!   prediction step only adds process noise (multiple scattering in the
//!   layer material).
//! - Measurements are (r·φ, z) on a silicon cylinder. The measurement
//!   function goes through [`HelixParams::arc_length_at_radius`]; its
//!   Jacobian is evaluated numerically.
//!
//! ## Multiple scattering (Highland)
//! θ0 = 0.0136 / p · √(x/X0) · (1 + 0.038·ln(x/X0)), x/X0 along the path.
//! Var(φ0) += θ0²·(1 + tan²λ), Var(tanλ) += θ0²·(1 + tan²λ)².

use crate::detector::PT_FACTOR;
use crate::trajectory::HelixParams;
use crate::types::wrap_angle;
use nalgebra::{Matrix2, Matrix2x5, Matrix5, Matrix5x2, Vector2, Vector5};

pub type StateVec = Vector5<f64>;
pub type StateCov = Matrix5<f64>;

pub fn to_state(p: &HelixParams) -> StateVec {
    StateVec::from(p.as_array())
}

pub fn to_params(x: &StateVec) -> HelixParams {
    HelixParams::from_array([x[0], x[1], x[2], x[3], x[4]])
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Material crossed between two updates.
#[derive(Clone, Copy, Debug)]
pub struct MaterialCrossing {
    /// Thickness in radiation lengths at normal incidence
    pub radiation_length: f64,
    /// Longitudinal field used for the momentum estimate (T)
    pub bz: f64,
}

pub trait KalmanFilter {
    /// Predict the state across `material` (None = vacuum).
    fn predict(
        &self,
        state: &StateVec,
        cov: &StateCov,
        material: Option<MaterialCrossing>,
    ) -> (StateVec, StateCov);

    /// Update with the residual ν = z − h(x), measurement Jacobian `h` and
    /// noise `r`. `None` if the innovation covariance is singular.
    fn update(
        &self,
        state: &StateVec,
        cov: &StateCov,
        residual: &Vector2<f64>,
        h: &Matrix2x5<f64>,
        r: &Matrix2<f64>,
    ) -> Option<KfUpdateResult>;
}

/// Result of a KF update step.
#[derive(Clone, Debug)]
pub struct KfUpdateResult {
    pub state: StateVec,
    pub cov: StateCov,
    /// Innovation ν = z − h(x)
    pub innovation: Vector2<f64>,
    /// Innovation covariance S = H·P·Hᵀ + R
    pub innovation_cov: Matrix2<f64>,
    /// νᵀ·S⁻¹·ν
    pub chi2: f64,
}

// ---------------------------------------------------------------------------
// Helix filter
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct HelixKalmanFilter;

/// Highland scattering angle for momentum `p` (GeV) and thickness `x_x0`.
pub fn highland_theta0(p: f64, x_x0: f64) -> f64 {
    if !(p > 0.0) || !p.is_finite() || x_x0 <= 0.0 {
        return 0.0;
    }
    (0.0136 / p * x_x0.sqrt() * (1.0 + 0.038 * x_x0.ln())).max(0.0)
}

impl KalmanFilter for HelixKalmanFilter {
    fn predict(
        &self,
        state: &StateVec,
        cov: &StateCov,
        material: Option<MaterialCrossing>,
    ) -> (StateVec, StateCov) {
        let Some(m) = material else {
            return (*state, *cov);
        };
        let omega = state[0].abs();
        let tl2 = 1.0 + state[3] * state[3];
        if omega < 1e-12 || m.bz.abs() < 1e-9 {
            return (*state, *cov);
        }
        let pt = PT_FACTOR * m.bz.abs() / omega;
        let p = pt * tl2.sqrt();
        // path length through the cylinder grows with 1/sinθ
        let theta0 = highland_theta0(p, m.radiation_length * tl2.sqrt());
        let var = theta0 * theta0;

        let mut new_cov = *cov;
        new_cov[(1, 1)] += var * tl2;
        new_cov[(3, 3)] += var * tl2 * tl2;
        (*state, new_cov)
    }

    fn update(
        &self,
        state: &StateVec,
        cov: &StateCov,
        residual: &Vector2<f64>,
        h: &Matrix2x5<f64>,
        r: &Matrix2<f64>,
    ) -> Option<KfUpdateResult> {
        // Innovation covariance: S = H·P·Hᵀ + R
        let s = h * cov * h.transpose() + r;
        let s_inv = s.try_inverse()?;

        // Kalman gain: K = P·Hᵀ·S⁻¹
        let k: Matrix5x2<f64> = cov * h.transpose() * s_inv;

        let mut new_state = state + k * residual;
        new_state[1] = wrap_angle(new_state[1]);

        // Joseph form P' = (I−KH)·P·(I−KH)ᵀ + K·R·Kᵀ
        let i_kh = StateCov::identity() - k * h;
        let new_cov = i_kh * cov * i_kh.transpose() + k * r * k.transpose();

        let chi2 = (residual.transpose() * s_inv * residual)[(0, 0)];
        Some(KfUpdateResult {
            state: new_state,
            cov: new_cov,
            innovation: *residual,
            innovation_cov: s,
            chi2,
        })
    }
}

// ---------------------------------------------------------------------------
// Measurement model on a cylinder
// ---------------------------------------------------------------------------

/// Predicted crossing of a cylinder.
#[derive(Clone, Copy, Debug)]
pub struct CylinderCrossing {
    pub arc_length: f64,
    pub position: [f64; 3],
}

pub fn cylinder_crossing(x: &StateVec, radius: f64) -> Option<CylinderCrossing> {
    let params = to_params(x);
    let s = params.arc_length_at_radius(radius)?;
    Some(CylinderCrossing {
        arc_length: s,
        position: params.position(s),
    })
}

/// Finite-difference steps per parameter.
const JACOBIAN_STEPS: [f64; 5] = [1e-7, 1e-6, 1e-5, 1e-6, 1e-5];

/// Residual (r·Δφ, Δz) of `measured` w.r.t. the crossing of `x`, and the
/// measurement Jacobian. `None` if the cylinder is not reached.
pub fn cylinder_measurement(
    x: &StateVec,
    radius: f64,
    measured: [f64; 3],
) -> Option<(Vector2<f64>, Matrix2x5<f64>, CylinderCrossing)> {
    let crossing = cylinder_crossing(x, radius)?;
    let phi = crossing.position[1].atan2(crossing.position[0]);
    let phi_m = measured[1].atan2(measured[0]);
    let residual = Vector2::new(
        radius * wrap_angle(phi_m - phi),
        measured[2] - crossing.position[2],
    );

    let mut h = Matrix2x5::zeros();
    for j in 0..5 {
        let mut shifted = *x;
        shifted[j] += JACOBIAN_STEPS[j];
        let c = cylinder_crossing(&shifted, radius)?;
        let phi_j = c.position[1].atan2(c.position[0]);
        h[(0, j)] = radius * wrap_angle(phi_j - phi) / JACOBIAN_STEPS[j];
        h[(1, j)] = (c.position[2] - crossing.position[2]) / JACOBIAN_STEPS[j];
    }
    Some((residual, h, crossing))
}
