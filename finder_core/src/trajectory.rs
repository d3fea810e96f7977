//! Helix / circle geometry in perigee parameterisation.
//!
//! ## Parameters
//! - ω   signed curvature (1/cm), positive = counter-clockwise in xy
//! - φ0  direction of flight at the perigee
//! - d0  signed impact parameter; perigee P0 = (d0·sinφ0, −d0·cosφ0)
//! - tanλ, z0  sz line: z(s) = z0 + tanλ·s
//!
//! Position at transverse arc length s:
//! p(s) = P0 + t·sin(ωs)/ω + n·(1 − cos(ωs))/ω,  t = (cosφ0, sinφ0),
//! n = (−sinφ0, cosφ0). The series forms below keep this stable for ω → 0.

use crate::types::wrap_angle;
use serde::{Deserialize, Serialize};

/// Switch to the series expansion below this value of |ω·s|.
const SMALL_ARC: f64 = 1e-4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HelixParams {
    pub curvature: f64,
    pub phi0: f64,
    pub d0: f64,
    pub tan_lambda: f64,
    pub z0: f64,
}

/// sin(ωs)/ω
fn sin_over(omega: f64, s: f64) -> f64 {
    let x = omega * s;
    if x.abs() < SMALL_ARC {
        s * (1.0 - x * x / 6.0)
    } else {
        x.sin() / omega
    }
}

/// (1 − cos(ωs))/ω
fn one_minus_cos_over(omega: f64, s: f64) -> f64 {
    let x = omega * s;
    if x.abs() < SMALL_ARC {
        0.5 * x * s * (1.0 - x * x / 12.0)
    } else {
        (1.0 - x.cos()) / omega
    }
}

impl HelixParams {
    pub fn new_2d(curvature: f64, phi0: f64, d0: f64) -> Self {
        Self {
            curvature,
            phi0: wrap_angle(phi0),
            d0,
            tan_lambda: 0.0,
            z0: 0.0,
        }
    }

    pub fn as_array(&self) -> [f64; 5] {
        [self.curvature, self.phi0, self.d0, self.tan_lambda, self.z0]
    }

    pub fn from_array(p: [f64; 5]) -> Self {
        Self {
            curvature: p[0],
            phi0: wrap_angle(p[1]),
            d0: p[2],
            tan_lambda: p[3],
            z0: p[4],
        }
    }

    /// Direction of flight at the perigee.
    pub fn tangent(&self) -> [f64; 2] {
        [self.phi0.cos(), self.phi0.sin()]
    }

    /// Left normal of the direction of flight at the perigee.
    pub fn normal(&self) -> [f64; 2] {
        [-self.phi0.sin(), self.phi0.cos()]
    }

    pub fn perigee(&self) -> [f64; 2] {
        [self.d0 * self.phi0.sin(), -self.d0 * self.phi0.cos()]
    }

    pub fn is_straight(&self) -> bool {
        self.curvature.abs() < 1e-12
    }

    /// Circle centre, `None` for a straight line.
    pub fn center(&self) -> Option<[f64; 2]> {
        if self.is_straight() {
            return None;
        }
        let p0 = self.perigee();
        let n = self.normal();
        let r = 1.0 / self.curvature;
        Some([p0[0] + r * n[0], p0[1] + r * n[1]])
    }

    pub fn radius(&self) -> f64 {
        if self.is_straight() {
            f64::INFINITY
        } else {
            1.0 / self.curvature.abs()
        }
    }

    /// Transverse position at arc length `s`.
    pub fn position_2d(&self, s: f64) -> [f64; 2] {
        let p0 = self.perigee();
        let t = self.tangent();
        let n = self.normal();
        let a = sin_over(self.curvature, s);
        let b = one_minus_cos_over(self.curvature, s);
        [p0[0] + a * t[0] + b * n[0], p0[1] + a * t[1] + b * n[1]]
    }

    pub fn position(&self, s: f64) -> [f64; 3] {
        let p = self.position_2d(s);
        [p[0], p[1], self.z_at(s)]
    }

    pub fn z_at(&self, s: f64) -> f64 {
        self.z0 + self.tan_lambda * s
    }

    /// Direction of flight (azimuth) at arc length `s`.
    pub fn phi_at(&self, s: f64) -> f64 {
        self.phi0 + self.curvature * s
    }

    /// Signed transverse distance of `q` to the trajectory, positive on the
    /// side of the left normal.
    pub fn signed_distance(&self, q: [f64; 2]) -> f64 {
        match self.center() {
            Some(c) => {
                let dist = (q[0] - c[0]).hypot(q[1] - c[1]);
                self.curvature.signum() * (self.radius() - dist)
            }
            None => {
                let p0 = self.perigee();
                let n = self.normal();
                (q[0] - p0[0]) * n[0] + (q[1] - p0[1]) * n[1]
            }
        }
    }

    /// Arc length from the perigee to the point of closest approach to `q`,
    /// in (−π/|ω|, π/|ω|].
    pub fn arc_length_to(&self, q: [f64; 2]) -> f64 {
        let p0 = self.perigee();
        match self.center() {
            Some(c) => {
                let a = [p0[0] - c[0], p0[1] - c[1]];
                let b = [q[0] - c[0], q[1] - c[1]];
                let cross = a[0] * b[1] - a[1] * b[0];
                let dot = a[0] * b[0] + a[1] * b[1];
                cross.atan2(dot) / self.curvature
            }
            None => {
                let t = self.tangent();
                (q[0] - p0[0]) * t[0] + (q[1] - p0[1]) * t[1]
            }
        }
    }

    /// Smallest positive arc length at which the trajectory reaches the
    /// cylinder of radius `r` while moving outwards.
    pub fn arc_length_at_radius(&self, r: f64) -> Option<f64> {
        let p0 = self.perigee();
        let t = self.tangent();
        // Straight-line start value
        let b = p0[0] * t[0] + p0[1] * t[1];
        let c = p0[0] * p0[0] + p0[1] * p0[1] - r * r;
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }
        let mut s = -b + disc.sqrt();
        if let Some(center) = self.center() {
            // farthest point of the circle from the origin
            if r > center[0].hypot(center[1]) + self.radius() + 1e-9 {
                return None;
            }
        }
        for _ in 0..30 {
            let p = self.position_2d(s);
            let phi = self.phi_at(s);
            let f = p[0] * p[0] + p[1] * p[1] - r * r;
            let df = 2.0 * (p[0] * phi.cos() + p[1] * phi.sin());
            if df.abs() < 1e-12 {
                return None;
            }
            let step = f / df;
            s -= step;
            if step.abs() < 1e-9 {
                let p = self.position_2d(s);
                let phi = self.phi_at(s);
                let outward = p[0] * phi.cos() + p[1] * phi.sin();
                let on_cylinder = ((p[0].hypot(p[1])) - r).abs() < 1e-6;
                return (s >= 0.0 && outward >= 0.0 && on_cylinder).then_some(s);
            }
        }
        None
    }
}
