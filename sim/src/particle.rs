//! Charged-particle kinematics at the perigee.
//!
//! A particle of charge q in a field Bz bends clockwise for q·Bz > 0, so its
//! signed curvature is ω = −q·sign(Bz)·0.0029979·|Bz| / pt.

use finder_core::detector::curvature_from_pt;
use finder_core::HelixParams;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticleSpec {
    /// Unique particle ID within the event (used for truth matching)
    pub id: u64,
    /// Transverse momentum (GeV)
    pub pt: f64,
    pub phi0: f64,
    pub tan_lambda: f64,
    pub charge: i8,
    /// Transverse impact parameter (cm)
    pub d0: f64,
    pub z0: f64,
}

impl ParticleSpec {
    pub fn helix(&self, bz: f64) -> HelixParams {
        let omega = if self.pt.is_finite() && bz != 0.0 {
            -(self.charge as f64) * bz.signum() * curvature_from_pt(self.pt, bz)
        } else {
            0.0
        };
        HelixParams {
            curvature: omega,
            phi0: self.phi0,
            d0: self.d0,
            tan_lambda: self.tan_lambda,
            z0: self.z0,
        }
    }
}

/// Ranges from which random particles are drawn.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParticleRanges {
    pub pt: (f64, f64),
    pub tan_lambda: (f64, f64),
    /// |d0| upper bound (cm)
    pub d0: f64,
    /// |z0| upper bound (cm)
    pub z0: f64,
}

impl Default for ParticleRanges {
    fn default() -> Self {
        Self {
            pt: (0.5, 3.0),
            tan_lambda: (-0.6, 0.6),
            d0: 0.05,
            z0: 1.0,
        }
    }
}

impl ParticleRanges {
    pub fn draw<R: Rng>(&self, id: u64, rng: &mut R) -> ParticleSpec {
        ParticleSpec {
            id,
            pt: rng.gen_range(self.pt.0..=self.pt.1),
            phi0: rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI),
            tan_lambda: rng.gen_range(self.tan_lambda.0..=self.tan_lambda.1),
            charge: if rng.gen::<bool>() { 1 } else { -1 },
            d0: rng.gen_range(-self.d0..=self.d0),
            z0: rng.gen_range(-self.z0..=self.z0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn positive_charge_bends_clockwise_in_positive_field() {
        let p = ParticleSpec {
            id: 0,
            pt: 1.0,
            phi0: 0.0,
            tan_lambda: 0.0,
            charge: 1,
            d0: 0.0,
            z0: 0.0,
        };
        let h = p.helix(1.5);
        assert!(h.curvature < 0.0);
        // radius R = pt / (0.003·B) ≈ 222 cm
        assert_abs_diff_eq!(1.0 / h.curvature.abs(), 222.36, epsilon = 0.1);
        let pos = h.position_2d(10.0);
        assert!(pos[1] < 0.0);
    }

    #[test]
    fn draws_are_inside_ranges() {
        let ranges = ParticleRanges::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for id in 0..100 {
            let p = ranges.draw(id, &mut rng);
            assert!((0.5..=3.0).contains(&p.pt));
            assert!(p.d0.abs() <= 0.05);
            assert!(p.charge == 1 || p.charge == -1);
        }
    }
}
