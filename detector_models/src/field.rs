//! Magnetic-field models.

use finder_core::MagneticField;
use serde::{Deserialize, Serialize};

/// Constant longitudinal field.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct UniformField {
    /// Tesla
    pub bz: f64,
}

impl Default for UniformField {
    fn default() -> Self {
        Self { bz: 1.5 }
    }
}

impl MagneticField for UniformField {
    fn bz(&self, _position: [f64; 3]) -> f64 {
        self.bz
    }
}

/// Solenoid: uniform inside `half_length`, Gaussian fall-off beyond it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SolenoidField {
    pub bz: f64,
    pub half_length: f64,
    /// Width of the fall-off (cm)
    pub falloff: f64,
}

impl MagneticField for SolenoidField {
    fn bz(&self, position: [f64; 3]) -> f64 {
        let excess = position[2].abs() - self.half_length;
        if excess <= 0.0 {
            self.bz
        } else {
            self.bz * (-0.5 * (excess / self.falloff).powi(2)).exp()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn solenoid_falls_off_outside() {
        let f = SolenoidField {
            bz: 1.5,
            half_length: 100.0,
            falloff: 20.0,
        };
        assert_abs_diff_eq!(f.bz([10.0, 0.0, 50.0]), 1.5);
        assert_abs_diff_eq!(f.bz([0.0, 0.0, -120.0]), 1.5 * (-0.5f64).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(UniformField::default().bz([1.0, 2.0, 3.0]), 1.5);
    }
}
