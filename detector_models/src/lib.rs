//! `detector_models` — Concrete detector collaborators for the track finder:
//! drift-chamber wire layout, silicon layers and magnetic field.

pub mod chamber;
pub mod field;
pub mod setup;

pub use chamber::{ChamberParams, DriftChamber, SuperlayerParams};
pub use field::{SolenoidField, UniformField};
pub use setup::{default_silicon_layers, DetectorSetup, SetupParams};
