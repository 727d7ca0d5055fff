use serde::{Deserialize, Serialize};

pub const K_B: f64 = 1.380649e-23;

/// Refractive index of the suspension medium (water).
pub const N_MEDIUM: f64 = 1.33;

/// Detector angle, fixed 90° geometry.
pub const SCATTERING_ANGLE_DEG: f64 = 90.0;

/// Sample cell dimensions in meters (w, h, d).
pub const BOX_DIMENSIONS: [f64; 3] = [40e-6, 200e-6, 40e-6];

/// Brownian integration time step (s). One intensity sample is recorded per
/// step, so this is also the correlator lag spacing.
pub const DT: f64 = 2e-6;

/// Full parameter set for one measurement. All values in SI units.
///
/// `num_particles` is structural: changing it requires rebuilding the engine
/// (the position array is reallocated). Every other field can be pushed into
/// a live engine via UpdateParams.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct MeasurementConfig {
    pub temperature: f64,
    pub viscosity: f64,
    pub diameter: f64,
    pub wavelength: f64,
    pub num_particles: usize,
    pub polydispersity: f64,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            temperature: 298.15,
            viscosity: 0.00089,
            diameter: 100e-9,
            wavelength: 633e-9,
            num_particles: 300,
            polydispersity: 0.0,
        }
    }
}

/// Result of the cumulant fit on the current correlation curve.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SizeEstimate {
    /// Hydrodynamic diameter (m).
    pub diameter: f64,
    /// Diffusion coefficient (m²/s).
    pub diffusion: f64,
    /// Decay rate Γ = D·q² (1/s).
    pub gamma: f64,
    /// Raw slope of the ln g1 fit (1/s).
    pub slope: f64,
    /// Scattering vector magnitude (1/m).
    pub q: f64,
    /// g2 baseline used for the fit.
    pub baseline: f64,
    /// Intensity samples accumulated by the engine since the last
    /// correlator reset.
    pub samples: u64,
}

/// One frame of measurement output, sent from the background loop to the
/// session controller. Correlation and estimate are absent until the engine
/// has buffered enough intensity history; that is a normal condition.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// Engine generation this frame was produced under. Frames from an older
    /// generation are dropped by the controller.
    pub generation: u64,
    pub intensity: f64,
    /// Flat 3N coordinates (m), frame-centered.
    pub positions: Vec<f64>,
    pub correlation: Option<Vec<f32>>,
    pub estimate: Option<SizeEstimate>,
}

pub fn scattering_vector(wavelength: f64) -> f64 {
    let theta = SCATTERING_ANGLE_DEG.to_radians();
    (4.0 * std::f64::consts::PI * N_MEDIUM / wavelength) * (theta / 2.0).sin()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scattering_vector_633nm() {
        // q = 4π·1.33/633nm · sin(45°) ≈ 1.87e7 1/m
        let q = scattering_vector(633e-9);
        assert!((q - 1.867e7).abs() / 1.867e7 < 0.01, "q = {q}");
    }

    #[test]
    fn default_config_is_water_at_25c() {
        let config = MeasurementConfig::default();
        assert_eq!(config.temperature, 298.15);
        assert_eq!(config.viscosity, 0.00089);
        assert_eq!(config.num_particles, 300);
    }
}
