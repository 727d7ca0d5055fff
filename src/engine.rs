use crate::structs::{scattering_vector, SizeEstimate, K_B};
use anyhow::{ensure, Result};
use rand::{rng, rngs::ThreadRng, Rng};
use rand_distr::{Distribution, LogNormal, Normal};
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Correlator buffer bound; older samples age out.
const MAX_INTENSITY_SAMPLES: usize = 32768;

/// Minimum buffered samples before a correlation curve is reported. More
/// than one frame's worth of steps, so the curve appears only once real
/// history has built up.
const MIN_INTENSITY_SAMPLES: usize = 16384;

/// Number of lag channels in the g2 estimate.
const NUM_LAGS: usize = 600;

/// Smallest per-particle diameter the size sampler will produce (1 nm).
const MIN_PARTICLE_DIAMETER: f64 = 1e-9;

/// Brownian-dynamics engine for a dilute particle suspension.
///
/// Owns particle positions, per-particle diameters and the intensity history
/// used by the correlator. Exclusively owned by the simulation loop; the
/// whole instance is replaced on re-initialization.
pub struct DLSEngine {
    temperature: f64,
    viscosity: f64,
    box_dims: [f64; 3],
    /// Flat 3N coordinates (m), frame-centered.
    positions: Vec<f64>,
    /// Hydrodynamic diameter per particle (m).
    diameters: Vec<f64>,
    intensity_history: VecDeque<f64>,
    /// Samples recorded since the last correlator reset (not capped).
    recorded_samples: u64,
    rng: ThreadRng,
    normal: Normal<f64>,
}

impl DLSEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        num_particles: usize,
        temperature: f64,
        viscosity: f64,
        diameter: f64,
        box_w: f64,
        box_h: f64,
        box_d: f64,
        polydispersity: f64,
    ) -> Result<Self> {
        ensure!(num_particles > 0, "particle count must be positive");
        ensure!(
            temperature > 0.0 && viscosity > 0.0 && diameter > 0.0,
            "temperature, viscosity and diameter must be positive"
        );
        ensure!(
            box_w > 0.0 && box_h > 0.0 && box_d > 0.0,
            "box dimensions must be positive"
        );

        let mut rng = rng();
        let box_dims = [box_w, box_h, box_d];

        let mut positions = Vec::with_capacity(3 * num_particles);
        for _ in 0..num_particles {
            for dim in box_dims {
                positions.push(rng.random_range(-dim / 2.0..dim / 2.0));
            }
        }

        let diameters = sample_diameters(&mut rng, num_particles, diameter, polydispersity);

        Ok(Self {
            temperature,
            viscosity,
            box_dims,
            positions,
            diameters,
            intensity_history: VecDeque::with_capacity(MAX_INTENSITY_SAMPLES),
            recorded_samples: 0,
            rng,
            normal: Normal::new(0.0, 1.0).unwrap(),
        })
    }

    /// Advance every particle by one Brownian step of `dt` seconds.
    /// Displacement per axis is N(0, 2·D·dt) with D from Stokes–Einstein;
    /// particles wrap periodically inside the box.
    pub fn step(&mut self, dt: f64) {
        for (i, chunk) in self.positions.chunks_exact_mut(3).enumerate() {
            let d_coeff =
                K_B * self.temperature / (3.0 * PI * self.viscosity * self.diameters[i]);
            let sigma = (2.0 * d_coeff * dt).sqrt();
            for (axis, coord) in chunk.iter_mut().enumerate() {
                *coord += self.normal.sample(&mut self.rng) * sigma;
                let half = self.box_dims[axis] / 2.0;
                if *coord > half {
                    *coord -= self.box_dims[axis];
                } else if *coord < -half {
                    *coord += self.box_dims[axis];
                }
            }
        }
    }

    /// Batched stepping: advances `steps` Brownian steps and records one
    /// scattered-intensity sample at `wavelength` per step.
    pub fn run_steps(&mut self, dt: f64, steps: usize, wavelength: f64) {
        for _ in 0..steps {
            self.step(dt);
            let intensity = self.calculate_intensity(wavelength);
            self.add_intensity(intensity);
        }
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// Coherent scattered intensity |ΣE|²/N at the fixed 90° geometry.
    pub fn calculate_intensity(&self, wavelength: f64) -> f64 {
        let q = scattering_vector(wavelength);
        let mut re = 0.0;
        let mut im = 0.0;
        for chunk in self.positions.chunks_exact(3) {
            let phase = q * chunk[0];
            re += phase.cos();
            im += phase.sin();
        }
        (re * re + im * im) / self.diameters.len() as f64
    }

    /// Push one intensity sample into the correlator buffer.
    pub fn add_intensity(&mut self, intensity: f64) {
        if self.intensity_history.len() == MAX_INTENSITY_SAMPLES {
            self.intensity_history.pop_front();
        }
        self.intensity_history.push_back(intensity);
        self.recorded_samples += 1;
    }

    /// g2(τ) over the buffered intensity history, `None` until the minimum
    /// history is accumulated. Lag spacing equals the sampling step.
    pub fn calculate_correlation(&self) -> Option<Vec<f32>> {
        let n = self.intensity_history.len();
        if n < MIN_INTENSITY_SAMPLES {
            return None;
        }
        let data: Vec<f64> = self.intensity_history.iter().copied().collect();
        let mean = data.iter().sum::<f64>() / n as f64;
        if mean * mean <= f64::EPSILON {
            return None;
        }

        let num_lags = NUM_LAGS.min(n / 4);
        let mut g2 = Vec::with_capacity(num_lags);
        for lag in 0..num_lags {
            let mut sum = 0.0;
            for i in 0..(n - lag) {
                sum += data[i] * data[i + lag];
            }
            // normalize by pair count and mean² → baseline near 1
            g2.push((sum / ((n - lag) as f64 * mean * mean)) as f32);
        }
        Some(g2)
    }

    /// Cumulant fit of the current correlation curve. Returns `None` when no
    /// correlation is available or the fit is degenerate (both are normal
    /// early-measurement conditions).
    pub fn estimate_size(
        &self,
        dt: f64,
        temperature: f64,
        viscosity: f64,
        wavelength: f64,
    ) -> Option<SizeEstimate> {
        let g2 = self.calculate_correlation()?;
        let n = g2.len();

        // Baseline from the tail channels, coherence factor from the intercept.
        let tail = &g2[n - (n / 10).max(1)..];
        let baseline = tail.iter().map(|&v| v as f64).sum::<f64>() / tail.len() as f64;
        let beta = g2[0] as f64 - baseline;
        if beta <= 0.0 {
            return None;
        }

        // Siegert relation: g1(τ) = sqrt((g2(τ) - baseline)/β); fit ln g1
        // linearly over the channels above 5% of the intercept, where the
        // estimator noise does not dominate the logarithm.
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (lag, &value) in g2.iter().enumerate().skip(1) {
            let normalized = (value as f64 - baseline) / beta;
            if normalized <= 0.05 {
                break;
            }
            xs.push(lag as f64 * dt);
            ys.push(0.5 * normalized.ln());
        }
        if xs.len() < 8 {
            return None;
        }

        let slope = linear_slope(&xs, &ys)?;
        let gamma = -slope;
        if !(gamma > 0.0) {
            return None;
        }

        let q = scattering_vector(wavelength);
        let diffusion = gamma / (q * q);
        let diameter = K_B * temperature / (3.0 * PI * viscosity * diffusion);
        if !diameter.is_finite() || diameter <= 0.0 {
            return None;
        }

        Some(SizeEstimate {
            diameter,
            diffusion,
            gamma,
            slope,
            q,
            baseline,
            samples: self.recorded_samples,
        })
    }

    /// Non-structural parameter update. Per-particle diameters are resampled
    /// around the new mean; the correlator is reset as a side effect since
    /// the buffered history no longer matches the suspension.
    pub fn update_params(
        &mut self,
        temperature: f64,
        viscosity: f64,
        diameter: f64,
        polydispersity: f64,
    ) {
        self.temperature = temperature;
        self.viscosity = viscosity;
        let count = self.diameters.len();
        self.diameters = sample_diameters(&mut self.rng, count, diameter, polydispersity);
        self.reset_correlator();
    }

    pub fn reset_correlator(&mut self) {
        self.intensity_history.clear();
        self.recorded_samples = 0;
    }

    #[cfg(test)]
    fn buffered_samples(&self) -> usize {
        self.intensity_history.len()
    }
}

/// Log-normal per-particle diameters with moments matched to the configured
/// mean and PDI = (σ/mean)². The CV is floored so the distribution stays
/// well-formed at zero polydispersity.
fn sample_diameters(
    rng: &mut ThreadRng,
    count: usize,
    mean_diameter: f64,
    polydispersity: f64,
) -> Vec<f64> {
    let cv = polydispersity.max(0.0).sqrt().max(0.01);
    let log_std = (1.0 + cv.powi(2)).ln().sqrt();
    let log_mean = (mean_diameter / (1.0 + cv.powi(2)).sqrt()).ln();
    let log_normal = LogNormal::new(log_mean, log_std).unwrap();
    (0..count)
        .map(|_| log_normal.sample(rng).max(MIN_PARTICLE_DIAMETER))
        .collect()
}

fn linear_slope(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len() as f64;
    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = ys.iter().sum();
    let sum_xy: f64 = xs.iter().zip(ys).map(|(x, y)| x * y).sum();
    let sum_xx: f64 = xs.iter().map(|x| x * x).sum();
    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() <= f64::EPSILON {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    slope.is_finite().then_some(slope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::{BOX_DIMENSIONS, DT};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn test_engine(num_particles: usize) -> DLSEngine {
        DLSEngine::new(
            num_particles,
            298.15,
            0.00089,
            100e-9,
            BOX_DIMENSIONS[0],
            BOX_DIMENSIONS[1],
            BOX_DIMENSIONS[2],
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn construction_allocates_positions_inside_box() {
        let engine = test_engine(50);
        assert_eq!(engine.positions().len(), 150);
        for (i, &coord) in engine.positions().iter().enumerate() {
            let half = BOX_DIMENSIONS[i % 3] / 2.0;
            assert!(coord.abs() <= half, "coordinate {coord} outside box");
        }
    }

    #[test]
    fn construction_rejects_zero_particles() {
        let result = DLSEngine::new(0, 298.15, 0.00089, 100e-9, 1e-5, 1e-5, 1e-5, 0.0);
        assert!(result.is_err());
    }

    #[test]
    fn stepping_moves_particles_and_respects_box() {
        let mut engine = test_engine(20);
        let before = engine.positions().to_vec();
        for _ in 0..100 {
            engine.step(DT);
        }
        let moved = engine
            .positions()
            .iter()
            .zip(&before)
            .any(|(a, b)| (a - b).abs() > 0.0);
        assert!(moved, "no particle moved after 100 steps");
        for (i, &coord) in engine.positions().iter().enumerate() {
            let half = BOX_DIMENSIONS[i % 3] / 2.0;
            assert!(coord.abs() <= half);
        }
    }

    #[test]
    fn polydisperse_diameters_spread_around_mean() {
        let mut rng = rng();
        let diameters = sample_diameters(&mut rng, 1000, 100e-9, 0.1);
        assert!(diameters.iter().all(|&d| d >= MIN_PARTICLE_DIAMETER));
        let mean = diameters.iter().sum::<f64>() / diameters.len() as f64;
        assert!((mean - 100e-9).abs() / 100e-9 < 0.1, "mean = {mean}");
        let distinct = diameters.iter().any(|&d| (d - diameters[0]).abs() > 1e-12);
        assert!(distinct, "polydisperse sample collapsed to one size");
    }

    #[test]
    fn correlation_absent_until_minimum_history() {
        let mut engine = test_engine(10);
        assert!(engine.calculate_correlation().is_none());
        engine.run_steps(DT, 100, 633e-9);
        assert_eq!(engine.buffered_samples(), 100);
        assert!(engine.calculate_correlation().is_none());
    }

    #[test]
    fn constant_intensity_gives_flat_unit_correlation() {
        let mut engine = test_engine(10);
        for _ in 0..MIN_INTENSITY_SAMPLES {
            engine.add_intensity(2.0);
        }
        let g2 = engine.calculate_correlation().expect("enough history");
        assert!(!g2.is_empty());
        for &value in &g2 {
            assert!((value - 1.0).abs() < 1e-4, "g2 = {value}");
        }
        // flat curve has no decay to fit
        assert!(engine.estimate_size(DT, 298.15, 0.00089, 633e-9).is_none());
    }

    #[test]
    fn cumulant_fit_recovers_synthetic_decay_rate() {
        // AR(1) intensity fluctuations decorrelate at Γ_I = -ln(ρ)/dt; the
        // Siegert-based fit reads the field rate, Γ_I / 2.
        let gamma_intensity = 5000.0;
        let rho: f64 = (-gamma_intensity * DT).exp();
        let noise_scale = (1.0 - rho * rho).sqrt();

        let mut engine = test_engine(10);
        let mut rng = StdRng::seed_from_u64(7);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut x = 0.0;
        for _ in 0..MAX_INTENSITY_SAMPLES {
            x = rho * x + noise_scale * normal.sample(&mut rng);
            engine.add_intensity(10.0 + x);
        }

        let estimate = engine
            .estimate_size(DT, 298.15, 0.00089, 633e-9)
            .expect("fit should converge on a clean exponential");
        let expected = gamma_intensity / 2.0;
        assert!(
            estimate.gamma > expected / 2.0 && estimate.gamma < expected * 2.0,
            "gamma = {}, expected ≈ {expected}",
            estimate.gamma
        );
        assert!(estimate.diameter.is_finite() && estimate.diameter > 0.0);
        assert_eq!(estimate.samples, MAX_INTENSITY_SAMPLES as u64);
    }

    #[test]
    fn update_params_resets_correlator() {
        let mut engine = test_engine(10);
        for _ in 0..MIN_INTENSITY_SAMPLES {
            engine.add_intensity(1.0);
        }
        assert!(engine.calculate_correlation().is_some());
        engine.update_params(308.15, 0.0007, 200e-9, 0.1);
        assert!(engine.calculate_correlation().is_none());
        assert_eq!(engine.buffered_samples(), 0);
    }
}
