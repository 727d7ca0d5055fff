//! Online refinement of the per-frame size estimate: exponential smoothing
//! of the fitted diameter plus a decaying histogram that turns single-frame
//! fits into a stable size-distribution curve.

use std::f64::consts::PI;

/// Weight of a new sample in the diameter moving average.
pub const SMOOTHING_ALPHA: f64 = 0.05;

/// Leaky-integrator decay per refinement step. Gives the histogram a memory
/// of roughly 200 frames (3–4 s at 60 Hz), so a size change ages out of the
/// curve instead of leaving a ghost peak.
pub const DISTRIBUTION_DECAY: f64 = 0.995;

pub const DISTRIBUTION_BINS: usize = 101;

/// Lower PDI bound; keeps the Gaussian wide enough to render at zero
/// configured polydispersity.
pub const MIN_EFFECTIVE_PDI: f64 = 0.01;

const LOG_MIN_NM: f64 = 0.0; // log10(1 nm)
const LOG_MAX_NM: f64 = 4.0; // log10(10 000 nm)

/// Diameter (nm) of histogram bin `i` on the logarithmic grid.
pub fn bin_diameter_nm(i: usize) -> f64 {
    let log_val = LOG_MIN_NM + (i as f64 / (DISTRIBUTION_BINS - 1) as f64) * (LOG_MAX_NM - LOG_MIN_NM);
    10f64.powf(log_val)
}

/// Exponentially smoothed diameter. Uninitialized until the first valid
/// sample; invalid samples (≤ 0, NaN) leave the state untouched.
#[derive(Debug, Default)]
pub struct SmoothedDiameter {
    value: f64,
    initialized: bool,
}

impl SmoothedDiameter {
    /// Feed one raw diameter (m). Returns the new smoothed value when the
    /// sample was valid, `None` otherwise.
    pub fn update(&mut self, raw: f64) -> Option<f64> {
        if !raw.is_finite() || raw <= 0.0 {
            return None;
        }
        self.value = if self.initialized {
            self.value * (1.0 - SMOOTHING_ALPHA) + raw * SMOOTHING_ALPHA
        } else {
            raw
        };
        self.initialized = true;
        Some(self.value)
    }

    pub fn get(&self) -> Option<f64> {
        self.initialized.then_some(self.value)
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
        self.initialized = false;
    }
}

/// Decaying size-distribution histogram over the fixed log grid.
///
/// Every bin decays on every accumulation step, including bins whose new
/// Gaussian contribution is degenerate, so the whole histogram ages
/// uniformly and a single numerical anomaly cannot persist.
#[derive(Debug)]
pub struct DistributionAccumulator {
    bins: [f64; DISTRIBUTION_BINS],
    samples: f64,
}

impl Default for DistributionAccumulator {
    fn default() -> Self {
        Self {
            bins: [0.0; DISTRIBUTION_BINS],
            samples: 0.0,
        }
    }
}

impl DistributionAccumulator {
    /// Fold one smoothed estimate into the histogram. `center_nm` is the
    /// smoothed diameter in nanometers, `polydispersity` the configured PDI.
    pub fn accumulate(&mut self, center_nm: f64, polydispersity: f64) {
        let effective_pdi = polydispersity.max(MIN_EFFECTIVE_PDI);
        let sigma = center_nm * effective_pdi.sqrt();

        self.samples = self.samples * DISTRIBUTION_DECAY + 1.0;

        let norm = 1.0 / (sigma * (2.0 * PI).sqrt());
        for (i, bin) in self.bins.iter_mut().enumerate() {
            let mut contribution = 0.0;
            if sigma > 0.0 {
                let d = bin_diameter_nm(i);
                let value = norm * (-0.5 * ((d - center_nm) / sigma).powi(2)).exp();
                if value.is_finite() {
                    contribution = value;
                }
            }
            *bin = *bin * DISTRIBUTION_DECAY + contribution;
        }
    }

    /// (diameter nm, normalized density) pairs for plotting. Densities are
    /// the decayed bins divided by the effective sample count, 0 before any
    /// accumulation.
    pub fn densities(&self) -> Vec<[f64; 2]> {
        self.bins
            .iter()
            .enumerate()
            .map(|(i, &bin)| {
                let density = if self.samples > 0.0 { bin / self.samples } else { 0.0 };
                [bin_diameter_nm(i), density]
            })
            .collect()
    }

    pub fn effective_samples(&self) -> f64 {
        self.samples
    }

    pub fn reset(&mut self) {
        self.bins = [0.0; DISTRIBUTION_BINS];
        self.samples = 0.0;
    }
}

/// Combined refinement stage owned by the session controller. State lives
/// for the duration of a configuration, not a UI frame.
#[derive(Debug, Default)]
pub struct SizeRefiner {
    smoothed: SmoothedDiameter,
    distribution: DistributionAccumulator,
}

impl SizeRefiner {
    /// Consume one raw fitted diameter (m). On a valid sample the smoothed
    /// value advances and the distribution accumulates once; invalid samples
    /// change nothing. Returns the smoothed diameter when updated.
    pub fn ingest(&mut self, raw_diameter: f64, polydispersity: f64) -> Option<f64> {
        let smoothed = self.smoothed.update(raw_diameter)?;
        self.distribution.accumulate(smoothed * 1e9, polydispersity);
        Some(smoothed)
    }

    pub fn smoothed_diameter(&self) -> Option<f64> {
        self.smoothed.get()
    }

    pub fn densities(&self) -> Vec<[f64; 2]> {
        self.distribution.densities()
    }

    pub fn effective_samples(&self) -> f64 {
        self.distribution.effective_samples()
    }

    /// Drop all accumulated state. Must run on every configuration change;
    /// history gathered under different physical parameters is meaningless.
    pub fn reset(&mut self) {
        self.smoothed.reset();
        self.distribution.reset();
    }
}
