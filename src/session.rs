//! Foreground session state: lifecycle state machine, configuration
//! ownership, snapshot routing into the statistical refiner, and the display
//! buffers the presentation layer reads. The controller's public methods are
//! also the scripted-automation surface: the GUI and any test harness drive
//! exactly the same API.

use crate::analysis::SizeRefiner;
use crate::structs::{MeasurementConfig, Snapshot};
use crate::worker::{SimWorker, WorkerEvent};
use std::collections::VecDeque;
use std::time::Instant;

/// Weight of a new sample in the displayed-intensity moving average.
/// Deliberately independent of the distribution decay constant; the two
/// filters smooth different displays over different horizons.
pub const DISPLAY_INTENSITY_ALPHA: f64 = 0.1;

/// Intensity trace length kept for the live plot.
pub const INTENSITY_TRACE_LEN: usize = 500;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunState {
    Idle,
    Running,
    Stopped,
}

/// Owns the current configuration and all measurement-derived foreground
/// state. Lives for the whole application run.
pub struct SessionController {
    worker: SimWorker,
    config: MeasurementConfig,
    state: RunState,
    /// Bumped on every engine re-initialization; snapshots tagged with an
    /// older generation are discarded.
    generation: u64,
    started_at: Option<Instant>,
    runtime_seconds: f64,
    /// Engine-reported accumulated sample count, taken verbatim from the
    /// latest estimate.
    sample_count: u64,
    refiner: SizeRefiner,
    positions: Vec<f64>,
    intensity_trace: VecDeque<f64>,
    display_intensity: f64,
    correlation: Vec<f32>,
    distribution: Vec<[f64; 2]>,
    smoothed_diameter: Option<f64>,
    fatal: Option<String>,
}

impl SessionController {
    pub fn new(config: MeasurementConfig) -> Self {
        Self::with_worker(config, SimWorker::spawn())
    }

    fn with_worker(config: MeasurementConfig, worker: SimWorker) -> Self {
        let generation = 1;
        worker.init(config, generation);
        Self {
            worker,
            config,
            state: RunState::Idle,
            generation,
            started_at: None,
            runtime_seconds: 0.0,
            sample_count: 0,
            refiner: SizeRefiner::default(),
            positions: Vec::new(),
            intensity_trace: VecDeque::with_capacity(INTENSITY_TRACE_LEN),
            display_intensity: 0.0,
            correlation: Vec::new(),
            distribution: Vec::new(),
            smoothed_diameter: None,
            fatal: None,
        }
    }

    pub fn start(&mut self) {
        self.worker.start();
        self.state = RunState::Running;
        self.started_at = Some(Instant::now());
        self.runtime_seconds = 0.0;
        self.sample_count = 0;
    }

    /// Pauses pacing; every buffer is retained.
    pub fn stop(&mut self) {
        self.worker.stop();
        if self.state == RunState::Running {
            self.state = RunState::Stopped;
        }
    }

    /// Back to Idle: engine rebuilt from the current configuration, all
    /// measurement-derived state cleared.
    pub fn reset(&mut self) {
        self.worker.stop();
        self.state = RunState::Idle;
        self.generation += 1;
        self.worker.init(self.config, self.generation);
        self.positions.clear();
        self.clear_measurement_buffers();
        self.display_intensity = 0.0;
        self.started_at = None;
        self.runtime_seconds = 0.0;
        self.sample_count = 0;
    }

    /// Route a configuration change. A particle-count change is structural
    /// and rebuilds the engine; anything else is pushed into the live one.
    /// Both invalidate the accumulated correlation history and distribution.
    pub fn set_params(&mut self, new_config: MeasurementConfig) {
        if new_config == self.config {
            return;
        }
        let structural = new_config.num_particles != self.config.num_particles;
        self.config = new_config;
        if structural {
            self.generation += 1;
            self.worker.init(self.config, self.generation);
        } else {
            self.worker.update_params(&self.config);
        }
        self.clear_measurement_buffers();
    }

    fn clear_measurement_buffers(&mut self) {
        self.intensity_trace.clear();
        self.correlation.clear();
        self.distribution.clear();
        self.smoothed_diameter = None;
        self.refiner.reset();
    }

    /// Drain pending worker events and refresh the runtime clock. Called
    /// once per UI frame; never blocks.
    pub fn poll(&mut self) {
        while let Some(event) = self.worker.try_recv() {
            match event {
                WorkerEvent::Data(snapshot) => self.apply_snapshot(snapshot),
                WorkerEvent::Fatal(message) => {
                    log::error!("session error: {message}");
                    self.worker.stop();
                    self.state = RunState::Idle;
                    self.fatal = Some(message);
                }
            }
        }
        if self.state == RunState::Running {
            if let Some(started_at) = self.started_at {
                self.runtime_seconds = started_at.elapsed().as_secs_f64();
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        if snapshot.generation != self.generation {
            // In-flight frame from before a re-init; its buffers may not
            // even match the current particle count.
            return;
        }

        self.display_intensity = self.display_intensity * (1.0 - DISPLAY_INTENSITY_ALPHA)
            + snapshot.intensity * DISPLAY_INTENSITY_ALPHA;
        if self.intensity_trace.len() == INTENSITY_TRACE_LEN {
            self.intensity_trace.pop_front();
        }
        self.intensity_trace.push_back(snapshot.intensity);
        self.positions = snapshot.positions;

        if let Some(correlation) = snapshot.correlation {
            self.correlation = correlation;
        }
        if let Some(estimate) = snapshot.estimate {
            self.sample_count = estimate.samples;
            if let Some(smoothed) = self
                .refiner
                .ingest(estimate.diameter, self.config.polydispersity)
            {
                self.smoothed_diameter = Some(smoothed);
                self.distribution = self.refiner.densities();
            }
        }
    }

    // --- read surface (GUI and automation) ---

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn params(&self) -> MeasurementConfig {
        self.config
    }

    /// Smoothed diameter estimate (m); `None` until the first valid fit.
    pub fn estimated_size(&self) -> Option<f64> {
        self.smoothed_diameter
    }

    pub fn runtime_seconds(&self) -> f64 {
        self.runtime_seconds
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn display_intensity(&self) -> f64 {
        self.display_intensity
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    pub fn intensity_trace(&self) -> impl Iterator<Item = f64> + '_ {
        self.intensity_trace.iter().copied()
    }

    pub fn correlation(&self) -> &[f32] {
        &self.correlation
    }

    pub fn distribution(&self) -> &[[f64; 2]] {
        &self.distribution
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.fatal.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::SizeEstimate;
    use crate::worker::SimWorker;
    use std::thread;
    use std::time::{Duration, Instant};

    fn controller(num_particles: usize) -> SessionController {
        let config = MeasurementConfig {
            num_particles,
            ..MeasurementConfig::default()
        };
        SessionController::with_worker(config, SimWorker::spawn())
    }

    fn snapshot(generation: u64, intensity: f64) -> Snapshot {
        Snapshot {
            generation,
            intensity,
            positions: vec![0.0; 15],
            correlation: None,
            estimate: None,
        }
    }

    fn estimate(diameter: f64, samples: u64) -> SizeEstimate {
        SizeEstimate {
            diameter,
            diffusion: 4e-12,
            gamma: 1500.0,
            slope: -1500.0,
            q: 1.87e7,
            baseline: 1.0,
            samples,
        }
    }

    #[test]
    fn lifecycle_transitions() {
        let mut session = controller(5);
        assert_eq!(session.state(), RunState::Idle);
        session.start();
        assert_eq!(session.state(), RunState::Running);
        session.stop();
        assert_eq!(session.state(), RunState::Stopped);
        session.reset();
        assert_eq!(session.state(), RunState::Idle);
        // stop while idle stays idle
        session.stop();
        assert_eq!(session.state(), RunState::Idle);
    }

    #[test]
    fn snapshot_updates_buffers_and_counters() {
        let mut session = controller(5);
        let mut snap = snapshot(1, 2.0);
        snap.correlation = Some(vec![1.8, 1.4, 1.1]);
        snap.estimate = Some(estimate(100e-9, 12345));
        session.apply_snapshot(snap);

        assert_eq!(session.sample_count(), 12345);
        assert_eq!(session.estimated_size(), Some(100e-9));
        assert_eq!(session.correlation().len(), 3);
        assert_eq!(session.positions().len(), 15);
        assert_eq!(session.intensity_trace().count(), 1);
        assert!((session.display_intensity() - 0.2).abs() < 1e-12);
        assert!(session.distribution().iter().any(|p| p[1] > 0.0));
    }

    #[test]
    fn stale_generation_snapshots_are_discarded() {
        let mut session = controller(5);
        session.reset(); // bumps generation to 2
        session.apply_snapshot(snapshot(1, 5.0));
        assert_eq!(session.intensity_trace().count(), 0);
        assert!(session.positions().is_empty());

        session.apply_snapshot(snapshot(2, 5.0));
        assert_eq!(session.intensity_trace().count(), 1);
    }

    #[test]
    fn intensity_trace_is_bounded() {
        let mut session = controller(5);
        for i in 0..(INTENSITY_TRACE_LEN + 50) {
            session.apply_snapshot(snapshot(1, i as f64));
        }
        assert_eq!(session.intensity_trace().count(), INTENSITY_TRACE_LEN);
        // oldest entries aged out
        assert_eq!(session.intensity_trace().next(), Some(50.0));
    }

    #[test]
    fn non_structural_change_keeps_positions_and_resets_refiner() {
        let mut session = controller(5);
        let mut snap = snapshot(1, 1.0);
        snap.correlation = Some(vec![1.5; 10]);
        snap.estimate = Some(estimate(100e-9, 100));
        session.apply_snapshot(snap);
        assert!(session.estimated_size().is_some());

        let mut config = session.params();
        config.temperature = 308.15;
        session.set_params(config);

        // distribution and smoothing invalidated, positions untouched
        assert_eq!(session.estimated_size(), None);
        assert!(session.distribution().is_empty());
        assert!(session.correlation().is_empty());
        assert_eq!(session.positions().len(), 15);
        // same generation: the engine was updated, not rebuilt
        assert_eq!(session.generation, 1);
    }

    #[test]
    fn particle_count_change_rebuilds_engine() {
        let mut session = controller(5);
        session.apply_snapshot(snapshot(1, 1.0));

        let mut config = session.params();
        config.num_particles = 10;
        session.set_params(config);
        assert_eq!(session.generation, 2);

        // frames from the old engine no longer land
        session.apply_snapshot(snapshot(1, 1.0));
        assert_eq!(session.intensity_trace().count(), 0);
    }

    #[test]
    fn unchanged_params_are_a_no_op() {
        let mut session = controller(5);
        session.apply_snapshot(snapshot(1, 1.0));
        let config = session.params();
        session.set_params(config);
        // buffers survive because nothing changed
        assert_eq!(session.intensity_trace().count(), 1);
        assert_eq!(session.generation, 1);
    }

    #[test]
    fn fatal_error_is_surfaced_and_stops_session() {
        let mut session = controller(5);
        session.start();
        let config = MeasurementConfig {
            num_particles: 0,
            ..session.params()
        };
        // structural change to an invalid count: engine construction fails
        session.set_params(config);
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.fatal_error().is_none() && Instant::now() < deadline {
            session.poll();
            thread::sleep(Duration::from_millis(5));
        }
        assert!(session.fatal_error().is_some());
        assert_eq!(session.state(), RunState::Idle);
    }

    #[test]
    fn end_to_end_measurement_produces_finite_estimate() {
        // Full pipeline against the real engine: INIT → START → wait for the
        // correlator to fill → a finite positive smoothed diameter appears.
        let mut session = controller(30);
        session.start();
        let deadline = Instant::now() + Duration::from_secs(60);
        while session.estimated_size().is_none() && Instant::now() < deadline {
            session.poll();
            thread::sleep(Duration::from_millis(10));
        }
        let diameter = session
            .estimated_size()
            .expect("no size estimate before deadline");
        assert!(diameter.is_finite() && diameter > 0.0);
        assert!(session.sample_count() > 0);
        assert!(session.intensity_trace().count() > 0);

        // STOP retains buffers
        session.stop();
        assert!(session.estimated_size().is_some());
        assert!(session.intensity_trace().count() > 0);

        // reset clears everything
        session.reset();
        assert_eq!(session.estimated_size(), None);
        assert!(session.positions().is_empty());
        assert_eq!(session.sample_count(), 0);
        assert_eq!(session.runtime_seconds(), 0.0);
    }
}
