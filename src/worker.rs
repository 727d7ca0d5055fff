//! Background measurement loop. A dedicated thread owns the physics engine
//! and paces it to a fixed simulated-time budget per wall-clock frame; the
//! foreground talks to it exclusively through a pair of ordered mpsc
//! channels.

use crate::engine::DLSEngine;
use crate::structs::{MeasurementConfig, Snapshot, BOX_DIMENSIONS, DT};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Wall-clock frame budget (60 Hz).
pub const FRAME_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / 60);

/// Simulated seconds advanced per frame.
pub const SIM_TIME_PER_FRAME: f64 = 0.03;

/// Commands accepted by the loop thread. Delivery order is preserved.
#[derive(Debug)]
pub enum WorkerCommand {
    /// Construct a fresh engine; discards any prior instance. Does not start
    /// pacing.
    Init {
        config: MeasurementConfig,
        generation: u64,
    },
    /// Non-structural parameter push into the live engine. No-op without an
    /// engine.
    UpdateParams {
        temperature: f64,
        viscosity: f64,
        diameter: f64,
        wavelength: f64,
        polydispersity: f64,
    },
    Start,
    Stop,
    Shutdown,
}

/// Events emitted back to the foreground.
#[derive(Debug)]
pub enum WorkerEvent {
    Data(Snapshot),
    /// Engine construction failed; the session surfaces this to the user.
    /// The loop stays alive and keeps serving commands, but does not retry.
    Fatal(String),
}

/// Idle delay before the next frame given the measured frame cost. Never
/// negative: an overrunning physics call shortens the wait to zero and the
/// cadence degrades instead of skipping frames.
pub fn frame_delay(elapsed: Duration) -> Duration {
    FRAME_INTERVAL.saturating_sub(elapsed)
}

/// Number of integration steps per frame for the fixed engine time step.
pub fn steps_per_frame(dt: f64) -> usize {
    (SIM_TIME_PER_FRAME / dt).round() as usize
}

/// Handle to the loop thread. Dropping it shuts the thread down and joins
/// it, so no scheduled iteration can outlive the session.
pub struct SimWorker {
    commands: Sender<WorkerCommand>,
    events: Receiver<WorkerEvent>,
    handle: Option<JoinHandle<()>>,
}

impl SimWorker {
    pub fn spawn() -> Self {
        let (command_tx, command_rx) = channel();
        let (event_tx, event_rx) = channel();
        let handle = thread::Builder::new()
            .name("dls-sim".into())
            .spawn(move || run_loop(command_rx, event_tx))
            .expect("failed to spawn simulation thread");
        Self {
            commands: command_tx,
            events: event_rx,
            handle: Some(handle),
        }
    }

    pub fn send(&self, command: WorkerCommand) {
        if self.commands.send(command).is_err() {
            log::warn!("simulation thread is gone; command dropped");
        }
    }

    pub fn init(&self, config: MeasurementConfig, generation: u64) {
        self.send(WorkerCommand::Init { config, generation });
    }

    pub fn update_params(&self, config: &MeasurementConfig) {
        self.send(WorkerCommand::UpdateParams {
            temperature: config.temperature,
            viscosity: config.viscosity,
            diameter: config.diameter,
            wavelength: config.wavelength,
            polydispersity: config.polydispersity,
        });
    }

    pub fn start(&self) {
        self.send(WorkerCommand::Start);
    }

    pub fn stop(&self) {
        self.send(WorkerCommand::Stop);
    }

    /// Non-blocking event poll; the controller drains this every UI frame.
    pub fn try_recv(&self) -> Option<WorkerEvent> {
        self.events.try_recv().ok()
    }
}

impl Drop for SimWorker {
    fn drop(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Everything the loop thread owns. The engine never leaves this struct;
/// the foreground only ever sees snapshots.
struct LoopState {
    engine: Option<DLSEngine>,
    running: bool,
    generation: u64,
    wavelength: f64,
    temperature: f64,
    viscosity: f64,
    events: Sender<WorkerEvent>,
}

impl LoopState {
    fn new(events: Sender<WorkerEvent>) -> Self {
        let defaults = MeasurementConfig::default();
        Self {
            engine: None,
            running: false,
            generation: 0,
            wavelength: defaults.wavelength,
            temperature: defaults.temperature,
            viscosity: defaults.viscosity,
            events,
        }
    }

    /// Apply one command. Returns false on Shutdown.
    fn apply(&mut self, command: WorkerCommand) -> bool {
        match command {
            WorkerCommand::Init { config, generation } => {
                self.generation = generation;
                self.wavelength = config.wavelength;
                self.temperature = config.temperature;
                self.viscosity = config.viscosity;
                match DLSEngine::new(
                    config.num_particles,
                    config.temperature,
                    config.viscosity,
                    config.diameter,
                    BOX_DIMENSIONS[0],
                    BOX_DIMENSIONS[1],
                    BOX_DIMENSIONS[2],
                    config.polydispersity,
                ) {
                    Ok(engine) => {
                        log::info!(
                            "engine initialized: {} particles, generation {}",
                            config.num_particles,
                            generation
                        );
                        self.engine = Some(engine);
                    }
                    Err(err) => {
                        log::error!("engine construction failed: {err}");
                        self.engine = None;
                        let _ = self.events.send(WorkerEvent::Fatal(err.to_string()));
                    }
                }
            }
            WorkerCommand::UpdateParams {
                temperature,
                viscosity,
                diameter,
                wavelength,
                polydispersity,
            } => {
                self.wavelength = wavelength;
                self.temperature = temperature;
                self.viscosity = viscosity;
                if let Some(engine) = self.engine.as_mut() {
                    engine.update_params(temperature, viscosity, diameter, polydispersity);
                }
            }
            WorkerCommand::Start => {
                log::info!("measurement loop started");
                self.running = true;
            }
            WorkerCommand::Stop => {
                log::info!("measurement loop stopped");
                self.running = false;
            }
            WorkerCommand::Shutdown => return false,
        }
        true
    }

    /// One paced iteration: step batch → measure → send. Returns false when
    /// the foreground hung up.
    fn frame(&mut self) -> bool {
        let Some(engine) = self.engine.as_mut() else {
            return true;
        };
        engine.run_steps(DT, steps_per_frame(DT), self.wavelength);
        let intensity = engine.calculate_intensity(self.wavelength);
        let positions = engine.positions().to_vec();
        let correlation = engine.calculate_correlation();
        let estimate = if correlation.is_some() {
            engine.estimate_size(DT, self.temperature, self.viscosity, self.wavelength)
        } else {
            None
        };
        self.events
            .send(WorkerEvent::Data(Snapshot {
                generation: self.generation,
                intensity,
                positions,
                correlation,
                estimate,
            }))
            .is_ok()
    }
}

fn run_loop(commands: Receiver<WorkerCommand>, events: Sender<WorkerEvent>) {
    let mut state = LoopState::new(events);
    loop {
        if state.running {
            // Drain whatever queued since the last frame without blocking.
            loop {
                match commands.try_recv() {
                    Ok(command) => {
                        if !state.apply(command) {
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
        } else {
            // Idle: park until the next command arrives.
            match commands.recv() {
                Ok(command) => {
                    if !state.apply(command) {
                        return;
                    }
                }
                Err(_) => return,
            }
            continue;
        }

        if state.running {
            let frame_start = Instant::now();
            if !state.frame() {
                return;
            }
            thread::sleep(frame_delay(frame_start.elapsed()));
        }
    }
}
