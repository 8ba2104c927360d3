//! Closed-loop illumination controller.
//!
//! Each tick measures the newest frame, decides whether the scene is too
//! dark or too bright, and nudges one actuator channel by the current
//! step. The step only ever shrinks: it is halved when the direction flips
//! and when the error stops improving.

use super::{
    Actuator, ControllerConfig, ControllerPhase, ControllerState, ControllerStatus, Direction,
    Scheduler, StatusObserver,
};
use crate::analysis::{ChannelSelector, ExposureTargets};
use crate::stream::{ConfigError, FrameSource};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Errors returned by [`ExposureController::start`].
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("controller is already running")]
    AlreadyRunning,
    #[error("unknown actuator channel: {0}")]
    UnknownChannel(String),
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

enum TickOutcome {
    /// Keep going.
    Continue,
    /// The run ended or was cancelled.
    Done,
}

struct Run {
    phase: ControllerPhase,
    state: Option<ControllerState>,
}

struct Inner {
    config: ControllerConfig,
    source: Arc<dyn FrameSource>,
    actuator: Arc<dyn Actuator>,
    scheduler: Arc<dyn Scheduler>,
    run: Mutex<Run>,
    /// Set while a tick executes.
    busy: AtomicBool,
    /// Bumped on every start and stop; stale ticks compare and bail.
    generation: AtomicU64,
    observers: RwLock<Vec<StatusObserver>>,
}

/// Drives one actuator channel until the histogram is on target.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct ExposureController {
    inner: Arc<Inner>,
}

impl ExposureController {
    pub fn new(
        config: ControllerConfig,
        source: Arc<dyn FrameSource>,
        actuator: Arc<dyn Actuator>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ControlError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                source,
                actuator,
                scheduler,
                run: Mutex::new(Run {
                    phase: ControllerPhase::Idle,
                    state: None,
                }),
                busy: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                observers: RwLock::new(Vec::new()),
            }),
        })
    }

    /// Registers a callback for per-tick status snapshots.
    pub fn on_update(&self, observer: impl Fn(&ControllerStatus) + Send + Sync + 'static) {
        self.inner.observers.write().push(Box::new(observer));
    }

    /// Starts regulating `channel`.
    ///
    /// The channel is reset to 0% in the background before the first tick.
    /// Callers must keep every other writer off the channel until the run ends.
    pub fn start(
        &self,
        channel: &str,
        selector: ChannelSelector,
        targets: ExposureTargets,
        initial_step: f64,
    ) -> Result<(), ControlError> {
        targets.validate()?;
        if !self.inner.actuator.list_channels().iter().any(|c| c == channel) {
            return Err(ControlError::UnknownChannel(channel.to_string()));
        }

        let generation = {
            let mut run = self.inner.run.lock();
            if run.phase.is_running() {
                return Err(ControlError::AlreadyRunning);
            }
            let state = ControllerState::new(
                channel,
                selector,
                targets,
                initial_step,
                &self.inner.config,
            );
            tracing::info!(
                channel,
                selector = %selector,
                step = state.step_size,
                "Exposure control started"
            );
            run.state = Some(state);
            run.phase = ControllerPhase::Running;
            self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1
        };

        self.reset_channel(channel);
        Inner::schedule_tick(&self.inner, generation);
        Ok(())
    }

    /// Sets the channel to 0% without waiting for the actuator.
    fn reset_channel(&self, channel: &str) {
        let actuator = Arc::clone(&self.inner.actuator);
        let channel = channel.to_string();
        let spawned = std::thread::Builder::new()
            .name("actuator-reset".into())
            .spawn(move || {
                if let Err(e) = actuator.set_channel(&channel, 0.0) {
                    tracing::warn!(channel = %channel, error = %e, "Channel reset failed");
                }
            });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "Could not spawn channel reset");
        }
    }

    /// Cancels future ticks and returns to idle. Idempotent.
    ///
    /// Returns without waiting for a tick that is inside an actuator call;
    /// that tick finishes its write but records and reports nothing.
    pub fn stop(&self) {
        let mut run = self.inner.run.lock();
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
        if run.phase.is_running() {
            tracing::info!("Exposure control stopped");
        }
        run.phase = ControllerPhase::Idle;
        run.state = None;
    }

    pub fn phase(&self) -> ControllerPhase {
        self.inner.run.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.phase().is_running()
    }

    /// Copy of the current run's state, if a run exists.
    pub fn state(&self) -> Option<ControllerState> {
        self.inner.run.lock().state.clone()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }
}

impl Inner {
    fn schedule_tick(this: &Arc<Self>, generation: u64) {
        let weak: Weak<Self> = Arc::downgrade(this);
        this.scheduler.schedule(
            this.config.tick_interval(),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Inner::tick(&inner, generation);
                }
            }),
        );
    }

    fn tick(this: &Arc<Self>, generation: u64) {
        if this.generation.load(Ordering::Acquire) != generation {
            return;
        }
        if this.busy.swap(true, Ordering::AcqRel) {
            // Predecessor still running; try again later.
            Self::schedule_tick(this, generation);
            return;
        }

        let outcome = this.run_tick(generation);
        this.busy.store(false, Ordering::Release);

        if let TickOutcome::Continue = outcome {
            Self::schedule_tick(this, generation);
        }
    }

    fn is_current(&self, run: &Run, generation: u64) -> bool {
        run.phase.is_running() && self.generation.load(Ordering::Acquire) == generation
    }

    fn run_tick(&self, generation: u64) -> TickOutcome {
        // Frame source and actuator calls happen without the run lock, so a
        // slow device never blocks stop(), phase() or state().
        let (channel, selector, targets) = {
            let run = self.run.lock();
            if !self.is_current(&run, generation) {
                return TickOutcome::Done;
            }
            let Some(state) = run.state.as_ref() else {
                return TickOutcome::Done;
            };
            (state.active_channel.clone(), state.selector, state.targets)
        };

        let Some(frame) = self.source.latest_frame() else {
            tracing::trace!("No frame available, tick skipped");
            return TickOutcome::Continue;
        };
        let fractions = targets.measure(&frame, selector);
        let error = targets.error(&fractions).error;
        let direction = Direction::from_error(error, self.config.epsilon);

        let step = {
            let mut run = self.run.lock();
            if !self.is_current(&run, generation) {
                return TickOutcome::Done;
            }
            let Some(state) = run.state.as_mut() else {
                return TickOutcome::Done;
            };
            state.adapt_step(direction, error, &self.config);
            state.step_size
        };

        let applied_value = self.actuate(&channel, direction, step);

        let status = {
            let mut run = self.run.lock();
            if !self.is_current(&run, generation) {
                tracing::debug!(channel = %channel, "Run ended during actuation, tick dropped");
                return TickOutcome::Done;
            }
            let run = &mut *run;
            let Some(state) = run.state.as_mut() else {
                return TickOutcome::Done;
            };
            state.target_value = applied_value.or(state.target_value);
            state.record(direction, error);

            tracing::debug!(
                channel = %channel,
                low = fractions.low_fraction,
                high = fractions.high_fraction,
                direction = direction.signum(),
                step = state.step_size,
                value = ?applied_value,
                cycle = state.cycle_count,
                "Control tick"
            );

            let phase = if state.is_converged(direction, &self.config) {
                tracing::info!(
                    channel = %channel,
                    value = ?state.target_value,
                    cycles = state.cycle_count,
                    "Exposure control converged"
                );
                ControllerPhase::Converged
            } else if state.cycles_exhausted(&self.config) {
                tracing::info!(
                    channel = %channel,
                    cycles = state.cycle_count,
                    "Exposure control hit the cycle limit"
                );
                ControllerPhase::Aborted
            } else {
                ControllerPhase::Running
            };
            run.phase = phase;

            ControllerStatus {
                channel,
                channel_selector: selector,
                low_fraction: fractions.low_fraction,
                high_fraction: fractions.high_fraction,
                direction,
                step_size: state.step_size,
                applied_value,
                cycle: state.cycle_count,
                phase,
            }
        };

        // Observers run without the state lock so they may call back in.
        for observer in self.observers.read().iter() {
            observer(&status);
        }

        if status.phase.is_running() {
            TickOutcome::Continue
        } else {
            TickOutcome::Done
        }
    }

    /// Moves `channel` by `step` in `direction`.
    ///
    /// Returns the channel value after this tick. Actuator failures are
    /// logged and count as "nothing applied".
    fn actuate(&self, channel: &str, direction: Direction, step: f64) -> Option<f64> {
        let current = match self.actuator.get_channel(channel) {
            Ok(value) => value.clamp(0.0, 100.0),
            Err(e) => {
                tracing::warn!(channel, error = %e, "Actuator read failed");
                return None;
            }
        };

        if direction.is_hold() {
            return Some(current);
        }

        let proposed = (current + f64::from(direction.signum()) * step).clamp(0.0, 100.0);
        if (proposed - current).abs() < self.config.min_delta {
            return Some(current);
        }

        match self.actuator.set_channel(channel, proposed) {
            Ok(()) => Some(proposed),
            Err(e) => {
                tracing::warn!(channel, value = proposed, error = %e, "Actuator write failed");
                Some(current)
            }
        }
    }
}
