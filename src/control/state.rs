//! Per-run controller state and the step adaptation rules.

use super::ControllerConfig;
use crate::analysis::{ChannelSelector, ExposureTargets};
use serde::Serialize;

/// Which way the actuator should move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Direction {
    /// Too bright.
    Lower,
    /// Within the dead band.
    #[default]
    Hold,
    /// Too dark.
    Raise,
}

impl Direction {
    /// Classifies a signed error against a dead band of `epsilon`.
    pub fn from_error(error: f64, epsilon: f64) -> Self {
        if error > epsilon {
            Self::Raise
        } else if error < -epsilon {
            Self::Lower
        } else {
            Self::Hold
        }
    }

    /// `+1`, `0` or `-1`.
    pub fn signum(self) -> i8 {
        match self {
            Self::Lower => -1,
            Self::Hold => 0,
            Self::Raise => 1,
        }
    }

    pub fn is_hold(self) -> bool {
        self == Self::Hold
    }
}

/// Mutable state of one controller run.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerState {
    /// Current step in percentage points. Never increases within a run.
    pub step_size: f64,
    pub previous_direction: Direction,
    pub previous_error: Option<f64>,
    pub stagnation_count: u32,
    pub cycle_count: u32,
    pub active_channel: String,
    pub selector: ChannelSelector,
    pub targets: ExposureTargets,
    /// Last value read from or written to the actuator.
    pub target_value: Option<f64>,
}

impl ControllerState {
    pub fn new(
        channel: impl Into<String>,
        selector: ChannelSelector,
        targets: ExposureTargets,
        initial_step: f64,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            step_size: config.clamp_step(initial_step),
            previous_direction: Direction::Hold,
            previous_error: None,
            stagnation_count: 0,
            cycle_count: 0,
            active_channel: channel.into(),
            selector,
            targets,
            target_value: None,
        }
    }

    /// Halves the step on oscillation or repeated stagnation.
    ///
    /// A sign reversal halves once and leaves the stagnation counter
    /// alone; stagnation is only evaluated on ticks without a reversal.
    pub fn adapt_step(&mut self, direction: Direction, error: f64, config: &ControllerConfig) {
        let reversed = !self.previous_direction.is_hold()
            && !direction.is_hold()
            && direction != self.previous_direction;

        if reversed {
            self.halve_step(config);
            return;
        }

        let Some(previous) = self.previous_error else {
            return;
        };
        let improved = error.abs() < previous.abs() || direction.is_hold();
        if improved {
            self.stagnation_count = 0;
            return;
        }

        self.stagnation_count += 1;
        if self.stagnation_count >= config.stagnation_limit {
            self.halve_step(config);
            self.stagnation_count = 0;
        }
    }

    fn halve_step(&mut self, config: &ControllerConfig) {
        self.step_size = (self.step_size / 2.0).max(config.min_step);
    }

    /// Remembers this tick's decision and counts it.
    pub fn record(&mut self, direction: Direction, error: f64) {
        self.previous_direction = direction;
        self.previous_error = Some(error);
        self.cycle_count += 1;
    }

    /// Holding with the step already at its floor.
    pub fn is_converged(&self, direction: Direction, config: &ControllerConfig) -> bool {
        direction.is_hold() && self.step_size <= config.min_step
    }

    pub fn cycles_exhausted(&self, config: &ControllerConfig) -> bool {
        self.cycle_count >= config.max_cycles
    }
}
