//! Controller tuning.

use crate::stream::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning of the adaptive step controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Delay between ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// Step floor in percentage points.
    pub min_step: f64,
    /// Step ceiling in percentage points.
    pub max_step: f64,
    /// Safety limit on ticks per run.
    pub max_cycles: u32,
    /// Dead band around zero error.
    pub epsilon: f64,
    /// Non-improving ticks before the step is halved.
    pub stagnation_limit: u32,
    /// Smallest change worth writing to the actuator.
    pub min_delta: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 300,
            min_step: 0.1,
            max_step: 50.0,
            max_cycles: 200,
            epsilon: 0.002,
            stagnation_limit: 2,
            min_delta: 1e-3,
        }
    }
}

impl ControllerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Clamps a requested initial step into `[min_step, max_step]`.
    pub fn clamp_step(&self, step: f64) -> f64 {
        if step.is_nan() {
            return self.max_step;
        }
        step.clamp(self.min_step, self.max_step)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::InvalidController(msg.to_string()));
        if !(self.min_step > 0.0) {
            return invalid("min_step must be positive");
        }
        if !(self.max_step >= self.min_step) || self.max_step > 100.0 {
            return invalid("max_step must be within [min_step, 100]");
        }
        if self.max_cycles == 0 {
            return invalid("max_cycles must be at least 1");
        }
        if !(self.epsilon >= 0.0) {
            return invalid("epsilon must not be negative");
        }
        if self.stagnation_limit == 0 {
            return invalid("stagnation_limit must be at least 1");
        }
        if !(self.min_delta >= 0.0) {
            return invalid("min_delta must not be negative");
        }
        Ok(())
    }
}
