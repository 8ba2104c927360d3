//! Controller phases and per-tick status reports.

use super::Direction;
use crate::analysis::ChannelSelector;
use serde::Serialize;

/// Lifecycle of the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ControllerPhase {
    #[default]
    Idle,
    Running,
    /// Held on target with the step at its floor.
    Converged,
    /// Hit the cycle limit without converging.
    Aborted,
}

impl ControllerPhase {
    pub fn is_running(self) -> bool {
        self == Self::Running
    }
}

/// Snapshot emitted after every completed tick.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub channel: String,
    pub channel_selector: ChannelSelector,
    pub low_fraction: f64,
    pub high_fraction: f64,
    pub direction: Direction,
    pub step_size: f64,
    /// Actuator value after this tick; `None` if it could not be read.
    pub applied_value: Option<f64>,
    /// Ticks completed in this run, including this one.
    pub cycle: u32,
    /// Phase after this tick; the final report is `Converged` or `Aborted`.
    pub phase: ControllerPhase,
}

/// Receives every status snapshot. Called on the tick thread.
pub type StatusObserver = Box<dyn Fn(&ControllerStatus) + Send + Sync>;
