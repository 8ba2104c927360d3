//! Adaptive exposure control.
//!
//! The controller runs as a chain of scheduled ticks. Each tick reads the
//! newest frame from a [`crate::stream::FrameSource`], measures the
//! histogram tails and moves one [`Actuator`] channel up or down by a step
//! that halves on oscillation and stagnation.

mod actuator;
mod config;
mod controller;
mod scene;
mod scheduler;
mod state;
mod status;

pub use actuator::{Actuator, ActuatorError, SimulatedPanel, BENCH_CHANNELS};
pub use config::ControllerConfig;
pub use controller::{ControlError, ExposureController};
pub use scene::SimulatedScene;
pub use scheduler::{ManualScheduler, Scheduler, Task, TimerScheduler};
pub use state::{ControllerState, Direction};
pub use status::{ControllerPhase, ControllerStatus, StatusObserver};
