//! Prometheus metrics for the stream and the exposure controller.
//!
//! # Metrics Exposed
//!
//! ## Stream
//! - `led_exposure_stream_running` - Producer should be running (1) or not (0)
//! - `led_exposure_stream_process_alive` - Producer process is alive
//! - `led_exposure_frames_decoded_total` - Frames decoded from the stream
//! - `led_exposure_frames_dropped_total` - Candidates discarded as undersized or corrupt
//!
//! ## Controller
//! - `led_exposure_controller_running` - Controller is regulating
//! - `led_exposure_controller_cycles` - Ticks in the current run
//! - `led_exposure_controller_step_size` - Current step in percentage points
//! - `led_exposure_controller_direction` - Last decision (-1, 0, 1)
//! - `led_exposure_low_fraction` / `led_exposure_high_fraction` - Histogram tails
//! - `led_exposure_actuator_value` - Channel intensity after the last tick
//!
//! With the `metrics` feature, [`MetricsServer`] serves them over HTTP.
//!
//! # Example
//!
//! ```no_run
//! use led_exposure::metrics::{MetricsRegistry, MetricsSnapshot};
//!
//! let registry = MetricsRegistry::new().expect("Failed to create registry");
//!
//! let snapshot = MetricsSnapshot {
//!     stream_running: true,
//!     frames_decoded: 120,
//!     step_size: Some(12.5),
//!     ..Default::default()
//! };
//!
//! registry.update(&snapshot);
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{MetricsError, MetricsRegistry, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, MetricsState, ServerError};
