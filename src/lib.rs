//! Closed-loop LED exposure control
//!
//! Keeps a camera image well exposed by adjusting LED illumination instead
//! of camera settings. A live MJPEG stream from an external producer is
//! decoded into frames, each frame's histogram tails are compared with
//! target shares, and one LED channel is nudged up or down by an adaptive
//! step until the image sits on target.
//!
//! # Architecture
//!
//! ```text
//! producer stdout → stream (extract + decode) → latest frame
//!                                                   ↓
//!                actuator ← control (adaptive step) ← analysis (histogram)
//! ```
//!
//! # Design Principles
//!
//! - **Latest frame wins**: consumers never queue; stale frames are replaced
//! - **Best-effort stream**: corrupt frames are dropped, failures surface in health
//! - **Monotone step**: the controller's step never grows within a run
//! - **Non-blocking ticks**: the controller schedules itself and never sleeps
//!
//! # Example
//!
//! ```no_run
//! use led_exposure::{
//!     analysis::{ChannelSelector, ExposureTargets},
//!     control::{ControllerConfig, ExposureController, SimulatedPanel, TimerScheduler},
//!     stream::{FrameStreamSupervisor, StreamConfig},
//! };
//! use std::sync::Arc;
//!
//! let supervisor = Arc::new(FrameStreamSupervisor::new(StreamConfig::default()).unwrap());
//! supervisor.start().unwrap();
//!
//! let controller = ExposureController::new(
//!     ControllerConfig::default(),
//!     supervisor.clone(),
//!     Arc::new(SimulatedPanel::new()),
//!     Arc::new(TimerScheduler::new().unwrap()),
//! )
//! .unwrap();
//!
//! controller.on_update(|status| println!("{:?}", status));
//! controller
//!     .start("weiß", ChannelSelector::Luma, ExposureTargets::default(), 20.0)
//!     .unwrap();
//! ```

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod analysis;
pub mod config;
pub mod control;
pub mod metrics;
pub mod stream;

// Re-export commonly used types at crate root
pub use analysis::{ChannelSelector, ExposureTargets, HistogramFractions};
pub use config::FileConfig;
pub use control::{
    Actuator, ControllerConfig, ControllerPhase, ControllerStatus, ExposureController,
    SimulatedPanel,
};
pub use stream::{Frame, FrameSource, FrameStreamSupervisor, StreamConfig, StreamHealth};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
