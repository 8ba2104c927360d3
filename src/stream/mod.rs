//! Live frame ingestion.
//!
//! This module runs the external MJPEG producer, splits its output into
//! decoded frames, and keeps the newest one available to consumers. The
//! stream is a best-effort source: corrupt frames are dropped and a dead
//! producer only shows up in the health snapshot.

mod command;
mod config;
mod diagnostics;
mod extractor;
mod frame;
mod supervisor;

pub use command::{build_command, SupportedFlags};
pub use config::{ConfigError, ExtraOptions, StreamConfig, StreamOptions};
pub use diagnostics::DiagnosticLog;
pub use extractor::{ExtractorStats, FrameExtractor, EOI, SOI};
pub use frame::{Frame, CHANNELS};
pub use supervisor::{FrameStreamSupervisor, StreamError, StreamHealth};

use std::sync::Arc;

/// Anything that can hand out the most recent frame without blocking.
pub trait FrameSource: Send + Sync {
    /// Returns the newest frame, or `None` if none is available.
    fn latest_frame(&self) -> Option<Arc<Frame>>;
}
