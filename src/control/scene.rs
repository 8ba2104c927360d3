//! Synthetic frame source lit by a simulated panel.

use super::Actuator;
use crate::stream::{Frame, FrameSource};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A horizontal gray ramp whose brightness scales with one actuator channel.
///
/// Column `x` of a `width`-wide frame has base level `x * 255 / (width - 1)`;
/// the rendered level is `min(255, round(base * percent / reference))`.
/// At `reference` percent the ramp is rendered unscaled.
pub struct SimulatedScene {
    actuator: Arc<dyn Actuator>,
    channel: String,
    width: u32,
    height: u32,
    reference: f64,
    sequence: AtomicU64,
}

impl SimulatedScene {
    pub fn new(actuator: Arc<dyn Actuator>, channel: impl Into<String>) -> Self {
        Self {
            actuator,
            channel: channel.into(),
            width: 256,
            height: 4,
            reference: 50.0,
            sequence: AtomicU64::new(0),
        }
    }

    /// Percent at which the ramp covers the full 0-255 range.
    pub fn with_reference(mut self, percent: f64) -> Self {
        self.reference = percent.max(f64::EPSILON);
        self
    }

    /// Renders the scene at `percent` illumination.
    pub fn render(&self, percent: f64, sequence: u64) -> Frame {
        let gain = percent.clamp(0.0, 100.0) / self.reference;
        let span = f64::from(self.width - 1);
        let row: Vec<u8> = (0..self.width)
            .map(|x| {
                let base = f64::from(x) * 255.0 / span;
                (base * gain).round().min(255.0) as u8
            })
            .collect();
        let gray: Vec<u8> = (0..self.height).flat_map(|_| row.iter().copied()).collect();
        Frame::from_gray(&gray, self.width, self.height, sequence)
    }
}

impl FrameSource for SimulatedScene {
    fn latest_frame(&self) -> Option<Arc<Frame>> {
        let percent = match self.actuator.get_channel(&self.channel) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(channel = %self.channel, error = %e, "Scene lighting unavailable");
                return None;
            }
        };
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Some(Arc::new(self.render(percent, sequence)))
    }
}
