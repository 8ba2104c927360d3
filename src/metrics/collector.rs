//! Metrics collection and registry.

use crate::control::{ControllerPhase, ControllerStatus};
use crate::stream::StreamHealth;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A snapshot of stream and controller state for a metrics update.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// Producer is supposed to be running.
    pub stream_running: bool,
    /// Producer process is still alive.
    pub process_alive: bool,
    /// Frames decoded since the supervisor was created.
    pub frames_decoded: u64,
    /// Candidates discarded as undersized or undecodable.
    pub frames_dropped: u64,
    /// Ticks completed in the current controller run.
    pub controller_cycles: u32,
    /// Controller is regulating.
    pub controller_running: bool,
    /// Latest per-tick values; absent before the first tick.
    pub step_size: Option<f64>,
    pub low_fraction: Option<f64>,
    pub high_fraction: Option<f64>,
    pub direction: Option<i8>,
    pub applied_value: Option<f64>,
}

impl MetricsSnapshot {
    /// Builds a snapshot from the supervisor health and the last controller status.
    pub fn from_components(health: &StreamHealth, status: Option<&ControllerStatus>) -> Self {
        let mut snapshot = Self {
            stream_running: health.running,
            process_alive: health.process_alive,
            frames_decoded: health.frames_decoded,
            frames_dropped: health.frames_dropped,
            ..Default::default()
        };
        if let Some(status) = status {
            snapshot.controller_cycles = status.cycle;
            snapshot.controller_running = status.phase == ControllerPhase::Running;
            snapshot.step_size = Some(status.step_size);
            snapshot.low_fraction = Some(status.low_fraction);
            snapshot.high_fraction = Some(status.high_fraction);
            snapshot.direction = Some(status.direction.signum());
            snapshot.applied_value = status.applied_value;
        }
        snapshot
    }
}

/// Prometheus metrics registry for the exposure loop.
pub struct MetricsRegistry {
    registry: Registry,

    // Stream metrics
    stream_running: IntGauge,
    process_alive: IntGauge,
    frames_decoded: IntCounter,
    frames_dropped: IntCounter,

    // Controller metrics
    controller_running: IntGauge,
    controller_cycles: IntGauge,
    step_size: Gauge,
    low_fraction: Gauge,
    high_fraction: Gauge,
    direction: IntGauge,
    applied_value: Gauge,
}

impl MetricsRegistry {
    /// Creates a new registry with all metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let stream_running = IntGauge::new(
            "led_exposure_stream_running",
            "Whether the frame producer should be running (1) or not (0)",
        )?;
        let process_alive = IntGauge::new(
            "led_exposure_stream_process_alive",
            "Whether the frame producer process is alive",
        )?;
        let frames_decoded = IntCounter::new(
            "led_exposure_frames_decoded_total",
            "Total frames decoded from the MJPEG stream",
        )?;
        let frames_dropped = IntCounter::new(
            "led_exposure_frames_dropped_total",
            "Total frame candidates discarded as undersized or corrupt",
        )?;

        let controller_running = IntGauge::new(
            "led_exposure_controller_running",
            "Whether the exposure controller is regulating",
        )?;
        let controller_cycles = IntGauge::new(
            "led_exposure_controller_cycles",
            "Ticks completed in the current controller run",
        )?;
        let step_size = Gauge::new(
            "led_exposure_controller_step_size",
            "Current controller step in percentage points",
        )?;
        let low_fraction = Gauge::new(
            "led_exposure_low_fraction",
            "Share of pixels in the dark band",
        )?;
        let high_fraction = Gauge::new(
            "led_exposure_high_fraction",
            "Share of pixels in the bright band",
        )?;
        let direction = IntGauge::new(
            "led_exposure_controller_direction",
            "Last control decision (-1 lower, 0 hold, 1 raise)",
        )?;
        let applied_value = Gauge::new(
            "led_exposure_actuator_value",
            "Actuator channel intensity after the last tick in percent",
        )?;

        registry.register(Box::new(stream_running.clone()))?;
        registry.register(Box::new(process_alive.clone()))?;
        registry.register(Box::new(frames_decoded.clone()))?;
        registry.register(Box::new(frames_dropped.clone()))?;
        registry.register(Box::new(controller_running.clone()))?;
        registry.register(Box::new(controller_cycles.clone()))?;
        registry.register(Box::new(step_size.clone()))?;
        registry.register(Box::new(low_fraction.clone()))?;
        registry.register(Box::new(high_fraction.clone()))?;
        registry.register(Box::new(direction.clone()))?;
        registry.register(Box::new(applied_value.clone()))?;

        Ok(Self {
            registry,
            stream_running,
            process_alive,
            frames_decoded,
            frames_dropped,
            controller_running,
            controller_cycles,
            step_size,
            low_fraction,
            high_fraction,
            direction,
            applied_value,
        })
    }

    /// Updates all metrics from a snapshot.
    pub fn update(&self, snapshot: &MetricsSnapshot) {
        self.stream_running.set(i64::from(snapshot.stream_running));
        self.process_alive.set(i64::from(snapshot.process_alive));

        // Counters only move forward by the difference
        let decoded = self.frames_decoded.get();
        if snapshot.frames_decoded > decoded {
            self.frames_decoded.inc_by(snapshot.frames_decoded - decoded);
        }
        let dropped = self.frames_dropped.get();
        if snapshot.frames_dropped > dropped {
            self.frames_dropped.inc_by(snapshot.frames_dropped - dropped);
        }

        self.controller_running.set(i64::from(snapshot.controller_running));
        self.controller_cycles.set(i64::from(snapshot.controller_cycles));

        // Per-tick values keep their last reading until the next tick
        if let Some(step) = snapshot.step_size {
            self.step_size.set(step);
        }
        if let Some(low) = snapshot.low_fraction {
            self.low_fraction.set(low);
        }
        if let Some(high) = snapshot.high_fraction {
            self.high_fraction.set(high);
        }
        if let Some(direction) = snapshot.direction {
            self.direction.set(i64::from(direction));
        }
        if let Some(value) = snapshot.applied_value {
            self.applied_value.set(value);
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
