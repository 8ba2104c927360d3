//! Producer and extraction configuration.
//!
//! Exposure and gain are fixed on the producer side whenever auto-exposure
//! is off: the illumination panel is the only thing allowed to change the
//! brightness of the scene while the controller runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Configuration for the external frame producer and the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Producer executable name or path.
    pub program: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Target frames per second.
    pub framerate: u32,
    /// Fixed exposure time in microseconds (ignored with auto-exposure).
    pub shutter_us: Option<u32>,
    /// Fixed analog gain (ignored with auto-exposure).
    pub gain: Option<f32>,
    /// MJPEG quality passed to the producer.
    pub quality: u8,
    /// Candidates shorter than this are treated as marker collisions.
    pub min_frame_bytes: usize,
    /// Ceiling for the pending stream buffer.
    pub max_buffer_bytes: usize,
    /// Read size for the primary output reader.
    pub read_chunk_bytes: usize,
    /// Capacity of the diagnostic ring buffer.
    pub diagnostic_lines: usize,
    /// Window in which an exiting producer counts as "exited immediately".
    pub startup_grace_ms: u64,
    /// Wait after the graceful signal before the producer is killed.
    pub stop_timeout_ms: u64,
    /// Bounded wait for each reader thread at stop.
    pub join_timeout_ms: u64,
    /// Producer option bag.
    pub extra: ExtraOptions,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            program: "libcamera-vid".to_string(),
            width: 640,
            height: 480,
            framerate: 15,
            shutter_us: None,
            gain: None,
            quality: 85,
            min_frame_bytes: 1024,
            max_buffer_bytes: 8 * 1024 * 1024,
            read_chunk_bytes: 64 * 1024,
            diagnostic_lines: 200,
            startup_grace_ms: 100,
            stop_timeout_ms: 1500,
            join_timeout_ms: 1000,
            extra: ExtraOptions::default(),
        }
    }
}

impl StreamConfig {
    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::InvalidDimensions);
        }
        if self.framerate == 0 || self.framerate > 120 {
            return Err(ConfigError::InvalidFrameRate);
        }
        if self.quality == 0 || self.quality > 100 {
            return Err(ConfigError::InvalidQuality);
        }
        if self.read_chunk_bytes == 0 || self.max_buffer_bytes < self.read_chunk_bytes {
            return Err(ConfigError::InvalidBufferSizes);
        }
        if self.diagnostic_lines == 0 {
            return Err(ConfigError::InvalidDiagnosticCapacity);
        }
        Ok(())
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

fn default_awb_gains() -> (f32, f32) {
    (2.0, 1.5)
}

/// Optional producer settings.
///
/// Every entry maps onto one producer flag. Flags the producer build does
/// not advertise in its help text are left out of the command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraOptions {
    /// Leave auto-exposure on; drops the fixed shutter and gain.
    pub ae: bool,
    /// Leave auto white balance on; otherwise fixed gains are used.
    pub awb: bool,
    /// Red and blue white balance gains used when `awb` is off.
    #[serde(default = "default_awb_gains")]
    pub awbgains: (f32, f32),
    /// Denoise mode (`cdn_off`, `fast`, `hq`, ...).
    pub denoise: Option<String>,
    pub sharpness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    /// Flicker period (`50hz`, `60hz`, ...). Only passed if supported.
    pub flicker: Option<String>,
    /// Additional `--key value` pairs passed through verbatim.
    pub custom: BTreeMap<String, String>,
}

impl Default for ExtraOptions {
    fn default() -> Self {
        Self {
            ae: false,
            awb: false,
            awbgains: default_awb_gains(),
            denoise: None,
            sharpness: None,
            contrast: None,
            saturation: None,
            flicker: None,
            custom: BTreeMap::new(),
        }
    }
}

/// A partial update applied by `reconfigure`.
///
/// `None` leaves the current value untouched. The nested options on
/// `shutter_us` and `gain` allow clearing an override explicitly.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Requested frame rate; rounded to the nearest integer.
    pub framerate: Option<f64>,
    pub shutter_us: Option<Option<u32>>,
    pub gain: Option<Option<f32>>,
    pub extra: Option<ExtraOptions>,
}

impl StreamOptions {
    /// Applies the update to a configuration.
    pub fn apply_to(&self, config: &mut StreamConfig) {
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(fps) = self.framerate {
            config.framerate = fps.round().max(0.0) as u32;
        }
        if let Some(shutter) = self.shutter_us {
            config.shutter_us = shutter;
        }
        if let Some(gain) = self.gain {
            config.gain = gain;
        }
        if let Some(extra) = &self.extra {
            config.extra = extra.clone();
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("producer program must not be empty")]
    EmptyProgram,
    #[error("invalid frame dimensions")]
    InvalidDimensions,
    #[error("invalid frame rate (must be 1-120 fps)")]
    InvalidFrameRate,
    #[error("invalid quality (must be 1-100)")]
    InvalidQuality,
    #[error("invalid buffer sizes (ceiling must be at least one read chunk)")]
    InvalidBufferSizes,
    #[error("diagnostic ring buffer must hold at least one line")]
    InvalidDiagnosticCapacity,
    #[error("invalid controller settings: {0}")]
    InvalidController(String),
    #[error("invalid exposure targets: {0}")]
    InvalidTargets(String),
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}
