//! Illumination actuator interface.
//!
//! The controller only ever talks to this trait. Real panels (I2C PWM
//! drivers and the like) live with the caller, who constructs and owns
//! them; [`SimulatedPanel`] stands in for tests and demos.

use parking_lot::RwLock;
use thiserror::Error;

/// Errors reported by an actuator.
#[derive(Debug, Clone, Error)]
pub enum ActuatorError {
    #[error("unknown actuator channel: {0}")]
    UnknownChannel(String),
    #[error("intensity {0} outside 0-100%")]
    OutOfRange(f64),
    #[error("actuator I/O failed: {0}")]
    Io(String),
}

/// A set of named outputs, each driven at 0-100% intensity.
///
/// Calls may block on device I/O. The controller makes them without
/// holding its state lock.
pub trait Actuator: Send + Sync {
    /// Drives `name` at `percent` intensity.
    fn set_channel(&self, name: &str, percent: f64) -> Result<(), ActuatorError>;

    /// Reads back the intensity of `name`.
    fn get_channel(&self, name: &str) -> Result<f64, ActuatorError>;

    /// All channel names in panel order.
    fn list_channels(&self) -> Vec<String>;
}

/// Channel names of the bench LED panel.
pub const BENCH_CHANNELS: [&str; 8] = [
    "rot", "weiß", "blau", "grün", "orange", "gelb", "UV", "pink",
];

/// In-memory panel that remembers what it was set to.
#[derive(Debug)]
pub struct SimulatedPanel {
    channels: RwLock<Vec<(String, f64)>>,
    writes: RwLock<u64>,
}

impl SimulatedPanel {
    /// Creates a panel with the bench channel layout, all at 0%.
    pub fn new() -> Self {
        Self::with_channels(BENCH_CHANNELS)
    }

    pub fn with_channels<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: RwLock::new(names.into_iter().map(|n| (n.into(), 0.0)).collect()),
            writes: RwLock::new(0),
        }
    }

    /// Number of successful `set_channel` calls.
    pub fn writes(&self) -> u64 {
        *self.writes.read()
    }
}

impl Default for SimulatedPanel {
    fn default() -> Self {
        Self::new()
    }
}

impl Actuator for SimulatedPanel {
    fn set_channel(&self, name: &str, percent: f64) -> Result<(), ActuatorError> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(ActuatorError::OutOfRange(percent));
        }
        let mut channels = self.channels.write();
        let slot = channels
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| ActuatorError::UnknownChannel(name.to_string()))?;
        slot.1 = percent;
        *self.writes.write() += 1;
        tracing::trace!(channel = name, percent, "Simulated channel set");
        Ok(())
    }

    fn get_channel(&self, name: &str) -> Result<f64, ActuatorError> {
        self.channels
            .read()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
            .ok_or_else(|| ActuatorError::UnknownChannel(name.to_string()))
    }

    fn list_channels(&self) -> Vec<String> {
        self.channels.read().iter().map(|(n, _)| n.clone()).collect()
    }
}
