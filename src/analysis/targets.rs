//! Exposure targets and the signed error derived from them.
//!
//! A frame is on target when neither the dark band nor the bright band
//! holds more than its allowed share of pixels.

use super::histogram::{self, ChannelSelector, HistogramFractions};
use crate::stream::{ConfigError, Frame};
use serde::{Deserialize, Serialize};

/// Cutoffs and allowed population shares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureTargets {
    /// Intensities `0..=low_cutoff` count as dark.
    pub low_cutoff: u8,
    /// Intensities `255-high_cutoff..=255` count as bright.
    pub high_cutoff: u8,
    /// Maximum acceptable dark fraction.
    pub low_target: f64,
    /// Maximum acceptable bright fraction.
    pub high_target: f64,
}

impl Default for ExposureTargets {
    fn default() -> Self {
        Self {
            low_cutoff: 10,
            high_cutoff: 10,
            low_target: 0.05,
            high_target: 0.05,
        }
    }
}

impl ExposureTargets {
    /// Rejects shares outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("low_target", self.low_target), ("high_target", self.high_target)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidTargets(format!(
                    "{name} {value} outside [0, 1]"
                )));
            }
        }
        Ok(())
    }

    /// Measures a frame against these cutoffs.
    pub fn measure(&self, frame: &Frame, selector: ChannelSelector) -> HistogramFractions {
        histogram::compute(frame, selector, self.low_cutoff, self.high_cutoff)
    }

    /// Signed error: positive when too dark, negative when too bright.
    pub fn error(&self, fractions: &HistogramFractions) -> ExposureError {
        let dark = (fractions.low_fraction - self.low_target).max(0.0);
        let bright = (fractions.high_fraction - self.high_target).max(0.0);
        ExposureError {
            dark,
            bright,
            error: dark - bright,
        }
    }
}

/// Excess dark and bright population relative to the targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureError {
    /// Dark fraction above its target, or zero.
    pub dark: f64,
    /// Bright fraction above its target, or zero.
    pub bright: f64,
    /// `dark - bright`.
    pub error: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_dark_is_positive() {
        let targets = ExposureTargets::default();
        let err = targets.error(&HistogramFractions {
            low_fraction: 0.20,
            high_fraction: 0.01,
        });

        assert!((err.dark - 0.15).abs() < 1e-12);
        assert_eq!(err.bright, 0.0);
        assert!((err.error - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_too_bright_is_negative() {
        let targets = ExposureTargets::default();
        let err = targets.error(&HistogramFractions {
            low_fraction: 0.0,
            high_fraction: 0.30,
        });

        assert!((err.error + 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_both_bands_over_target_cancel() {
        let targets = ExposureTargets::default();
        let err = targets.error(&HistogramFractions {
            low_fraction: 0.15,
            high_fraction: 0.15,
        });

        assert!(err.error.abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range_target_rejected() {
        let targets = ExposureTargets {
            low_target: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            targets.validate(),
            Err(ConfigError::InvalidTargets(_))
        ));
    }
}
