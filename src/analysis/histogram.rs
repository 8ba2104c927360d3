//! Intensity histograms and dark/bright population fractions.

use crate::stream::Frame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which intensity the histogram is built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSelector {
    /// Unweighted mean of the three channels.
    #[default]
    #[serde(alias = "gray", alias = "Gray")]
    Luma,
    #[serde(alias = "r", alias = "R")]
    Red,
    #[serde(alias = "g", alias = "G")]
    Green,
    #[serde(alias = "b", alias = "B")]
    Blue,
}

impl ChannelSelector {
    /// Intensity of one pixel under this selector.
    #[inline]
    pub fn intensity(self, px: [u8; 3]) -> u8 {
        match self {
            // sum / 3 never lands on .5, so this is round-to-nearest.
            Self::Luma => ((px[0] as u16 + px[1] as u16 + px[2] as u16 + 1) / 3) as u8,
            Self::Red => px[0],
            Self::Green => px[1],
            Self::Blue => px[2],
        }
    }
}

impl fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Luma => "Gray",
            Self::Red => "R",
            Self::Green => "G",
            Self::Blue => "B",
        };
        f.write_str(name)
    }
}

/// Error for unrecognized selector names.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown histogram channel '{0}' (expected Gray, R, G or B)")]
pub struct ParseSelectorError(String);

impl FromStr for ChannelSelector {
    type Err = ParseSelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gray" | "grey" | "luma" | "l" => Ok(Self::Luma),
            "r" | "red" => Ok(Self::Red),
            "g" | "green" => Ok(Self::Green),
            "b" | "blue" => Ok(Self::Blue),
            _ => Err(ParseSelectorError(s.to_string())),
        }
    }
}

/// Share of pixels in the dark and bright bands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HistogramFractions {
    /// Fraction of pixels with intensity `<= low_cutoff`.
    pub low_fraction: f64,
    /// Fraction of pixels with intensity `>= 255 - high_cutoff`.
    pub high_fraction: f64,
}

/// 256-bucket intensity histogram.
#[derive(Debug, Clone)]
pub struct Histogram {
    counts: [u64; 256],
    total: u64,
}

impl Histogram {
    /// Builds the histogram of `frame` under `selector`.
    pub fn from_frame(frame: &Frame, selector: ChannelSelector) -> Self {
        let mut counts = [0u64; 256];
        let mut total = 0u64;
        for px in frame.rgb() {
            counts[selector.intensity(px) as usize] += 1;
            total += 1;
        }
        Self { counts, total }
    }

    /// Number of pixels with intensity in `lo..=hi`.
    pub fn count_range(&self, lo: u8, hi: u8) -> u64 {
        if lo > hi {
            return 0;
        }
        self.counts[lo as usize..=hi as usize].iter().sum()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Dark and bright fractions for the given cutoffs.
    pub fn fractions(&self, low_cutoff: u8, high_cutoff: u8) -> HistogramFractions {
        let total = self.total.max(1) as f64;
        HistogramFractions {
            low_fraction: self.count_range(0, low_cutoff) as f64 / total,
            high_fraction: self.count_range(255 - high_cutoff, 255) as f64 / total,
        }
    }
}

/// Computes the dark/bright fractions of one frame.
pub fn compute(
    frame: &Frame,
    selector: ChannelSelector,
    low_cutoff: u8,
    high_cutoff: u8,
) -> HistogramFractions {
    Histogram::from_frame(frame, selector).fractions(low_cutoff, high_cutoff)
}
