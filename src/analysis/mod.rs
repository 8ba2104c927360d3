//! Histogram analysis of decoded frames.
//!
//! Exposure is judged purely by population: how many pixels sit in the
//! dark band and how many in the bright band, compared with the share
//! each band is allowed to hold.

mod histogram;
mod targets;

pub use histogram::{compute, ChannelSelector, Histogram, HistogramFractions, ParseSelectorError};
pub use targets::{ExposureError, ExposureTargets};
