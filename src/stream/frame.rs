//! Decoded frame type shared between the stream and the controller.

use chrono::{DateTime, Utc};

/// Number of interleaved channels in every decoded frame.
pub const CHANNELS: usize = 3;

/// A single decoded frame from the live stream.
///
/// Pixels are stored as interleaved 8-bit RGB triples, row-major.
/// Frames are immutable once built; consumers share them behind an
/// `Arc` and never see a partially written buffer.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved RGB pixel data.
    pixels: Vec<u8>,
    /// Frame width in pixels.
    width: u32,
    /// Frame height in pixels.
    height: u32,
    /// Wall-clock time the frame was decoded.
    decoded_at: DateTime<Utc>,
    /// Monotonic sequence number within one extractor lifetime.
    sequence: u64,
}

impl Frame {
    /// Creates a new frame from interleaved RGB data.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self {
            pixels,
            width,
            height,
            decoded_at: Utc::now(),
            sequence,
        }
    }

    /// Creates a frame whose three channels all carry the same value per pixel.
    pub fn from_gray(gray: &[u8], width: u32, height: u32, sequence: u64) -> Self {
        let pixels = gray.iter().flat_map(|&v| [v, v, v]).collect();
        Self::new(pixels, width, height, sequence)
    }

    /// Returns the interleaved pixel data.
    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Iterates over pixels as `[c0, c1, c2]` triples.
    pub fn rgb(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.pixels
            .chunks_exact(CHANNELS)
            .map(|px| [px[0], px[1], px[2]])
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the decode timestamp.
    #[inline]
    pub fn decoded_at(&self) -> DateTime<Utc> {
        self.decoded_at
    }

    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Returns the total number of pixels (width * height).
    #[inline]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Validates that the pixel buffer size matches dimensions.
    pub fn is_valid(&self) -> bool {
        self.pixels.len() == self.pixel_count() * CHANNELS
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("pixel_bytes", &self.pixels.len())
            .finish()
    }
}
