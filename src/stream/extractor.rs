//! Incremental JPEG frame extraction from a concatenated byte stream.
//!
//! The producer writes MJPEG as back-to-back JPEG images with no
//! container. Frames are recovered by scanning for the start-of-image
//! and end-of-image markers and decoding whatever lies between them.

use super::Frame;
use image::ImageFormat;

/// Start-of-image marker.
pub const SOI: [u8; 2] = [0xFF, 0xD8];
/// End-of-image marker.
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// Running counters for the extractor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractorStats {
    /// Frames decoded successfully.
    pub decoded: u64,
    /// Candidates below the minimum size.
    pub undersized: u64,
    /// Candidates that failed to decode.
    pub corrupt: u64,
    /// Times the buffer hit its ceiling and was truncated.
    pub truncations: u64,
}

impl ExtractorStats {
    /// Total candidates thrown away.
    pub fn dropped(&self) -> u64 {
        self.undersized + self.corrupt
    }
}

/// Splits an unbounded byte stream into decoded frames.
pub struct FrameExtractor {
    /// Bytes received but not yet part of a complete frame.
    buffer: Vec<u8>,
    /// Minimum candidate length in bytes.
    min_frame_bytes: usize,
    /// Ceiling for `buffer` after each feed.
    max_buffer_bytes: usize,
    /// Sequence number of the next decoded frame.
    next_sequence: u64,
    stats: ExtractorStats,
}

impl FrameExtractor {
    pub fn new(min_frame_bytes: usize, max_buffer_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            min_frame_bytes,
            max_buffer_bytes: max_buffer_bytes.max(SOI.len()),
            next_sequence: 1,
            stats: ExtractorStats::default(),
        }
    }

    /// Appends `bytes` and returns every frame completed by them, in order.
    ///
    /// Undersized and corrupt candidates are dropped without error.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(candidate) = self.next_candidate() {
            if candidate.len() < self.min_frame_bytes {
                self.stats.undersized += 1;
                tracing::trace!(bytes = candidate.len(), "Discarded undersized candidate");
                continue;
            }
            match self.decode(&candidate) {
                Some(frame) => frames.push(frame),
                None => {
                    self.stats.corrupt += 1;
                    tracing::trace!(bytes = candidate.len(), "Discarded corrupt candidate");
                }
            }
        }

        self.enforce_ceiling();
        frames
    }

    /// Removes the next complete `SOI..=EOI` span from the buffer.
    fn next_candidate(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find(&self.buffer, &SOI, 0) else {
            // A marker may straddle the chunk boundary; keep the last byte.
            let keep_from = self.buffer.len().saturating_sub(1);
            self.buffer.drain(..keep_from);
            return None;
        };
        // Nothing before a start marker can ever become part of a frame.
        self.buffer.drain(..start);

        let end = find(&self.buffer, &EOI, SOI.len())?;
        let candidate: Vec<u8> = self.buffer.drain(..end + EOI.len()).collect();
        Some(candidate)
    }

    fn enforce_ceiling(&mut self) {
        if self.buffer.len() <= self.max_buffer_bytes {
            return;
        }
        self.stats.truncations += 1;
        match rfind(&self.buffer, &SOI) {
            Some(pos) if self.buffer.len() - pos <= self.max_buffer_bytes => {
                self.buffer.drain(..pos);
            }
            _ => self.buffer.clear(),
        }
        tracing::debug!(
            remaining = self.buffer.len(),
            ceiling = self.max_buffer_bytes,
            "Stream buffer truncated"
        );
    }

    fn decode(&mut self, jpeg: &[u8]) -> Option<Frame> {
        let decoded = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg).ok()?;
        // Grayscale and CMYK sources are normalized to interleaved RGB here.
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();

        let frame = Frame::new(rgb.into_raw(), width, height, self.next_sequence);
        self.next_sequence += 1;
        self.stats.decoded += 1;
        tracing::trace!(sequence = frame.sequence(), width, height, "Decoded frame");
        Some(frame)
    }

    /// Bytes currently held back waiting for an end marker.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats
    }

    /// Drops pending bytes. Counters and sequence numbers are kept.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == needle)
        .map(|pos| pos + from)
}

fn rfind(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).rposition(|w| w == needle)
}
