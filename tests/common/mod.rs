//! Helpers shared by the integration tests.

#![allow(dead_code)]

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

/// Encodes a noisy RGB image so the JPEG stays well above size thresholds.
pub fn encode_jpeg(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let pixels: Vec<u8> = (0..width * height * 3)
        .map(|i| ((i.wrapping_mul(2_654_435_761) >> 13) as u8) ^ seed)
        .collect();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode(&pixels, width, height, ExtendedColorType::Rgb8)
        .unwrap();
    out
}

/// Concatenates `count` distinct JPEGs with junk between them.
pub fn mjpeg_stream(count: u8) -> Vec<u8> {
    let mut stream = Vec::new();
    for i in 0..count {
        stream.extend_from_slice(b"\x00junk");
        stream.extend_from_slice(&encode_jpeg(64, 48, i));
    }
    stream
}
