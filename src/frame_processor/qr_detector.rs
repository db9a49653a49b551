// SPDX-License-Identifier: GPL-3.0-only

//! QR code decoding
//!
//! This module implements the decode worker's algorithm using the rqrr
//! crate. The square RGBA buffer from the sampler is reduced to luma, every
//! QR grid in it is located and each one is decoded independently.

use crate::backends::camera::format_converters::rgba_to_luma;
use crate::pipeline::{
    Chunk, DecodeResponse, Decoder, DecoderFactory, PixelBuffer, Point, decoder_factory,
};
use std::time::Instant;
use tracing::{debug, trace};

/// QR code decoder run on the decode worker thread
#[derive(Debug, Default)]
pub struct QrDecoder {
    decoded: u64,
}

impl QrDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory building a fresh decoder on the worker thread
    pub fn factory() -> DecoderFactory {
        decoder_factory(|| Ok(Box::new(QrDecoder::new())))
    }

    /// Codes decoded so far
    pub fn decoded(&self) -> u64 {
        self.decoded
    }
}

impl Decoder for QrDecoder {
    fn decode(&mut self, buffer: &PixelBuffer) -> DecodeResponse {
        let response = decode_rgba(buffer);
        if response.data.is_some() {
            self.decoded += 1;
        }
        response
    }
}

/// Locate and decode every QR code in an RGBA buffer
pub fn decode_rgba(buffer: &PixelBuffer) -> DecodeResponse {
    let start = Instant::now();
    let width = buffer.width as usize;
    let height = buffer.height as usize;

    // Truncated buffers are treated as "nothing found"
    if width == 0 || height == 0 || buffer.data.len() < width * height * 4 {
        debug!(
            width,
            height,
            len = buffer.data.len(),
            "Malformed pixel buffer, skipping decode"
        );
        return DecodeResponse::empty();
    }

    let luma = rgba_to_luma(&buffer.data[..width * height * 4]);
    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| luma[y * width + x]);
    let grids = prepared.detect_grids();

    trace!(
        count = grids.len(),
        detection_ms = start.elapsed().as_millis(),
        "QR grid detection complete"
    );

    let mut response = DecodeResponse::empty();
    for grid in grids {
        let corners: [Point; 4] = std::array::from_fn(|i| Point {
            x: grid.bounds[i].x,
            y: grid.bounds[i].y,
        });
        match grid.decode() {
            Ok((meta, content)) => {
                debug!(
                    content = %content,
                    version = meta.version.0,
                    ecc_level = meta.ecc_level,
                    "Decoded QR code"
                );
                if response.data.is_none() {
                    response.data = Some(content.clone());
                }
                response.chunks.push(Chunk {
                    corners,
                    version: meta.version.0,
                    ecc_level: meta.ecc_level,
                    text: Some(content),
                });
            }
            Err(e) => {
                debug!(error = ?e, "Failed to decode QR grid");
            }
        }
    }

    if !response.chunks.is_empty() {
        debug!(
            count = response.chunks.len(),
            total_ms = start.elapsed().as_millis(),
            "QR decoding found codes"
        );
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(size: u32, value: u8) -> PixelBuffer {
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        for _ in 0..size * size {
            data.extend_from_slice(&[value, value, value, 255]);
        }
        PixelBuffer {
            width: size,
            height: size,
            data,
        }
    }

    #[test]
    fn test_blank_frame_has_no_payload() {
        let mut decoder = QrDecoder::new();
        let response = decoder.decode(&uniform(64, 255));
        assert_eq!(response, DecodeResponse::empty());
        assert_eq!(decoder.decoded(), 0);
    }

    #[test]
    fn test_truncated_buffer_is_not_an_error() {
        let mut buffer = uniform(16, 0);
        buffer.data.truncate(10);
        assert_eq!(decode_rgba(&buffer), DecodeResponse::empty());
    }

    #[test]
    fn test_noise_does_not_panic() {
        let size = 96u32;
        let mut data = Vec::with_capacity((size * size * 4) as usize);
        let mut seed = 0x2545_f491u32;
        for _ in 0..size * size {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            let v = if seed & 1 == 0 { 0 } else { 255 };
            data.extend_from_slice(&[v, v, v, 255]);
        }
        let response = decode_rgba(&PixelBuffer {
            width: size,
            height: size,
            data,
        });
        assert_eq!(response.chunks.len(), response.chunks.iter().filter(|c| c.text.is_some()).count());
    }
}
