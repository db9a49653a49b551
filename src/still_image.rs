// SPDX-License-Identifier: GPL-3.0-only

//! Still image scanning
//!
//! Runs a single image file through the same square crop and decoder the
//! live pipeline uses.

use crate::backends::camera::CameraFrame;
use crate::config::check_resolution;
use crate::frame_processor::QrDecoder;
use crate::pipeline::sampler::crop_to_square;
use crate::pipeline::{DecodeResponse, Decoder};
use crate::errors::{ScanError, ScanResult};
use std::path::Path;
use tracing::{debug, info};

/// Load an image file (any format `image` reads) as an RGBA frame
pub fn load_frame(path: &Path) -> ScanResult<CameraFrame> {
    info!(path = %path.display(), "Loading image file");

    let img = image::open(path)
        .map_err(|e| ScanError::Io(format!("Failed to load image '{}': {}", path.display(), e)))?;
    let rgba = img.to_rgba8();
    let (width, height) = (rgba.width(), rgba.height());
    debug!(width, height, "Image loaded successfully");

    Ok(CameraFrame::from_rgba(width, height, rgba.into_raw()))
}

/// Decode the QR code in an image file
pub fn scan_file(path: &Path, target_resolution_px: u32) -> ScanResult<DecodeResponse> {
    let frame = load_frame(path)?;
    scan_frame(&frame, target_resolution_px)
}

/// Decode the QR code in an already loaded frame
pub fn scan_frame(frame: &CameraFrame, target_resolution_px: u32) -> ScanResult<DecodeResponse> {
    check_resolution(target_resolution_px)?;
    let buffer = crop_to_square(frame, target_resolution_px).ok_or_else(|| {
        ScanError::Io(format!(
            "Cannot sample a {}x{} image",
            frame.width, frame.height
        ))
    })?;
    Ok(QrDecoder::new().decode(&buffer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_io_error() {
        let result = scan_file(Path::new("/nonexistent/qr.png"), 600);
        assert!(matches!(result, Err(ScanError::Io(_))));
    }

    #[test]
    fn test_empty_frame_cannot_be_sampled() {
        let frame = CameraFrame::from_rgba(0, 0, Vec::new());
        assert!(matches!(scan_frame(&frame, 600), Err(ScanError::Io(_))));
    }

    #[test]
    fn test_oversized_resolution_is_config_error() {
        let frame = CameraFrame::from_rgba(4, 4, vec![0; 64]);
        assert!(matches!(scan_frame(&frame, 40_000), Err(ScanError::Config(_))));
    }

    /// Render `payload` as a QR code centered on a white `width x height` frame
    fn qr_frame(payload: &str, width: u32, height: u32, module_px: u32) -> CameraFrame {
        let code = qrcode::QrCode::new(payload.as_bytes()).unwrap();
        let modules = code.width() as u32;
        let colors = code.to_colors();
        let left = (width - modules * module_px) / 2;
        let top = (height - modules * module_px) / 2;

        let mut data = vec![255u8; (width * height * 4) as usize];
        for (i, color) in colors.iter().enumerate() {
            if *color != qrcode::Color::Dark {
                continue;
            }
            let mx = i as u32 % modules;
            let my = i as u32 / modules;
            for y in top + my * module_px..top + (my + 1) * module_px {
                for x in left + mx * module_px..left + (mx + 1) * module_px {
                    let offset = ((y * width + x) * 4) as usize;
                    data[offset..offset + 3].copy_from_slice(&[0, 0, 0]);
                }
            }
        }
        CameraFrame::from_rgba(width, height, data)
    }

    #[test]
    fn test_hd_frame_with_code_decodes_payload() {
        let frame = qr_frame("hello scanner", 1280, 720, 12);
        let response = scan_frame(&frame, 600).unwrap();

        assert_eq!(response.data.as_deref(), Some("hello scanner"));
        assert_eq!(response.chunks.len(), 1);
        let chunk = &response.chunks[0];
        assert_eq!(chunk.text.as_deref(), Some("hello scanner"));
        assert_eq!(chunk.version, 1);
        // Corners land inside the 600x600 buffer
        for corner in chunk.corners {
            assert!((0..600).contains(&corner.x) && (0..600).contains(&corner.y));
        }
    }

    #[test]
    fn test_blank_image_has_no_payload() {
        let frame = CameraFrame::from_rgba(40, 30, vec![255; 40 * 30 * 4]);
        let response = scan_frame(&frame, 120).unwrap();
        assert!(response.data.is_none());
        assert!(response.chunks.is_empty());
    }
}
