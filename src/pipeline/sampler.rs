// SPDX-License-Identifier: GPL-3.0-only

//! Frame sampling
//!
//! Reads the frame currently presented by the render surface, scales it so
//! the shorter side matches the target resolution, centers the longer side
//! and clips the excess. The result is always a `target x target` RGBA
//! buffer, whatever the source aspect ratio.
//!
//! The sampler also owns the one and only sample timer of a run.

use crate::backends::camera::{CameraFrame, PixelFormat};
use crate::constants::MAX_RESOLUTION_PX;
use crate::surface::{ReadyState, RenderSurface};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Raw RGBA pixels handed to the decoder
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA, `width * height * 4` bytes
    pub data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PixelBuffer({}x{}, {} bytes)", self.width, self.height, self.data.len())
    }
}

/// Outcome of one sampling attempt
#[derive(Debug)]
pub enum Capture {
    Captured(PixelBuffer),
    /// The surface has not buffered enough data yet; try again later
    SkippedNotReady,
}

/// Placement of the scaled source frame on the square canvas
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropGeometry {
    /// Edge length of the output square
    pub size: u32,
    /// Scale applied to the source frame
    pub ratio: f64,
    pub scaled_width: f64,
    pub scaled_height: f64,
    /// Left edge of the scaled frame on the canvas (zero or negative)
    pub offset_x: f64,
    /// Top edge of the scaled frame on the canvas (zero or negative)
    pub offset_y: f64,
}

impl CropGeometry {
    /// Geometry for a `width x height` source
    ///
    /// `None` for empty frames and for targets above [`MAX_RESOLUTION_PX`].
    pub fn compute(width: u32, height: u32, target: u32) -> Option<Self> {
        let shortest = width.min(height);
        if shortest == 0 || target == 0 || target > MAX_RESOLUTION_PX {
            return None;
        }

        let size = target as f64;
        let ratio = size / shortest as f64;
        let scaled_width = ratio * width as f64;
        let scaled_height = ratio * height as f64;

        Some(Self {
            size: target,
            ratio,
            scaled_width,
            scaled_height,
            offset_x: -(scaled_width - size) / 2.0,
            offset_y: -(scaled_height - size) / 2.0,
        })
    }

    /// Output dimensions, always square
    pub fn output_dimensions(&self) -> (u32, u32) {
        (self.size, self.size)
    }

    /// Source coordinate sampled for the center of output pixel `out`
    fn source_coord(&self, out: u32, offset: f64) -> f64 {
        (out as f64 + 0.5 - offset) / self.ratio - 0.5
    }
}

/// Crop and scale a frame into a square RGBA buffer
pub fn crop_to_square(frame: &CameraFrame, target: u32) -> Option<PixelBuffer> {
    let geometry = CropGeometry::compute(frame.width, frame.height, target)?;
    let (out_width, out_height) = geometry.output_dimensions();

    let src_width = frame.width as usize;
    let src_height = frame.height as usize;
    let stride = frame.stride as usize;
    let bpp = frame.format.bytes_per_pixel();

    let get = |px: usize, py: usize, channel: usize| -> f64 {
        let channel = if frame.format == PixelFormat::Gray8 { 0 } else { channel };
        let offset = py * stride + px * bpp + channel;
        frame.data.get(offset).copied().unwrap_or(0) as f64
    };

    let len = (out_width as usize)
        .checked_mul(out_height as usize)?
        .checked_mul(4)?;
    let mut data = Vec::with_capacity(len);

    for oy in 0..out_height {
        let sy = geometry
            .source_coord(oy, geometry.offset_y)
            .clamp(0.0, (src_height - 1) as f64);
        let y0 = sy.floor() as usize;
        let y1 = (y0 + 1).min(src_height - 1);
        let y_frac = sy - y0 as f64;

        for ox in 0..out_width {
            let sx = geometry
                .source_coord(ox, geometry.offset_x)
                .clamp(0.0, (src_width - 1) as f64);
            let x0 = sx.floor() as usize;
            let x1 = (x0 + 1).min(src_width - 1);
            let x_frac = sx - x0 as f64;

            for channel in 0..3 {
                let value = get(x0, y0, channel) * (1.0 - x_frac) * (1.0 - y_frac)
                    + get(x1, y0, channel) * x_frac * (1.0 - y_frac)
                    + get(x0, y1, channel) * (1.0 - x_frac) * y_frac
                    + get(x1, y1, channel) * x_frac * y_frac;
                data.push(value.round().clamp(0.0, 255.0) as u8);
            }
            data.push(255);
        }
    }

    Some(PixelBuffer {
        width: out_width,
        height: out_height,
        data,
    })
}

struct PendingTimer {
    seq: u64,
    handle: JoinHandle<()>,
}

/// Samples the render surface on behalf of one pipeline run
pub struct FrameSampler {
    target_resolution: u32,
    surface: Option<Arc<dyn RenderSurface>>,
    timer: Option<PendingTimer>,
    next_seq: u64,
}

impl FrameSampler {
    pub fn new(target_resolution: u32) -> Self {
        Self {
            target_resolution,
            surface: None,
            timer: None,
            next_seq: 0,
        }
    }

    pub fn target_resolution(&self) -> u32 {
        self.target_resolution
    }

    /// The surface the stream got attached to
    pub fn on_surface_ready(&mut self, surface: Arc<dyn RenderSurface>) {
        self.surface = Some(surface);
    }

    /// Read and crop the current frame
    pub fn capture_once(&self) -> Capture {
        let Some(surface) = &self.surface else {
            return Capture::SkippedNotReady;
        };
        if surface.ready_state() < ReadyState::HaveEnoughData {
            trace!(state = ?surface.ready_state(), "Surface not ready for sampling");
            return Capture::SkippedNotReady;
        }
        let Some(frame) = surface.current_frame() else {
            return Capture::SkippedNotReady;
        };

        match crop_to_square(&frame, self.target_resolution) {
            Some(buffer) => {
                trace!(
                    src_width = frame.width,
                    src_height = frame.height,
                    size = self.target_resolution,
                    "Frame sampled"
                );
                Capture::Captured(buffer)
            }
            None => Capture::SkippedNotReady,
        }
    }

    /// Arm the sample timer, replacing any pending one
    ///
    /// `on_fire` receives the timer's sequence number; hand it back to
    /// [`accept_tick`](Self::accept_tick) to find out whether the tick is
    /// still the pending one.
    pub fn schedule_next<F>(&mut self, delay: Duration, on_fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();

        self.next_seq += 1;
        let seq = self.next_seq;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(seq);
        });
        self.timer = Some(PendingTimer { seq, handle });
        seq
    }

    /// Consume a fired tick; false for ticks of cancelled or replaced timers
    pub fn accept_tick(&mut self, seq: u64) -> bool {
        match &self.timer {
            Some(pending) if pending.seq == seq => {
                self.timer = None;
                true
            }
            _ => false,
        }
    }

    pub fn has_pending_timer(&self) -> bool {
        self.timer.is_some()
    }

    /// Cancel the pending timer, if any
    pub fn cancel(&mut self) {
        if let Some(pending) = self.timer.take() {
            pending.handle.abort();
        }
    }
}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.cancel();
    }
}
