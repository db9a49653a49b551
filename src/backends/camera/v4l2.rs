// SPDX-License-Identifier: GPL-3.0-only

//! V4L2 media runtime
//!
//! Enumerates `/dev/video*` capture nodes and streams frames from one of them
//! on a dedicated capture thread. V4L2 has no notion of facing direction, so
//! the runtime does not advertise `FacingMode`; the negotiator picks a device
//! by label instead.

use super::format_converters::{mjpeg_to_rgba, yuyv_to_rgba};
use super::frame_loop::{CaptureLoopController, StopSignal};
use super::types::*;
use super::{MediaDevices, MediaStream, MediaTrack};
use crate::constants::{CAPTURE_RETRY_DELAY, frame_rate, v4l2 as v4l2_consts};
use crate::errors::AcquisitionError;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, trace, warn};
use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// Media runtime backed by the kernel's V4L2 devices
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2MediaDevices;

impl V4l2MediaDevices {
    pub fn new() -> Self {
        Self
    }
}

impl MediaDevices for V4l2MediaDevices {
    fn supported_constraints(&self) -> CapabilitySet {
        [
            ConstraintName::FrameRate,
            ConstraintName::DeviceId,
            ConstraintName::Width,
            ConstraintName::Height,
        ]
        .into_iter()
        .collect()
    }

    fn enumerate_devices(&self) -> BoxFuture<'static, Result<Vec<CameraDevice>, AcquisitionError>> {
        Box::pin(async {
            tokio::task::spawn_blocking(enumerate_v4l2_cameras)
                .await
                .map_err(|e| AcquisitionError::Backend(format!("Enumeration task failed: {}", e)))
        })
    }

    fn get_user_media(
        &self,
        constraints: VideoConstraints,
    ) -> BoxFuture<'static, Result<MediaStream, AcquisitionError>> {
        Box::pin(open_stream(constraints))
    }
}

/// List V4L2 nodes, marking those that can capture video
pub fn enumerate_v4l2_cameras() -> Vec<CameraDevice> {
    let mut devices = Vec::new();

    for node in v4l::context::enum_devices() {
        let path = node.path().to_string_lossy().to_string();
        let dev = match Device::with_path(&path) {
            Ok(dev) => dev,
            Err(e) => {
                debug!(path = %path, error = %e, "Skipping V4L2 node that cannot be opened");
                continue;
            }
        };
        let Ok(caps) = dev.query_caps() else {
            continue;
        };

        // Metadata nodes of UVC cameras report capture caps but no formats
        let has_formats = dev.enum_formats().map(|f| !f.is_empty()).unwrap_or(false);
        let kind = if caps.capabilities.contains(Flags::VIDEO_CAPTURE) && has_formats {
            DeviceKind::VideoInput
        } else {
            DeviceKind::Other
        };

        let label = if caps.card.is_empty() {
            node.name().unwrap_or_else(|| path.clone())
        } else {
            caps.card.clone()
        };

        debug!(path = %path, label = %label, ?kind, driver = %caps.driver, "Found V4L2 node");
        devices.push(CameraDevice {
            device_id: path,
            label,
            kind,
            driver: Some(caps.driver),
        });
    }

    devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
    devices
}

/// Open a device and start its capture thread
async fn open_stream(constraints: VideoConstraints) -> Result<MediaStream, AcquisitionError> {
    let path = match constraints.device_id.clone() {
        Some(path) => path,
        None => {
            let devices = tokio::task::spawn_blocking(enumerate_v4l2_cameras)
                .await
                .map_err(|e| AcquisitionError::Backend(e.to_string()))?;
            devices
                .into_iter()
                .find(CameraDevice::is_video_input)
                .map(|d| d.device_id)
                .ok_or_else(|| {
                    AcquisitionError::DeviceNotFound("no V4L2 capture device".to_string())
                })?
        }
    };

    let request = CaptureRequest {
        width: constraints.width.unwrap_or(v4l2_consts::DEFAULT_WIDTH),
        height: constraints.height.unwrap_or(v4l2_consts::DEFAULT_HEIGHT),
        fps: constraints
            .frame_rate
            .map(|r| r.ideal)
            .unwrap_or(frame_rate::IDEAL),
    };

    info!(path = %path, width = request.width, height = request.height, fps = request.fps, "Opening V4L2 stream");

    let (frame_tx, frame_rx) = watch::channel(None);
    let (ready_tx, ready_rx) = oneshot::channel();
    let thread_path = path.clone();

    let capture = CaptureLoopController::start("v4l2-capture", move |stop| {
        capture_loop(&thread_path, request, frame_tx, ready_tx, stop);
    })
    .map_err(|e| AcquisitionError::from_io("Failed to spawn capture thread", &e))?;

    let info = match ready_rx.await {
        Ok(Ok(info)) => info,
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            return Err(AcquisitionError::Backend(format!(
                "Capture thread for {} exited during setup",
                path
            )));
        }
    };

    let track: Arc<dyn MediaTrack> = Arc::new(V4l2Track {
        info,
        capture: Mutex::new(Some(capture)),
        live: AtomicBool::new(true),
    });

    Ok(MediaStream::new(vec![track], frame_rx))
}

#[derive(Debug, Clone, Copy)]
struct CaptureRequest {
    width: u32,
    height: u32,
    fps: u32,
}

/// Decoder for the negotiated wire format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireFormat {
    Yuyv,
    Mjpeg,
}

fn pick_wire_format(dev: &Device) -> Result<(FourCC, WireFormat), AcquisitionError> {
    let available = dev
        .enum_formats()
        .map_err(|e| AcquisitionError::from_io("Failed to enumerate formats", &e))?;

    for wanted in v4l2_consts::PREFERRED_FOURCCS {
        let fourcc = FourCC::new(wanted);
        if available.iter().any(|f| f.fourcc == fourcc) {
            let wire = if wanted == b"YUYV" {
                WireFormat::Yuyv
            } else {
                WireFormat::Mjpeg
            };
            return Ok((fourcc, wire));
        }
    }

    Err(AcquisitionError::ConstraintMismatch(
        "device offers neither YUYV nor MJPG".to_string(),
    ))
}

/// Capture thread body: set up the device, report, then publish frames
fn capture_loop(
    path: &str,
    request: CaptureRequest,
    frame_tx: FrameSender,
    ready_tx: oneshot::Sender<Result<TrackInfo, AcquisitionError>>,
    stop: StopSignal,
) {
    static FRAME_COUNTER: AtomicU64 = AtomicU64::new(0);

    let dev = match Device::with_path(path) {
        Ok(dev) => dev,
        Err(e) => {
            let _ = ready_tx.send(Err(AcquisitionError::from_io(path, &e)));
            return;
        }
    };

    let (fourcc, wire) = match pick_wire_format(&dev) {
        Ok(picked) => picked,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    let format = match dev.set_format(&Format::new(request.width, request.height, fourcc)) {
        Ok(format) if format.fourcc == fourcc => format,
        Ok(format) => {
            let _ = ready_tx.send(Err(AcquisitionError::ConstraintMismatch(format!(
                "driver switched pixel format to {:?}",
                format.fourcc
            ))));
            return;
        }
        Err(e) => {
            let _ = ready_tx.send(Err(AcquisitionError::from_io("Failed to set format", &e)));
            return;
        }
    };

    let interval = dev.params().and_then(|mut params| {
        params.interval.numerator = 1;
        params.interval.denominator = request.fps;
        dev.set_params(&params)
    });
    if let Err(e) = interval {
        warn!(path, fps = request.fps, error = %e, "Could not set frame interval, using driver default");
    }

    let mut stream = match Stream::with_buffers(&dev, Type::VideoCapture, v4l2_consts::BUFFER_COUNT) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(AcquisitionError::from_io("Failed to start streaming", &e)));
            return;
        }
    };

    // Bounded dequeue so a stalled device cannot hide the stop flag
    stream.set_timeout(v4l2_consts::DEQUEUE_TIMEOUT);

    let label = dev
        .query_caps()
        .map(|caps| caps.card)
        .unwrap_or_else(|_| path.to_string());

    info!(
        path,
        width = format.width,
        height = format.height,
        fourcc = ?format.fourcc,
        "V4L2 stream started"
    );

    let info = TrackInfo {
        label,
        device_id: Some(path.to_string()),
        facing: None,
        width: format.width,
        height: format.height,
        frame_rate: Some(request.fps),
    };
    if ready_tx.send(Ok(info)).is_err() {
        debug!(path, "Stream request abandoned before the device was ready");
        return;
    }

    while !stop.is_stopped() {
        let (buf, meta) = match stream.next() {
            Ok(frame) => frame,
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                trace!(path, "No frame within dequeue timeout");
                continue;
            }
            Err(e) => {
                warn!(path, error = %e, "Failed to dequeue frame");
                std::thread::sleep(CAPTURE_RETRY_DELAY);
                continue;
            }
        };

        let used = (meta.bytesused as usize).min(buf.len());
        let payload = if used > 0 { &buf[..used] } else { buf };
        let captured_at = Instant::now();

        let frame = match wire {
            WireFormat::Yuyv => Some(CameraFrame {
                captured_at,
                ..CameraFrame::from_rgba(
                    format.width,
                    format.height,
                    yuyv_to_rgba(payload, format.width, format.height),
                )
            }),
            WireFormat::Mjpeg => match mjpeg_to_rgba(payload) {
                Ok((width, height, rgba)) => Some(CameraFrame {
                    captured_at,
                    ..CameraFrame::from_rgba(width, height, rgba)
                }),
                Err(e) => {
                    debug!(path, error = %e, "Dropping undecodable MJPEG frame");
                    None
                }
            },
        };

        if let Some(frame) = frame {
            let count = FRAME_COUNTER.fetch_add(1, Ordering::Relaxed);
            if count % 60 == 0 {
                debug!(path, frame = count, sequence = meta.sequence, "Frame captured");
            }
            frame_tx.send_replace(Some(Arc::new(frame)));
        }
    }

    info!(path, "V4L2 capture loop ended");
}

/// The single video track of a V4L2 stream
struct V4l2Track {
    info: TrackInfo,
    capture: Mutex<Option<CaptureLoopController>>,
    live: AtomicBool,
}

impl MediaTrack for V4l2Track {
    fn info(&self) -> TrackInfo {
        self.info.clone()
    }

    fn stop(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        let capture = match self.capture.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(capture) = capture {
            info!(device = ?self.info.device_id, "Stopping V4L2 track");
            capture.stop_detached();
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for V4l2Track {
    fn drop(&mut self) {
        self.stop();
    }
}
