// SPDX-License-Identifier: GPL-3.0-only

//! In-memory media runtime
//!
//! Serves one fixed frame (a still image, or a gray test card) through the
//! regular `MediaDevices` interface. The capability set, the device list and
//! the acquisition behaviour are configurable, which makes the runtime useful
//! for running the scanner against a file and for exercising the pipeline
//! without hardware.

use super::types::*;
use super::{MediaDevices, MediaStream, MediaTrack};
use crate::errors::AcquisitionError;
use futures::future::BoxFuture;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Builder-style configuration of a virtual runtime
#[derive(Debug, Clone)]
struct VirtualSetup {
    capabilities: CapabilitySet,
    fallback_runtime: bool,
    devices: Vec<CameraDevice>,
    frame: Arc<CameraFrame>,
    acquire_delay: Duration,
    warmup: Duration,
    failure: Option<AcquisitionError>,
}

#[derive(Debug, Default)]
struct Counters {
    live_tracks: AtomicUsize,
    opened: AtomicUsize,
    requests: Mutex<Vec<VideoConstraints>>,
}

/// Media runtime that streams a fixed frame
#[derive(Debug, Clone)]
pub struct VirtualMediaDevices {
    setup: Arc<VirtualSetup>,
    counters: Arc<Counters>,
}

impl Default for VirtualMediaDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMediaDevices {
    /// A runtime with facing and frame rate support serving a 640x480 gray card
    pub fn new() -> Self {
        let gray = vec![128u8; 640 * 480 * 4];
        Self {
            setup: Arc::new(VirtualSetup {
                capabilities: [ConstraintName::FacingMode, ConstraintName::FrameRate]
                    .into_iter()
                    .collect(),
                fallback_runtime: false,
                devices: vec![CameraDevice::video_input("virtual:0", "Virtual Camera")],
                frame: Arc::new(CameraFrame::from_rgba(640, 480, gray)),
                acquire_delay: Duration::ZERO,
                warmup: Duration::ZERO,
                failure: None,
            }),
            counters: Arc::new(Counters::default()),
        }
    }

    /// A runtime streaming the given image file
    pub fn from_image(path: &Path) -> Result<Self, AcquisitionError> {
        let frame = crate::still_image::load_frame(path)
            .map_err(|e| AcquisitionError::Backend(e.to_string()))?;
        info!(path = %path.display(), width = frame.width, height = frame.height, "Virtual camera serving image");
        Ok(Self::new().with_frame(frame))
    }

    fn update(mut self, f: impl FnOnce(&mut VirtualSetup)) -> Self {
        f(Arc::make_mut(&mut self.setup));
        self
    }

    pub fn with_capabilities(self, capabilities: CapabilitySet) -> Self {
        self.update(|s| s.capabilities = capabilities)
    }

    pub fn with_fallback_runtime(self, fallback: bool) -> Self {
        self.update(|s| s.fallback_runtime = fallback)
    }

    pub fn with_devices(self, devices: Vec<CameraDevice>) -> Self {
        self.update(|s| s.devices = devices)
    }

    pub fn with_frame(self, frame: CameraFrame) -> Self {
        self.update(|s| s.frame = Arc::new(frame))
    }

    /// Delay before `get_user_media` resolves
    pub fn with_acquire_delay(self, delay: Duration) -> Self {
        self.update(|s| s.acquire_delay = delay)
    }

    /// Delay between stream start and the first frame
    pub fn with_warmup(self, warmup: Duration) -> Self {
        self.update(|s| s.warmup = warmup)
    }

    /// Make every acquisition fail with `failure`
    pub fn with_failure(self, failure: AcquisitionError) -> Self {
        self.update(|s| s.failure = Some(failure))
    }

    /// Tracks opened and not stopped yet
    pub fn live_tracks(&self) -> usize {
        self.counters.live_tracks.load(Ordering::SeqCst)
    }

    /// Streams handed out so far
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Constraints of every `get_user_media` call, oldest first
    pub fn requests(&self) -> Vec<VideoConstraints> {
        self.counters
            .requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl MediaDevices for VirtualMediaDevices {
    fn supported_constraints(&self) -> CapabilitySet {
        self.setup.capabilities.clone()
    }

    fn is_fallback_runtime(&self) -> bool {
        self.setup.fallback_runtime
    }

    fn enumerate_devices(&self) -> BoxFuture<'static, Result<Vec<CameraDevice>, AcquisitionError>> {
        let devices = self.setup.devices.clone();
        Box::pin(async move { Ok(devices) })
    }

    fn get_user_media(
        &self,
        constraints: VideoConstraints,
    ) -> BoxFuture<'static, Result<MediaStream, AcquisitionError>> {
        let setup = Arc::clone(&self.setup);
        let counters = Arc::clone(&self.counters);

        Box::pin(async move {
            if let Ok(mut requests) = counters.requests.lock() {
                requests.push(constraints.clone());
            }
            if !setup.acquire_delay.is_zero() {
                tokio::time::sleep(setup.acquire_delay).await;
            }
            if let Some(failure) = &setup.failure {
                return Err(failure.clone());
            }

            let device = match &constraints.device_id {
                Some(id) => setup
                    .devices
                    .iter()
                    .find(|d| &d.device_id == id)
                    .cloned()
                    .ok_or_else(|| AcquisitionError::DeviceNotFound(id.clone()))?,
                None => setup
                    .devices
                    .iter()
                    .find(|d| d.is_video_input())
                    .cloned()
                    .unwrap_or_else(|| CameraDevice::video_input("virtual:0", "Virtual Camera")),
            };

            let facing = constraints.facing_mode.map(|c| c.ideal).or_else(|| {
                [Facing::Front, Facing::Back]
                    .into_iter()
                    .find(|f| f.matches_label(&device.label))
            });

            let info = TrackInfo {
                label: device.label.clone(),
                device_id: Some(device.device_id.clone()),
                facing,
                width: setup.frame.width,
                height: setup.frame.height,
                frame_rate: constraints.frame_rate.map(|r| r.ideal),
            };

            let (frame_tx, frame_rx) = watch::channel(None);
            let track = Arc::new(VirtualTrack {
                info,
                frames: frame_tx,
                live: AtomicBool::new(true),
                counters: Arc::clone(&counters),
            });
            counters.live_tracks.fetch_add(1, Ordering::SeqCst);
            counters.opened.fetch_add(1, Ordering::SeqCst);

            if setup.warmup.is_zero() {
                track.publish(Arc::clone(&setup.frame));
            } else {
                let track = Arc::clone(&track);
                let frame = Arc::clone(&setup.frame);
                let warmup = setup.warmup;
                tokio::spawn(async move {
                    tokio::time::sleep(warmup).await;
                    track.publish(frame);
                });
            }

            debug!(device = %device.device_id, "Virtual stream opened");
            let track: Arc<dyn MediaTrack> = track;
            Ok(MediaStream::new(vec![track], frame_rx))
        })
    }
}

struct VirtualTrack {
    info: TrackInfo,
    frames: FrameSender,
    live: AtomicBool,
    counters: Arc<Counters>,
}

impl VirtualTrack {
    fn publish(&self, frame: Arc<CameraFrame>) {
        if self.is_live() {
            self.frames.send_replace(Some(frame));
        }
    }
}

impl MediaTrack for VirtualTrack {
    fn info(&self) -> TrackInfo {
        self.info.clone()
    }

    fn stop(&self) {
        if self.live.swap(false, Ordering::SeqCst) {
            self.frames.send_replace(None);
            self.counters.live_tracks.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_serves_frame_until_stopped() {
        let devices = VirtualMediaDevices::new();
        let stream = devices
            .get_user_media(VideoConstraints::default())
            .await
            .unwrap();
        assert_eq!(devices.live_tracks(), 1);

        let frames = stream.frames();
        assert!(frames.borrow().is_some());

        let track = Arc::clone(&stream.tracks()[0]);
        track.stop();
        track.stop();
        assert_eq!(devices.live_tracks(), 0);
        assert!(frames.borrow().is_none());
    }

    #[tokio::test]
    async fn test_unknown_device_is_not_found() {
        let devices = VirtualMediaDevices::new();
        let result = devices
            .get_user_media(VideoConstraints::for_device("virtual:9"))
            .await;
        assert!(matches!(result, Err(AcquisitionError::DeviceNotFound(_))));
        assert_eq!(devices.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_facing_is_guessed_from_label() {
        let devices = VirtualMediaDevices::new()
            .with_devices(vec![CameraDevice::video_input("cam-1", "Front Camera")]);
        let stream = devices
            .get_user_media(VideoConstraints::for_device("cam-1"))
            .await
            .unwrap();
        assert_eq!(stream.tracks()[0].info().facing, Some(Facing::Front));
    }
}
