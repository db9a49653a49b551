// SPDX-License-Identifier: GPL-3.0-only

//! Stream lifecycle
//!
//! Opens a video-only stream, keeps its single playable track, waits for the
//! render surface to exist and attaches the stream to it.

use super::state::RunToken;
use crate::backends::camera::{
    Facing, FrameReceiver, MediaDevices, MediaStream, MediaTrack, TrackInfo, VideoConstraints,
};
use crate::constants::surface::{MAX_POLL_ATTEMPTS, POLL_INTERVAL};
use crate::errors::AcquisitionError;
use crate::surface::{RenderSurface, SurfaceHost};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

/// Data item emitted once the stream is attached to the surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReady {
    /// Whether the camera faces the user (preview should be mirrored)
    pub is_front_facing: bool,
    pub track: TrackInfo,
}

/// The one live track of a pipeline run
///
/// Dropping the stream stops the track.
pub struct ActiveStream {
    track: Arc<dyn MediaTrack>,
    frames: FrameReceiver,
    info: TrackInfo,
    stopped: AtomicBool,
}

impl ActiveStream {
    /// Keep the first live track, stop any other
    pub fn from_media_stream(stream: MediaStream) -> Result<Self, AcquisitionError> {
        let (tracks, frames) = stream.into_parts();
        let mut playable = None;

        for track in tracks {
            if playable.is_none() && track.is_live() {
                playable = Some(track);
            } else {
                debug!(label = %track.info().label, "Stopping extra track");
                track.stop();
            }
        }

        let track = playable
            .ok_or_else(|| AcquisitionError::Backend("stream has no playable track".to_string()))?;
        let info = track.info();

        Ok(Self {
            track,
            frames,
            info,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    /// A receiver for the stream's frames
    pub fn frames(&self) -> FrameReceiver {
        self.frames.clone()
    }

    pub fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.track.is_live()
    }

    /// Stop the track; later calls do nothing
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!(label = %self.info.label, device = ?self.info.device_id, "Stopping stream");
            self.track.stop();
        }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ActiveStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveStream")
            .field("info", &self.info)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Outcome of waiting for the render surface
pub enum SurfaceWait {
    Ready(Arc<dyn RenderSurface>),
    /// The run ended while waiting
    Superseded,
    /// The surface never showed up
    Unavailable,
}

/// Opens streams and binds them to render surfaces
#[derive(Clone)]
pub struct StreamLifecycleManager {
    devices: Arc<dyn MediaDevices>,
    host: SurfaceHost,
}

impl StreamLifecycleManager {
    pub fn new(devices: Arc<dyn MediaDevices>, host: SurfaceHost) -> Self {
        Self { devices, host }
    }

    /// Request a video-only stream
    ///
    /// The returned future does not borrow the manager, so it can run in a
    /// spawned task.
    pub fn open(
        &self,
        constraints: VideoConstraints,
    ) -> impl Future<Output = Result<ActiveStream, AcquisitionError>> + Send + 'static {
        let acquire = self.devices.get_user_media(constraints);
        async move {
            let stream = acquire.await?;
            ActiveStream::from_media_stream(stream)
        }
    }

    /// Wait until the surface exists
    ///
    /// Wakes on the host's availability notification and otherwise re-checks
    /// at a fixed interval, up to a bounded number of attempts. Gives up as
    /// soon as `run` is no longer current.
    pub async fn wait_for_surface(&self, run: &RunToken) -> SurfaceWait {
        let mut notifications = self.host.subscribe();
        let mut attempts = 0;

        loop {
            if !run.is_current() {
                trace!(run = run.id(), "Run superseded while waiting for surface");
                return SurfaceWait::Superseded;
            }
            let available = notifications.borrow_and_update().clone();
            if let Some(surface) = available {
                return SurfaceWait::Ready(surface);
            }
            if attempts >= MAX_POLL_ATTEMPTS {
                warn!(run = run.id(), attempts, "Render surface never became available");
                return SurfaceWait::Unavailable;
            }
            attempts += 1;

            tokio::select! {
                changed = notifications.changed() => {
                    if changed.is_err() {
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
                _ = tokio::time::sleep(POLL_INTERVAL) => {
                    trace!(run = run.id(), attempts, "Surface not available yet");
                }
            }
        }
    }

    /// Bind the stream to the surface
    pub fn attach(
        &self,
        stream: &ActiveStream,
        surface: &dyn RenderSurface,
        desired_facing: Facing,
    ) -> StreamReady {
        surface.attach_source(Some(stream.frames()));
        let facing = stream.info().facing.unwrap_or(desired_facing);
        debug!(label = %stream.info().label, %facing, "Stream attached to surface");

        StreamReady {
            is_front_facing: facing == Facing::Front,
            track: stream.info().clone(),
        }
    }

    /// Detach whatever the surface is presenting
    pub fn detach(&self) {
        if let Some(surface) = self.host.current() {
            surface.attach_source(None);
        }
    }
}
