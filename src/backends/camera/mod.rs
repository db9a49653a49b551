// SPDX-License-Identifier: GPL-3.0-only

//! Media runtime abstraction
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │ PipelineController  │
//! └──────────┬──────────┘
//!            │ supported_constraints / enumerate_devices / get_user_media
//!            ▼
//! ┌─────────────────────┐
//! │  MediaDevices Trait │  ← Common interface
//! └──────────┬──────────┘
//!            │
//!      ┌─────┴──────┐
//!      ▼            ▼
//!  ┌───────┐   ┌─────────┐
//!  │ V4L2  │   │ Virtual │
//!  └───────┘   └─────────┘
//! ```
//!
//! A runtime hands out a [`MediaStream`]: one track plus the receiving end of
//! its latest-frame slot. The stream is attached to a render surface by the
//! pipeline; nothing but the surface reads its frames.

pub mod format_converters;
pub mod frame_loop;
pub mod types;
pub mod v4l2;
pub mod virtual_camera;

pub use types::*;
pub use v4l2::V4l2MediaDevices;
pub use virtual_camera::VirtualMediaDevices;

use crate::errors::AcquisitionError;
use futures::future::BoxFuture;
use std::sync::Arc;

/// A media runtime able to list devices and open video streams
///
/// Async operations return boxed `'static` futures so the pipeline can move
/// them into spawned tasks; they must not borrow `self`.
pub trait MediaDevices: Send + Sync {
    /// Constraints this runtime understands
    fn supported_constraints(&self) -> CapabilitySet;

    /// Runtimes that silently ignore facing and device-id constraints
    ///
    /// For those, probing devices is pointless and the capability based
    /// constraints are passed through as-is.
    fn is_fallback_runtime(&self) -> bool {
        false
    }

    /// List the devices known to the runtime
    fn enumerate_devices(&self) -> BoxFuture<'static, Result<Vec<CameraDevice>, AcquisitionError>>;

    /// Open a video-only stream matching the constraints
    fn get_user_media(
        &self,
        constraints: VideoConstraints,
    ) -> BoxFuture<'static, Result<MediaStream, AcquisitionError>>;
}

/// A live media track
pub trait MediaTrack: Send + Sync {
    /// Track metadata (label, device, facing, size)
    fn info(&self) -> TrackInfo;

    /// Stop producing frames and release the device
    ///
    /// Implementations must tolerate repeated calls.
    fn stop(&self);

    /// Whether the track still produces frames
    fn is_live(&self) -> bool;
}

/// A stream as returned by `get_user_media`
pub struct MediaStream {
    tracks: Vec<Arc<dyn MediaTrack>>,
    frames: FrameReceiver,
}

impl MediaStream {
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>, frames: FrameReceiver) -> Self {
        Self { tracks, frames }
    }

    /// All tracks of the stream
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// A new receiver for the stream's frames
    pub fn frames(&self) -> FrameReceiver {
        self.frames.clone()
    }

    /// Split into tracks and frame receiver
    pub fn into_parts(self) -> (Vec<Arc<dyn MediaTrack>>, FrameReceiver) {
        (self.tracks, self.frames)
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("tracks", &self.tracks.len())
            .finish()
    }
}
