// SPDX-License-Identifier: GPL-3.0-only

//! Render surfaces
//!
//! A render surface is the presentation target a stream is attached to. The
//! pipeline only writes the stream's frame source into it and reads back its
//! ready state and current frame. Who creates the surface, and when, is up to
//! the embedding application; it announces availability through a
//! [`SurfaceHost`].

mod preview;

pub use preview::PreviewSurface;

use crate::backends::camera::{CameraFrame, FrameReceiver};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;

/// How much data the surface has buffered, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    /// No source attached
    HaveNothing,
    /// Source attached, no frame yet
    HaveMetadata,
    /// A frame is available but playback cannot continue
    HaveCurrentData,
    /// A frame is available and more are expected
    HaveFutureData,
    /// Enough data to sample
    HaveEnoughData,
}

/// Presentation target for a media stream
pub trait RenderSurface: Send + Sync {
    /// Attach a stream's frames (or detach with `None`)
    fn attach_source(&self, frames: Option<FrameReceiver>);

    fn ready_state(&self) -> ReadyState;

    /// The frame currently presented
    fn current_frame(&self) -> Option<Arc<CameraFrame>>;

    /// Resolves once playback of the attached source has started
    ///
    /// May resolve more than once over the surface's life (once per future);
    /// the pipeline only acts on the first resolution of a run.
    fn playback_started(&self) -> BoxFuture<'static, ()>;
}

/// Slot through which the embedder publishes its render surface
///
/// Cloning shares the slot.
#[derive(Clone)]
pub struct SurfaceHost {
    slot: Arc<watch::Sender<Option<Arc<dyn RenderSurface>>>>,
}

impl Default for SurfaceHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceHost {
    /// A host whose surface does not exist yet
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// A host with its surface already in place
    pub fn with_surface(surface: Arc<dyn RenderSurface>) -> Self {
        let host = Self::new();
        host.provide(surface);
        host
    }

    /// Announce that the surface exists
    pub fn provide(&self, surface: Arc<dyn RenderSurface>) {
        self.slot.send_replace(Some(surface));
    }

    /// Announce that the surface is gone
    pub fn withdraw(&self) {
        self.slot.send_replace(None);
    }

    pub fn current(&self) -> Option<Arc<dyn RenderSurface>> {
        self.slot.borrow().clone()
    }

    /// Availability notifications
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<dyn RenderSurface>>> {
        self.slot.subscribe()
    }
}

impl std::fmt::Debug for SurfaceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceHost")
            .field("available", &self.slot.borrow().is_some())
            .finish()
    }
}
