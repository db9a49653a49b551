// SPDX-License-Identifier: GPL-3.0-only

//! Headless render surface presenting the latest frame of its source

use super::{ReadyState, RenderSurface};
use crate::backends::camera::{CameraFrame, FrameReceiver};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;

/// Surface that keeps a handle on the attached source and presents its
/// latest frame
pub struct PreviewSurface {
    source: watch::Sender<Option<FrameReceiver>>,
}

impl Default for PreviewSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewSurface {
    pub fn new() -> Self {
        let (source, _) = watch::channel(None);
        Self { source }
    }

    pub fn has_source(&self) -> bool {
        self.source.borrow().is_some()
    }
}

enum Wake {
    Playing,
    SourceChanged,
    Ended,
}

impl RenderSurface for PreviewSurface {
    fn attach_source(&self, frames: Option<FrameReceiver>) {
        self.source.send_replace(frames);
    }

    fn ready_state(&self) -> ReadyState {
        match self.source.borrow().as_ref() {
            None => ReadyState::HaveNothing,
            Some(frames) if frames.borrow().is_some() => ReadyState::HaveEnoughData,
            Some(_) => ReadyState::HaveMetadata,
        }
    }

    fn current_frame(&self) -> Option<Arc<CameraFrame>> {
        self.source
            .borrow()
            .as_ref()
            .and_then(|frames| frames.borrow().clone())
    }

    fn playback_started(&self) -> BoxFuture<'static, ()> {
        let mut sources = self.source.subscribe();
        Box::pin(async move {
            loop {
                let current = sources.borrow_and_update().clone();
                let wake = match current {
                    Some(mut frames) => tokio::select! {
                        ok = async move { frames.wait_for(|f| f.is_some()).await.is_ok() } => {
                            if ok { Wake::Playing } else { Wake::Ended }
                        }
                        changed = sources.changed() => {
                            if changed.is_ok() { Wake::SourceChanged } else { Wake::Ended }
                        }
                    },
                    None => match sources.changed().await {
                        Ok(()) => Wake::SourceChanged,
                        Err(_) => Wake::Ended,
                    },
                };

                match wake {
                    Wake::Playing => return,
                    Wake::SourceChanged => continue,
                    // Source finished or surface dropped: wait for a new source
                    Wake::Ended => {
                        if sources.changed().await.is_err() {
                            futures::future::pending::<()>().await;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ready_state_follows_source() {
        let surface = PreviewSurface::new();
        assert_eq!(surface.ready_state(), ReadyState::HaveNothing);

        let (tx, rx) = watch::channel(None);
        surface.attach_source(Some(rx));
        assert_eq!(surface.ready_state(), ReadyState::HaveMetadata);
        assert!(surface.current_frame().is_none());

        tx.send_replace(Some(Arc::new(CameraFrame::from_rgba(2, 2, vec![0; 16]))));
        assert_eq!(surface.ready_state(), ReadyState::HaveEnoughData);
        assert_eq!(surface.current_frame().map(|f| f.width), Some(2));

        surface.attach_source(None);
        assert_eq!(surface.ready_state(), ReadyState::HaveNothing);
    }

    #[tokio::test]
    async fn test_playback_started_waits_for_first_frame() {
        let surface = PreviewSurface::new();
        let started = surface.playback_started();

        let (tx, rx) = watch::channel(None);
        surface.attach_source(Some(rx));

        let handle = tokio::spawn(started);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        tx.send_replace(Some(Arc::new(CameraFrame::from_rgba(1, 1, vec![0; 4]))));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("playback should start")
            .unwrap();
    }
}
