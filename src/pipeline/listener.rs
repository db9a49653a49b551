// SPDX-License-Identifier: GPL-3.0-only

//! Callbacks out of the pipeline

use super::decode::Chunk;
use super::stream::StreamReady;
use crate::errors::ScanError;
use tokio::sync::mpsc;

/// Receives everything a pipeline run reports
///
/// Callbacks run on the controller task; keep them short.
pub trait ScanListener: Send + Sync {
    /// A decode round trip completed; `data` is `None` when nothing was found
    fn on_scan_result(&self, data: Option<String>, chunks: Vec<Chunk>);

    /// Playback started; fires once per run
    fn on_stream_ready(&self, _ready: StreamReady) {}

    /// The run ended with an error
    fn on_error(&self, error: ScanError);
}

/// Everything a [`ChannelListener`] forwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    ScanResult {
        data: Option<String>,
        chunks: Vec<Chunk>,
    },
    StreamReady(StreamReady),
    Error(ScanError),
}

/// Listener forwarding callbacks into a channel
#[derive(Debug, Clone)]
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: PipelineEvent) {
        // A dropped receiver means nobody is listening anymore
        let _ = self.tx.send(event);
    }
}

impl ScanListener for ChannelListener {
    fn on_scan_result(&self, data: Option<String>, chunks: Vec<Chunk>) {
        self.forward(PipelineEvent::ScanResult { data, chunks });
    }

    fn on_stream_ready(&self, ready: StreamReady) {
        self.forward(PipelineEvent::StreamReady(ready));
    }

    fn on_error(&self, error: ScanError) {
        self.forward(PipelineEvent::Error(error));
    }
}
