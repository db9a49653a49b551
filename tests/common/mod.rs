// SPDX-License-Identifier: MPL-2.0

//! Helpers shared by the pipeline integration tests

#![allow(dead_code)]

use qr_reader::backends::camera::CameraFrame;
use qr_reader::pipeline::{
    DecodeResponse, Decoder, DecoderFactory, PipelineEvent, PixelBuffer, decoder_factory,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;

/// Decoder answering every request with the same response
#[derive(Clone, Default)]
pub struct ScriptedDecoder {
    pub calls: Arc<AtomicUsize>,
    pub sizes: Arc<Mutex<Vec<(u32, u32)>>>,
    pub reply: DecodeResponse,
}

impl ScriptedDecoder {
    pub fn replying(data: Option<&str>) -> Self {
        Self {
            reply: DecodeResponse {
                data: data.map(str::to_string),
                chunks: Vec::new(),
            },
            ..Default::default()
        }
    }

    pub fn factory(&self) -> DecoderFactory {
        let decoder = self.clone();
        decoder_factory(move || Ok(Box::new(decoder.clone())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sizes(&self) -> Vec<(u32, u32)> {
        self.sizes.lock().unwrap().clone()
    }
}

impl Decoder for ScriptedDecoder {
    fn decode(&mut self, buffer: &PixelBuffer) -> DecodeResponse {
        self.sizes.lock().unwrap().push((buffer.width, buffer.height));
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply.clone()
    }
}

/// Solid gray RGBA frame
pub fn gray_frame(width: u32, height: u32) -> CameraFrame {
    CameraFrame::from_rgba(width, height, vec![128; (width * height * 4) as usize])
}

pub async fn next_event(events: &mut UnboundedReceiver<PipelineEvent>) -> PipelineEvent {
    events.recv().await.expect("pipeline closed its listener")
}

/// Skip events until a scan result arrives
pub async fn next_scan_result(
    events: &mut UnboundedReceiver<PipelineEvent>,
) -> (Option<String>, usize) {
    loop {
        match next_event(events).await {
            PipelineEvent::ScanResult { data, chunks } => return (data, chunks.len()),
            PipelineEvent::Error(e) => panic!("unexpected pipeline error: {}", e),
            PipelineEvent::StreamReady(_) => {}
        }
    }
}
