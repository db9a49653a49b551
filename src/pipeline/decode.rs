// SPDX-License-Identifier: GPL-3.0-only

//! Decode worker channel
//!
//! The decode worker is a dedicated OS thread that owns a [`Decoder`]. The
//! pipeline talks to it through a request channel only; replies come back
//! through the result handler registered for the current run. The thread is
//! created once when the pipeline starts and joined when it shuts down.
//!
//! The channel does no queuing of its own: the controller never sends a
//! request while another one is outstanding.

use super::sampler::PixelBuffer;
use crate::constants::DECODE_WORKER_THREAD;
use crate::errors::{ScanError, ScanResult};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

/// Pixel coordinate inside the decoded buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// One located code
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Corners, clockwise from the top-left finder pattern
    pub corners: [Point; 4],
    /// Symbol version (1-40)
    pub version: usize,
    /// Error correction level as encoded in the symbol
    pub ecc_level: u16,
    /// Decoded text, if the symbol could be read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// Normalized worker reply
///
/// `data: None` means nothing was recognized in the frame, which is a normal
/// outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DecodeResponse {
    pub data: Option<String>,
    pub chunks: Vec<Chunk>,
}

impl DecodeResponse {
    /// Nothing recognized
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Image decoding algorithm run by the worker
pub trait Decoder: Send {
    fn decode(&mut self, buffer: &PixelBuffer) -> DecodeResponse;
}

/// Builds the worker's decoder on the worker thread
///
/// Called again when the pipeline restarts after the worker failed to come up.
pub type DecoderFactory = Arc<dyn Fn() -> Result<Box<dyn Decoder>, String> + Send + Sync>;

/// Wrap a decoder constructor into a [`DecoderFactory`]
pub fn decoder_factory<F>(build: F) -> DecoderFactory
where
    F: Fn() -> Result<Box<dyn Decoder>, String> + Send + Sync + 'static,
{
    Arc::new(build)
}

/// Identifies a request: the run that sent it and its position in the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    pub run: u64,
    pub seq: u64,
}

/// A worker reply together with the request it answers
#[derive(Debug, Clone)]
pub struct DecodeReply {
    pub ticket: Ticket,
    pub response: DecodeResponse,
}

type ResultHandler = Box<dyn Fn(DecodeReply) + Send>;

struct DecodeRequest {
    ticket: Ticket,
    buffer: PixelBuffer,
}

/// Long-lived channel to the decode worker
pub struct DecodeChannel {
    requests: Option<mpsc::Sender<DecodeRequest>>,
    handler: Arc<Mutex<Option<ResultHandler>>>,
    worker: Option<JoinHandle<()>>,
}

impl DecodeChannel {
    /// Start the worker thread and wait until its decoder is built
    pub async fn spawn(factory: DecoderFactory) -> ScanResult<Self> {
        let (request_tx, request_rx) = mpsc::channel::<DecodeRequest>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let handler: Arc<Mutex<Option<ResultHandler>>> = Arc::new(Mutex::new(None));
        let worker_handler = Arc::clone(&handler);

        let worker = std::thread::Builder::new()
            .name(DECODE_WORKER_THREAD.to_string())
            .spawn(move || {
                let decoder = match factory() {
                    Ok(decoder) => decoder,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                worker_loop(decoder, request_rx, worker_handler);
            })
            .map_err(|e| ScanError::WorkerUnavailable(format!("failed to spawn worker: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                info!(thread = DECODE_WORKER_THREAD, "Decode worker started");
                Ok(Self {
                    requests: Some(request_tx),
                    handler,
                    worker: Some(worker),
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(ScanError::WorkerUnavailable(e))
            }
            Err(_) => {
                let _ = worker.join();
                Err(ScanError::WorkerUnavailable(
                    "worker exited during construction".to_string(),
                ))
            }
        }
    }

    /// Hand a buffer to the worker; the reply arrives at the result handler
    pub fn send(&self, ticket: Ticket, buffer: PixelBuffer) -> ScanResult<()> {
        let requests = self
            .requests
            .as_ref()
            .ok_or_else(|| ScanError::WorkerUnavailable("channel is shut down".to_string()))?;

        trace!(run = ticket.run, seq = ticket.seq, width = buffer.width, "Sending frame to decoder");
        requests
            .send(DecodeRequest { ticket, buffer })
            .map_err(|_| ScanError::WorkerUnavailable("worker has exited".to_string()))
    }

    /// Register the handler receiving replies, replacing any previous one
    pub fn on_result<F>(&self, handler: F)
    where
        F: Fn(DecodeReply) + Send + 'static,
    {
        *lock(&self.handler) = Some(Box::new(handler));
    }

    /// Drop the result handler; later replies are discarded by the worker
    pub fn clear_result_handler(&self) {
        *lock(&self.handler) = None;
    }

    pub fn has_result_handler(&self) -> bool {
        lock(&self.handler).is_some()
    }

    /// Whether the worker thread is still running
    pub fn is_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Close the channel and join the worker thread
    pub async fn shutdown(mut self) {
        let worker = self.close();
        if let Some(worker) = worker {
            match tokio::task::spawn_blocking(move || worker.join()).await {
                Ok(Ok(())) => debug!("Decode worker joined"),
                Ok(Err(_)) => warn!("Decode worker panicked"),
                Err(e) => warn!(error = %e, "Failed to join decode worker"),
            }
        }
    }

    fn close(&mut self) -> Option<JoinHandle<()>> {
        self.clear_result_handler();
        self.requests = None;
        self.worker.take()
    }
}

impl Drop for DecodeChannel {
    fn drop(&mut self) {
        // Closing the request channel ends the worker; it is not joined here
        let _ = self.close();
    }
}

fn lock(handler: &Mutex<Option<ResultHandler>>) -> std::sync::MutexGuard<'_, Option<ResultHandler>> {
    match handler.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn worker_loop(
    mut decoder: Box<dyn Decoder>,
    requests: mpsc::Receiver<DecodeRequest>,
    handler: Arc<Mutex<Option<ResultHandler>>>,
) {
    while let Ok(DecodeRequest { ticket, buffer }) = requests.recv() {
        let start = Instant::now();

        // A decoder failure must not cross the channel: report "nothing found"
        let response = match catch_unwind(AssertUnwindSafe(|| decoder.decode(&buffer))) {
            Ok(response) => response,
            Err(_) => {
                error!(run = ticket.run, seq = ticket.seq, "Decoder panicked, reporting empty result");
                DecodeResponse::empty()
            }
        };

        trace!(
            run = ticket.run,
            seq = ticket.seq,
            found = response.data.is_some(),
            chunks = response.chunks.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "Frame decoded"
        );

        if let Some(handler) = lock(&handler).as_ref() {
            handler(DecodeReply { ticket, response });
        } else {
            trace!(run = ticket.run, "No result handler, dropping reply");
        }
    }
    debug!("Decode worker loop ended");
}
