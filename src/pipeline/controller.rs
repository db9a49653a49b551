// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline controller
//!
//! The controller is a single task that owns all state of the current run and
//! handles commands and events one at a time. Every step that may suspend
//! (negotiation, acquisition, waiting for the surface, waiting for playback,
//! timers, decoding) runs elsewhere and reports back with an event tagged with
//! the run it belongs to. Events of a run that has been torn down are
//! discarded, so a late continuation can never act on a newer run.
//!
//! ```text
//! Idle -> Negotiating -> Acquiring -> Streaming -> Sampling -> Stopped
//!                                                  |      ^
//!                                   AwaitSurface <-+------+-> AwaitDecode
//! ```

use super::decode::{DecodeChannel, DecodeReply, DecoderFactory, Ticket};
use super::listener::ScanListener;
use super::negotiator::{ConstraintNegotiator, Negotiation};
use super::sampler::{Capture, FrameSampler};
use super::state::{PipelineSnapshot, PipelineState, RunCounter, RunToken, SamplingPhase};
use super::stream::{ActiveStream, StreamLifecycleManager, StreamReady, SurfaceWait};
use crate::backends::camera::{MediaDevices, VideoConstraints};
use crate::config::{CaptureConfig, IntervalChange};
use crate::constants::surface::POLL_INTERVAL;
use crate::errors::{AcquisitionError, ScanError, ScanResult};
use crate::surface::{RenderSurface, SurfaceHost};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

enum Command {
    UpdateConfig(CaptureConfig),
    ScanNow,
    Shutdown(oneshot::Sender<()>),
}

enum Event {
    Negotiated {
        run: u64,
        result: ScanResult<VideoConstraints>,
    },
    Acquired {
        run: u64,
        result: Result<ActiveStream, AcquisitionError>,
    },
    Surface {
        run: u64,
        wait: SurfaceWait,
    },
    PlaybackStarted {
        run: u64,
    },
    Tick {
        run: u64,
        seq: u64,
    },
    Decoded(DecodeReply),
}

/// Handle on a running pipeline
///
/// Dropping the handle tears the pipeline down in the background; use
/// [`shutdown`](Self::shutdown) to wait for it.
pub struct PipelineController {
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<PipelineSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl PipelineController {
    /// Start the decode worker and the first run
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: CaptureConfig,
        devices: Arc<dyn MediaDevices>,
        host: SurfaceHost,
        decoder: DecoderFactory,
        listener: Arc<dyn ScanListener>,
    ) -> ScanResult<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(PipelineSnapshot::default());

        let actor = Actor {
            config,
            negotiator: ConstraintNegotiator::new(Arc::clone(&devices)),
            streams: StreamLifecycleManager::new(Arc::clone(&devices), host),
            devices,
            decoder,
            channel: None,
            listener,
            runs: RunCounter::default(),
            run: None,
            state: PipelineState::Idle,
            snapshot_tx,
            events_tx,
        };

        let task = tokio::spawn(actor.run(command_rx, events_rx));
        Ok(Self {
            commands,
            snapshot,
            task: Some(task),
        })
    }

    /// Apply a new configuration
    ///
    /// Facing or explicit constraint changes, and switching to manual
    /// sampling, restart the pipeline. Other interval changes are applied
    /// in place; the resolution is picked up by the next restart.
    pub fn update_config(&self, config: CaptureConfig) -> ScanResult<()> {
        config.validate()?;
        self.send(Command::UpdateConfig(config));
        Ok(())
    }

    /// Sample the current frame now
    ///
    /// Ignored while a request is with the decoder or before playback started.
    pub fn scan_now(&self) {
        self.send(Command::ScanNow);
    }

    pub fn state(&self) -> PipelineState {
        self.snapshot.borrow().state
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        *self.snapshot.borrow()
    }

    /// Observe state changes
    pub fn subscribe_state(&self) -> watch::Receiver<PipelineSnapshot> {
        self.snapshot.clone()
    }

    /// Tear down the current run, stop the decode worker and wait for both
    pub async fn shutdown(mut self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Command::Shutdown(done_tx));
        let _ = done_rx.await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Pipeline controller is no longer running");
        }
    }
}

/// State owned by one run
struct Run {
    token: RunToken,
    started: Instant,
    stream: Option<ActiveStream>,
    surface: Option<Arc<dyn RenderSurface>>,
    ready: Option<StreamReady>,
    sampler: FrameSampler,
    in_flight: Option<Ticket>,
    next_seq: u64,
    loaded: bool,
}

struct Actor {
    config: CaptureConfig,
    devices: Arc<dyn MediaDevices>,
    negotiator: ConstraintNegotiator,
    streams: StreamLifecycleManager,
    decoder: DecoderFactory,
    channel: Option<DecodeChannel>,
    listener: Arc<dyn ScanListener>,
    runs: RunCounter,
    run: Option<Run>,
    state: PipelineState,
    snapshot_tx: watch::Sender<PipelineSnapshot>,
    events_tx: mpsc::UnboundedSender<Event>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) {
        self.begin_run().await;
        self.publish();

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::UpdateConfig(config)) => self.update_config(config).await,
                    Some(Command::ScanNow) => self.scan_now(),
                    Some(Command::Shutdown(done)) => {
                        self.shutdown().await;
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        debug!("Controller handle dropped, shutting down");
                        self.shutdown().await;
                        return;
                    }
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
            self.publish();
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Negotiated { run, result } => self.on_negotiated(run, result),
            Event::Acquired { run, result } => self.on_acquired(run, result),
            Event::Surface { run, wait } => self.on_surface(run, wait),
            Event::PlaybackStarted { run } => self.on_playback_started(run),
            Event::Tick { run, seq } => self.on_tick(run, seq),
            Event::Decoded(reply) => self.on_decoded(reply),
        }
    }

    fn current_run(&self, run: u64) -> Option<&Run> {
        self.run.as_ref().filter(|r| r.token.id() == run)
    }

    fn current_run_mut(&mut self, run: u64) -> Option<&mut Run> {
        self.run.as_mut().filter(|r| r.token.id() == run)
    }

    fn set_state(&mut self, state: PipelineState) {
        if self.state != state {
            trace!(from = %self.state, to = %state, "Pipeline state change");
            self.state = state;
        }
    }

    fn publish(&self) {
        let run = self.run.as_ref();
        let snapshot = PipelineSnapshot {
            state: self.state,
            run: self.runs.last(),
            timer_pending: run.is_some_and(|r| r.sampler.has_pending_timer()),
            decode_in_flight: run.is_some_and(|r| r.in_flight.is_some()),
            stream_live: run
                .and_then(|r| r.stream.as_ref())
                .is_some_and(ActiveStream::is_live),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    /// Make sure the decode worker is up; reports a construction failure
    async fn ensure_channel(&mut self) -> bool {
        if self.channel.as_ref().is_some_and(DecodeChannel::is_alive) {
            return true;
        }
        if let Some(dead) = self.channel.take() {
            dead.shutdown().await;
        }

        match DecodeChannel::spawn(Arc::clone(&self.decoder)).await {
            Ok(channel) => {
                self.channel = Some(channel);
                true
            }
            Err(e) => {
                warn!(error = %e, "Decode worker could not be started");
                self.set_state(PipelineState::Stopped);
                self.listener.on_error(e);
                false
            }
        }
    }

    async fn begin_run(&mut self) {
        if !self.ensure_channel().await {
            return;
        }

        let token = self.runs.begin();
        let run_id = token.id();
        info!(
            run = run_id,
            facing = %self.config.facing,
            interval = ?self.config.sample_interval,
            resolution = self.config.target_resolution_px,
            "Starting pipeline run"
        );

        if let Some(channel) = &self.channel {
            let events = self.events_tx.clone();
            channel.on_result(move |reply| {
                let _ = events.send(Event::Decoded(reply));
            });
        }

        self.run = Some(Run {
            token,
            started: Instant::now(),
            stream: None,
            surface: None,
            ready: None,
            sampler: FrameSampler::new(self.config.target_resolution_px),
            in_flight: None,
            next_seq: 0,
            loaded: false,
        });
        self.set_state(PipelineState::Negotiating);

        let capabilities = self.devices.supported_constraints();
        let fallback = self.devices.is_fallback_runtime();
        match self.negotiator.negotiate(&self.config, &capabilities, fallback) {
            Negotiation::Ready(constraints) => self.on_negotiated(run_id, Ok(constraints)),
            pending => {
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let result = pending.resolve().await;
                    let _ = events.send(Event::Negotiated { run: run_id, result });
                });
            }
        }
    }

    fn on_negotiated(&mut self, run: u64, result: ScanResult<VideoConstraints>) {
        if self.current_run(run).is_none() {
            trace!(run, "Discarding negotiation of superseded run");
            return;
        }

        let constraints = match result {
            Ok(constraints) => constraints,
            Err(e) => return self.fail(e),
        };

        debug!(run, ?constraints, "Constraints negotiated, acquiring stream");
        self.set_state(PipelineState::Acquiring);

        let acquire = self.streams.open(constraints);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = acquire.await;
            // If the controller is gone the stream is dropped here, which stops it
            let _ = events.send(Event::Acquired { run, result });
        });
    }

    fn on_acquired(&mut self, run: u64, result: Result<ActiveStream, AcquisitionError>) {
        let Some(current) = self.current_run_mut(run) else {
            if let Ok(stream) = result {
                debug!(run, label = %stream.info().label, "Discarding stream of superseded run");
                stream.stop();
            }
            return;
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => return self.fail(ScanError::MediaAcquisition(e)),
        };

        info!(
            run,
            label = %stream.info().label,
            width = stream.info().width,
            height = stream.info().height,
            elapsed_ms = current.started.elapsed().as_millis(),
            "Stream acquired"
        );
        current.stream = Some(stream);
        let token = current.token.clone();

        let streams = self.streams.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let wait = streams.wait_for_surface(&token).await;
            let _ = events.send(Event::Surface {
                run: token.id(),
                wait,
            });
        });
    }

    fn on_surface(&mut self, run: u64, wait: SurfaceWait) {
        let facing = self.config.facing;
        let Some(current) = self.run.as_mut().filter(|r| r.token.id() == run) else {
            return;
        };

        let surface = match wait {
            SurfaceWait::Ready(surface) => surface,
            SurfaceWait::Superseded => return,
            SurfaceWait::Unavailable => {
                return self.fail(ScanError::MediaAcquisition(AcquisitionError::Backend(
                    "render surface never became available".to_string(),
                )));
            }
        };
        let Some(stream) = current.stream.as_ref() else {
            return;
        };

        let ready = self.streams.attach(stream, surface.as_ref(), facing);
        current.sampler.on_surface_ready(Arc::clone(&surface));
        current.surface = Some(Arc::clone(&surface));
        current.ready = Some(ready);
        self.set_state(PipelineState::Streaming);

        let playback = surface.playback_started();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            playback.await;
            let _ = events.send(Event::PlaybackStarted { run });
        });
    }

    fn on_playback_started(&mut self, run: u64) {
        let Some(current) = self.current_run_mut(run) else {
            return;
        };
        if current.loaded {
            return;
        }
        current.loaded = true;
        let ready = current.ready.clone();
        info!(
            run,
            elapsed_ms = current.started.elapsed().as_millis(),
            "Playback started"
        );

        self.set_state(PipelineState::Sampling(SamplingPhase::AwaitSurface));
        if let Some(ready) = ready {
            self.listener.on_stream_ready(ready);
        }

        match self.config.sample_interval.delay() {
            Some(delay) => self.arm_timer(delay),
            None => self.sample(),
        }
    }

    fn arm_timer(&mut self, delay: Duration) {
        let events = self.events_tx.clone();
        let Some(current) = self.run.as_mut() else {
            return;
        };
        let run = current.token.id();
        let seq = current.sampler.schedule_next(delay, move |seq| {
            let _ = events.send(Event::Tick { run, seq });
        });
        trace!(run, seq, delay_ms = delay.as_millis(), "Next sample scheduled");
        self.set_state(PipelineState::Sampling(SamplingPhase::AwaitSurface));
    }

    fn on_tick(&mut self, run: u64, seq: u64) {
        let Some(current) = self.current_run_mut(run) else {
            return;
        };
        if !current.sampler.accept_tick(seq) {
            trace!(run, seq, "Ignoring tick of replaced timer");
            return;
        }
        self.sample();
    }

    /// Capture the current frame and hand it to the decoder
    fn sample(&mut self) {
        let Some(current) = self.run.as_mut() else {
            return;
        };
        if current.in_flight.is_some() {
            return;
        }

        match current.sampler.capture_once() {
            Capture::Captured(buffer) => {
                current.next_seq += 1;
                let ticket = Ticket {
                    run: current.token.id(),
                    seq: current.next_seq,
                };
                let sent = match &self.channel {
                    Some(channel) => channel.send(ticket, buffer),
                    None => Err(ScanError::WorkerUnavailable("no decode worker".to_string())),
                };
                match sent {
                    Ok(()) => {
                        current.in_flight = Some(ticket);
                        self.set_state(PipelineState::Sampling(SamplingPhase::AwaitDecode));
                    }
                    Err(e) => self.fail(e),
                }
            }
            Capture::SkippedNotReady => {
                // Manual mode retries its pending capture at the surface poll pace
                let delay = self.config.sample_interval.delay().unwrap_or(POLL_INTERVAL);
                trace!(run = current.token.id(), "Surface not ready, retrying later");
                self.arm_timer(delay);
            }
        }
    }

    fn on_decoded(&mut self, reply: DecodeReply) {
        let DecodeReply { ticket, response } = reply;
        let Some(current) = self.current_run_mut(ticket.run) else {
            trace!(run = ticket.run, "Discarding decode reply of superseded run");
            return;
        };
        if current.in_flight != Some(ticket) {
            trace!(run = ticket.run, seq = ticket.seq, "Discarding unexpected decode reply");
            return;
        }
        current.in_flight = None;

        if let Some(data) = &response.data {
            debug!(run = ticket.run, seq = ticket.seq, data = %data, "Code decoded");
        }
        self.set_state(PipelineState::Sampling(SamplingPhase::AwaitSurface));
        self.listener.on_scan_result(response.data, response.chunks);

        if let Some(delay) = self.config.sample_interval.delay() {
            self.arm_timer(delay);
        }
    }

    fn scan_now(&mut self) {
        let Some(current) = self.run.as_mut() else {
            debug!("No active run, ignoring scan request");
            return;
        };
        if !current.loaded {
            debug!(run = current.token.id(), "Playback not started, ignoring scan request");
            return;
        }
        if current.in_flight.is_some() {
            debug!(run = current.token.id(), "Decode in flight, dropping scan request");
            return;
        }
        current.sampler.cancel();
        self.sample();
    }

    async fn update_config(&mut self, config: CaptureConfig) {
        let change = self.config.diff(&config);
        self.config = config;

        if change.requires_restart() {
            info!(?change, "Configuration change requires restart");
            self.teardown();
            self.begin_run().await;
            return;
        }

        if change.interval == IntervalChange::Enabled
            && let Some(current) = self.run.as_ref()
            && current.loaded
            && current.in_flight.is_none()
            && !current.sampler.has_pending_timer()
            && let Some(delay) = self.config.sample_interval.delay()
        {
            debug!(delay_ms = delay.as_millis(), "Sampling interval enabled");
            self.arm_timer(delay);
        }
    }

    /// End the run with an error
    fn fail(&mut self, error: ScanError) {
        warn!(run = self.runs.last(), error = %error, "Pipeline run failed");
        self.teardown();
        self.listener.on_error(error);
    }

    /// Cancel the timer, stop the stream, release the decode listener
    fn teardown(&mut self) {
        self.runs.end();
        if let Some(mut run) = self.run.take() {
            run.sampler.cancel();
            if let Some(stream) = run.stream.take() {
                stream.stop();
                self.streams.detach();
            }
            if let Some(channel) = &self.channel {
                channel.clear_result_handler();
            }
            info!(
                run = run.token.id(),
                elapsed_ms = run.started.elapsed().as_millis(),
                "Pipeline run stopped"
            );
        }
        self.set_state(PipelineState::Stopped);
    }

    async fn shutdown(&mut self) {
        self.teardown();
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
        }
        self.publish();
    }
}
