// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for capture loops
//!
//! Blocking capture APIs (V4L2 dequeue) run on their own OS thread. The
//! controller owns the thread and hands it a stop signal. Tracks stop with
//! [`CaptureLoopController::stop_detached`], which never waits for the loop
//! body; the thread is joined by a short-lived reaper instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Stop flag shared between the controller and the loop body
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Controller for a capture loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let controller = CaptureLoopController::start("v4l2-capture", |stop| {
///     while !stop.is_stopped() {
///         capture_and_publish_frame();
///     }
/// })?;
///
/// // Later, stop the loop and wait for the thread
/// controller.stop();
/// ```
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: StopSignal,
    name: String,
}

impl CaptureLoopController {
    /// Start the loop body on a named thread
    ///
    /// The body owns the whole loop and must return once the stop signal is
    /// raised. Fails only if the OS refuses to create the thread.
    pub fn start<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let stop_signal = StopSignal::default();
        let loop_signal = stop_signal.clone();
        let name_clone = name.to_string();

        info!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Capture loop thread started");
                body(loop_signal);
                info!(name = %name_clone, "Capture loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.stop_signal.raise();
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Signal the loop to stop and join the thread in the background
    ///
    /// Returns at once even when the body is parked in a blocking call.
    pub fn stop_detached(mut self) {
        self.request_stop();
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }

        let name = self.name.clone();
        let reaper = thread::Builder::new()
            .name(format!("{}-reaper", self.name))
            .spawn(move || match handle.join() {
                Ok(()) => debug!(name = %name, "Capture loop thread reaped"),
                Err(e) => warn!(name = %name, "Capture loop thread panicked: {:?}", e),
            });
        if let Err(e) = reaper {
            // The handle went down with the closure, so the thread is detached
            warn!(name = %self.name, error = %e, "Could not spawn reaper thread");
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            // Joining from inside the loop thread would deadlock
            if handle.thread().id() == thread::current().id() {
                return;
            }
            debug!(name = %self.name, "Waiting for capture loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[test]
    fn test_stop_signal() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-loop", move |stop| {
            while !stop.is_stopped() {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        assert!(controller.is_running());

        controller.stop();
        assert!(!controller.is_running());
        assert!(counter.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_body_may_finish_early() {
        let mut controller = CaptureLoopController::start("test-early", |_stop| {}).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!controller.is_running());
        // Stopping a finished loop is a no-op
        controller.stop();
    }

    #[test]
    fn test_detached_stop_does_not_wait_for_blocked_body() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let exited = Arc::new(AtomicBool::new(false));
        let exited_clone = Arc::clone(&exited);

        let controller = CaptureLoopController::start("test-blocked", move |stop| {
            // Stands in for a dequeue that only returns once a frame arrives
            let _ = release_rx.recv();
            assert!(stop.is_stopped());
            exited_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

        controller.stop_detached();
        assert!(!exited.load(Ordering::SeqCst));

        release_tx.send(()).unwrap();
        for _ in 0..200 {
            if exited.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(exited.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_stops_loop() {
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_clone = Arc::clone(&stopped);

        let controller = CaptureLoopController::start("test-drop", move |stop| {
            while !stop.is_stopped() {
                thread::sleep(Duration::from_millis(5));
            }
            stopped_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

        drop(controller);
        assert!(stopped.load(Ordering::SeqCst));
    }
}
