// SPDX-License-Identifier: GPL-3.0-only

//! Pipeline state machine and run identity

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// What the sampling loop is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingPhase {
    /// Waiting for the next tick (or for the surface to have a frame)
    AwaitSurface,
    /// A request is with the decode worker
    AwaitDecode,
}

/// Pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Negotiating,
    Acquiring,
    Streaming,
    Sampling(SamplingPhase),
    Stopped,
}

impl PipelineState {
    /// Whether a run is underway (neither idle nor stopped)
    pub fn is_active(&self) -> bool {
        !matches!(self, PipelineState::Idle | PipelineState::Stopped)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Negotiating => write!(f, "negotiating"),
            PipelineState::Acquiring => write!(f, "acquiring"),
            PipelineState::Streaming => write!(f, "streaming"),
            PipelineState::Sampling(SamplingPhase::AwaitSurface) => write!(f, "sampling (await surface)"),
            PipelineState::Sampling(SamplingPhase::AwaitDecode) => write!(f, "sampling (await decode)"),
            PipelineState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Observable view of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    /// Current run id (0 before the first run)
    pub run: u64,
    pub timer_pending: bool,
    pub decode_in_flight: bool,
    pub stream_live: bool,
}

/// Identity of one pipeline run, checked by every async continuation
///
/// Clones share the "current run" cell of the controller; a token stays
/// current until the controller starts another run or stops.
#[derive(Debug, Clone)]
pub struct RunToken {
    id: u64,
    current: Arc<AtomicU64>,
}

impl RunToken {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.id
    }
}

/// Hands out run tokens and invalidates them
#[derive(Debug, Default)]
pub struct RunCounter {
    last: u64,
    current: Arc<AtomicU64>,
}

impl RunCounter {
    /// Start a new run, superseding the current one
    pub fn begin(&mut self) -> RunToken {
        self.last += 1;
        self.current.store(self.last, Ordering::SeqCst);
        RunToken {
            id: self.last,
            current: Arc::clone(&self.current),
        }
    }

    /// Invalidate every outstanding token
    pub fn end(&self) {
        self.current.store(0, Ordering::SeqCst);
    }

    pub fn last(&self) -> u64 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_supersedes_previous() {
        let mut runs = RunCounter::default();
        let first = runs.begin();
        assert!(first.is_current());

        let second = runs.begin();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert_eq!(second.id(), 2);

        runs.end();
        assert!(!second.is_current());
    }

    #[test]
    fn test_active_states() {
        assert!(!PipelineState::Idle.is_active());
        assert!(!PipelineState::Stopped.is_active());
        assert!(PipelineState::Sampling(SamplingPhase::AwaitDecode).is_active());
    }
}
