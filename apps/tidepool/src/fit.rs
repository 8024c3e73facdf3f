//! Keeps the declared viewport in step with the surface's container.
//!
//! An observer notification is authoritative and fits at once. When a caller
//! only knows that layout *may* have moved (a switch, a reconnect), a refit
//! request arms a bounded fallback of delayed re-measurements.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tidepool_core::ViewportGeometry;
use tracing::trace;

/// Fallback delays after a refit request.
pub const DEFAULT_FIT_SCHEDULE: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(200),
    Duration::from_millis(600),
];

/// Measures the surface's current character grid.
pub trait ViewportProbe: Send + Sync {
    /// `None` when the surface cannot be measured right now (hidden, detached).
    fn measure(&self) -> Option<ViewportGeometry>;
}

/// Probe backed by a shared value, for embedders that push measurements.
#[derive(Debug, Clone, Default)]
pub struct SharedProbe {
    geometry: Arc<Mutex<Option<ViewportGeometry>>>,
}

impl SharedProbe {
    pub fn new(geometry: Option<ViewportGeometry>) -> Self {
        Self {
            geometry: Arc::new(Mutex::new(geometry)),
        }
    }

    pub fn set(&self, geometry: Option<ViewportGeometry>) {
        *self.geometry.lock() = geometry;
    }
}

impl ViewportProbe for SharedProbe {
    fn measure(&self) -> Option<ViewportGeometry> {
        *self.geometry.lock()
    }
}

#[derive(Debug)]
pub struct FitController {
    schedule: Vec<Duration>,
    pending: VecDeque<Instant>,
    connected: bool,
}

impl FitController {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self {
            schedule,
            pending: VecDeque::new(),
            connected: false,
        }
    }

    /// Fitting only happens while a connection is present. Losing it drops
    /// any outstanding attempts.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        if !connected {
            self.pending.clear();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Arms the fallback schedule from `now`, replacing any earlier one.
    pub fn request_refit(&mut self, now: Instant) {
        self.pending.clear();
        if !self.connected {
            return;
        }
        self.pending
            .extend(self.schedule.iter().map(|delay| now + *delay));
        trace!(target = "tidepool::fit", attempts = self.pending.len(), "refit scheduled");
    }

    /// An observer reported the settled geometry. Fits now and cancels the
    /// fallback attempts.
    pub fn observe(&mut self, geometry: ViewportGeometry) -> Option<ViewportGeometry> {
        self.pending.clear();
        self.connected.then_some(geometry)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.front().copied()
    }

    pub fn pending_attempts(&self) -> usize {
        self.pending.len()
    }

    /// Consumes every attempt due at `now` and, if any was due, measures
    /// once through `probe`.
    pub fn on_deadline(&mut self, now: Instant, probe: &dyn ViewportProbe) -> Option<ViewportGeometry> {
        let mut due = false;
        while self.pending.front().is_some_and(|at| *at <= now) {
            self.pending.pop_front();
            due = true;
        }
        if !due || !self.connected {
            return None;
        }
        let measured = probe.measure();
        trace!(target = "tidepool::fit", ?measured, remaining = self.pending.len(), "fallback fit");
        measured
    }
}

impl Default for FitController {
    fn default() -> Self {
        Self::new(DEFAULT_FIT_SCHEDULE.to_vec())
    }
}
