use std::time::{Duration, Instant};

use tidepool_core::ViewportGeometry;

/// Decides when a geometry change becomes a resize frame.
///
/// Edge triggered: only changes are announced, plus the initial value on
/// every connect. With a non-zero window at most one frame goes out per
/// window and it always carries the latest proposal.
#[derive(Debug)]
pub struct ResizeNegotiator {
    window: Duration,
    current: ViewportGeometry,
    last_sent: Option<ViewportGeometry>,
    last_sent_at: Option<Instant>,
    pending_deadline: Option<Instant>,
}

impl ResizeNegotiator {
    pub fn new(window: Duration, initial: ViewportGeometry) -> Self {
        Self {
            window,
            current: initial,
            last_sent: None,
            last_sent_at: None,
            pending_deadline: None,
        }
    }

    pub fn current(&self) -> ViewportGeometry {
        self.current
    }

    /// Records the surface geometry while nothing is connected.
    pub fn set_current(&mut self, geometry: ViewportGeometry) {
        self.current = geometry;
    }

    /// The initial announcement for a fresh connection. Never delayed.
    pub fn on_connect(&mut self, now: Instant) -> ViewportGeometry {
        self.pending_deadline = None;
        self.last_sent = Some(self.current);
        self.last_sent_at = Some(now);
        self.current
    }

    /// Forgets what the previous connection was told.
    pub fn reset(&mut self) {
        self.last_sent = None;
        self.last_sent_at = None;
        self.pending_deadline = None;
    }

    /// Offers a new geometry. Returns the value to send right away, if any;
    /// otherwise the change waits for [`Self::poll`] at [`Self::deadline`].
    pub fn propose(&mut self, geometry: ViewportGeometry, now: Instant) -> Option<ViewportGeometry> {
        self.current = geometry;
        if self.last_sent == Some(geometry) {
            self.pending_deadline = None;
            return None;
        }
        if self.pending_deadline.is_some() {
            return None;
        }
        match self.last_sent_at {
            Some(at) if !self.window.is_zero() && now < at + self.window => {
                self.pending_deadline = Some(at + self.window);
                None
            }
            _ => Some(self.mark_sent(now)),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending_deadline
    }

    /// Releases a coalesced change once its window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<ViewportGeometry> {
        match self.pending_deadline {
            Some(deadline) if now >= deadline => {
                self.pending_deadline = None;
                if self.last_sent == Some(self.current) {
                    None
                } else {
                    Some(self.mark_sent(now))
                }
            }
            _ => None,
        }
    }

    fn mark_sent(&mut self, now: Instant) -> ViewportGeometry {
        self.last_sent = Some(self.current);
        self.last_sent_at = Some(now);
        self.current
    }
}
