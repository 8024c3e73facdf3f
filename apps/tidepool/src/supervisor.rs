use std::time::{Duration, Instant};

use tidepool_core::SessionId;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// A policy that never schedules an attempt.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

/// A scheduled attempt, as reported to the caller when arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub attempt: u32,
    pub delay: Duration,
}

/// Reconnect bookkeeping layered above the multiplexer.
///
/// Tracks one session at a time. Arming counts an attempt; a successful open
/// clears the slate; anything the user does to the selection cancels it.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    policy: ReconnectPolicy,
    target: Option<SessionId>,
    attempts: u32,
    deadline: Option<Instant>,
}

impl ReconnectSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            target: None,
            attempts: 0,
            deadline: None,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Schedules the next attempt for `session_id`. `None` once the attempt
    /// budget is spent, in which case the supervisor lets go.
    pub fn arm(&mut self, session_id: &SessionId, now: Instant) -> Option<Scheduled> {
        if self.target.as_ref() != Some(session_id) {
            self.target = Some(session_id.clone());
            self.attempts = 0;
        }
        if self.attempts >= self.policy.max_attempts {
            debug!(target = "tidepool::reconnect", session_id = %session_id, attempts = self.attempts, "giving up");
            self.cancel();
            return None;
        }
        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        self.deadline = Some(now + delay);
        debug!(
            target = "tidepool::reconnect",
            session_id = %session_id,
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        Some(Scheduled {
            attempt: self.attempts,
            delay,
        })
    }

    pub fn on_opened(&mut self, session_id: &SessionId) {
        if self.target.as_ref() == Some(session_id) {
            self.cancel();
        }
    }

    pub fn cancel(&mut self) {
        self.target = None;
        self.attempts = 0;
        self.deadline = None;
    }

    pub fn target(&self) -> Option<&SessionId> {
        self.target.as_ref()
    }

    pub fn is_tracking(&self, session_id: &SessionId) -> bool {
        self.target.as_ref() == Some(session_id)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The session to retry if its delay has elapsed. The target stays
    /// tracked so a failed attempt can re-arm with the next delay.
    pub fn take_due(&mut self, now: Instant) -> Option<SessionId> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.target.clone()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn backoff_doubles_from_one_second_and_caps() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=7).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test_timeout::timeout]
    fn gives_up_after_five_attempts() {
        let mut sup = ReconnectSupervisor::new(ReconnectPolicy::default());
        let id = SessionId::from("s1");
        let now = Instant::now();
        for attempt in 1..=5 {
            let scheduled = sup.arm(&id, now).expect("scheduled");
            assert_eq!(scheduled.attempt, attempt);
        }
        assert_eq!(sup.arm(&id, now), None);
        assert!(sup.target().is_none());
        assert_eq!(sup.next_deadline(), None);
    }

    #[test_timeout::timeout]
    fn successful_open_resets_the_budget() {
        let mut sup = ReconnectSupervisor::new(ReconnectPolicy::default());
        let id = SessionId::from("s1");
        let now = Instant::now();
        sup.arm(&id, now);
        sup.arm(&id, now);
        sup.on_opened(&id);
        assert_eq!(sup.attempts(), 0);
        assert_eq!(sup.arm(&id, now).map(|s| s.delay), Some(Duration::from_secs(1)));
    }

    #[test_timeout::timeout]
    fn due_attempt_is_handed_out_once() {
        let mut sup = ReconnectSupervisor::new(ReconnectPolicy::default());
        let id = SessionId::from("s1");
        let now = Instant::now();
        sup.arm(&id, now);
        assert_eq!(sup.take_due(now), None);
        assert_eq!(sup.take_due(now + Duration::from_secs(1)), Some(id.clone()));
        assert_eq!(sup.take_due(now + Duration::from_secs(2)), None);
        assert!(sup.is_tracking(&id));
    }

    #[test_timeout::timeout]
    fn disabled_policy_never_schedules() {
        let mut sup = ReconnectSupervisor::new(ReconnectPolicy::disabled());
        assert_eq!(sup.arm(&SessionId::from("s1"), Instant::now()), None);
    }
}
