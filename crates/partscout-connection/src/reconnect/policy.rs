//! Reconnect policy and per-role attempt counters

use std::time::Duration;

use partscout_core::DbRole;
use tokio::time::Instant;

/// Limits on automatic reconnection for one role
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Consecutive failures allowed before the cooldown starts
    max_attempts: u32,
    /// Fixed delay between attempts in the startup retry loop
    retry_delay: Duration,
    /// How long automatic attempts stay suppressed once the budget is spent
    cooldown_period: Duration,
}

impl ReconnectPolicy {
    /// Create a policy with the default 3 s retry delay and 5 min cooldown.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            retry_delay: Duration::from_secs(3),
            cooldown_period: Duration::from_secs(300),
        }
    }

    /// Default policy for a role. The catalog gets a larger budget than the
    /// ledger: it is the operational store and users notice its outages
    /// immediately.
    pub fn for_role(role: DbRole) -> Self {
        match role {
            DbRole::Catalog => Self::new(5),
            DbRole::Ledger => Self::new(3),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_cooldown_period(mut self, period: Duration) -> Self {
        self.cooldown_period = period;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn cooldown_period(&self) -> Duration {
        self.cooldown_period
    }
}

/// What the health loop should do with an unhealthy role right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Budget remains; make an attempt
    Attempt,
    /// Budget spent; suppressed until the cooldown elapses
    Cooldown,
}

/// Per-role attempt bookkeeping for health-loop reconnection.
///
/// Never consulted by the lazy recovery path: a user actively waiting on a
/// query must not be starved by a cooldown.
#[derive(Debug, Default)]
pub struct ReconnectCounters {
    attempts: u32,
    cooldown_until: Option<Instant>,
}

impl ReconnectCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether the health loop may attempt a reconnect at `now`.
    ///
    /// An expired cooldown resets the budget, so polling resumes normally
    /// once the outage window has been served.
    pub fn decision(&mut self, policy: &ReconnectPolicy, now: Instant) -> ReconnectDecision {
        if let Some(until) = self.cooldown_until {
            if now < until {
                return ReconnectDecision::Cooldown;
            }
            self.reset();
        }
        if self.attempts >= policy.max_attempts() {
            ReconnectDecision::Cooldown
        } else {
            ReconnectDecision::Attempt
        }
    }

    /// Record a failed health-loop attempt; the last one in the budget
    /// starts the cooldown.
    pub fn record_failure(&mut self, policy: &ReconnectPolicy, now: Instant) {
        self.attempts += 1;
        if self.attempts >= policy.max_attempts() {
            self.cooldown_until = Some(now + policy.cooldown_period());
        }
    }

    pub fn record_success(&mut self) {
        self.reset();
    }

    /// Clear the budget and any active cooldown. Manual reconnects call this
    /// before attempting, regardless of prior state.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.cooldown_until = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn in_cooldown(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }
}
