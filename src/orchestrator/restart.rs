use std::time::{Duration, Instant};

/// Bounded restart budget with exponential backoff.
///
/// The attempt counter resets once the pipeline has run for
/// `stable_period` without restarting.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    max_restarts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    stable_period: Duration,
    attempts: u32,
    running_since: Option<Instant>,
}

impl RestartPolicy {
    pub fn new(
        max_restarts: u32,
        base_backoff: Duration,
        max_backoff: Duration,
        stable_period: Duration,
    ) -> Self {
        Self {
            max_restarts,
            base_backoff,
            max_backoff,
            stable_period,
            attempts: 0,
            running_since: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn mark_running(&mut self, now: Instant) {
        self.running_since = Some(now);
    }

    /// Forget past restarts after a long enough stable run.
    pub fn note_stable(&mut self, now: Instant) -> bool {
        let stable = self.attempts > 0
            && self
                .running_since
                .is_some_and(|since| now.saturating_duration_since(since) >= self.stable_period);
        if stable {
            self.attempts = 0;
        }
        stable
    }

    /// Consume one restart. `None` once the budget is spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_restarts {
            return None;
        }
        let backoff = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(self.attempts))
            .min(self.max_backoff);
        self.attempts += 1;
        self.running_since = None;
        Some(backoff)
    }
}
