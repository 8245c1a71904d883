//! Reconnect pacing for a faulted link.

use std::time::Duration;

use crate::config::PollConfig;

/// Delay schedule between automatic reconnect attempts.
///
/// Back-to-back failed connects double the wait up to `max`. A link that
/// was up and then dropped is retried after `min`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    min: Duration,
    max: Duration,
    next: Duration,
}

impl ReconnectBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self { min, max, next: min }
    }

    /// Backoff bounds taken from `reconnect_min_ms`/`reconnect_max_ms`.
    pub fn from_poll(poll: &PollConfig) -> Self {
        Self::new(poll.reconnect_min(), poll.reconnect_max())
    }

    /// Forget earlier failures after a successful connect.
    pub fn reset(&mut self) {
        self.next = self.min;
    }

    /// Wait before the attempt that follows a failed connect.
    pub fn on_connect_failed(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Wait before reconnecting a link that was lost while in use.
    pub fn on_link_lost(&self) -> Duration {
        self.min
    }
}
