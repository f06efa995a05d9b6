//! Reconnect policy: how many connect attempts to make and how long to wait
//! between them.

use std::time::Duration;

/// Bounded connect attempts with (optionally growing) delays in between.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Total connect attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure (1.0 = fixed).
    pub multiplier: f64,
}

impl ReconnectPolicy {
    /// `attempts` tries, `delay` apart.
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based) before trying
    /// again. `None` once the attempts are exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }
        let base_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.max_delay.as_millis() as f64);
        Some(Duration::from_millis(capped as u64))
    }

    /// Attempts, never fewer than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for ReconnectPolicy {
    /// Three attempts, back to back.
    fn default() -> Self {
        Self::fixed(3, Duration::ZERO)
    }
}
