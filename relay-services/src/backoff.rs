//! Reconnect backoff

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential backoff with a ceiling, reset after a sustained session
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    reset_after: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, reset_after: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            reset_after,
            attempt: 0,
        }
    }

    /// Delay before the next reconnect attempt: `base * 2^n`, capped at `max`
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Account for a session that stayed connected for `connected_for`
    pub fn record_session(&mut self, connected_for: Duration) {
        if connected_for >= self.reset_after {
            self.reset();
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failures since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl From<&ReconnectConfig> for Backoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(config.base_delay, config.max_delay, config.reset_after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn test_delays_double_up_to_ceiling() {
        let mut backoff = backoff();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_resets_after_sustained_connectivity() {
        let mut backoff = backoff();
        for _ in 0..3 {
            backoff.next_delay();
        }
        backoff.record_session(Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_short_session_keeps_growing() {
        let mut backoff = backoff();
        for _ in 0..3 {
            backoff.next_delay();
        }
        backoff.record_session(Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
    }

    #[test]
    fn test_many_attempts_do_not_overflow() {
        let mut backoff = backoff();
        for _ in 0..200 {
            assert!(backoff.next_delay() <= Duration::from_secs(30));
        }
    }
}
