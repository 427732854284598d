//! Reconnection delay state.
//!
//! Runtime-agnostic: the client owns one `BackoffState` per retry loop and
//! sleeps for whatever delay it hands out.

use rand::Rng;

use crate::config::RetryConfig;

/// Backoff state for one run of the retry loop.
#[derive(Debug, Clone)]
pub struct BackoffState {
    config: RetryConfig,
    attempts: u32,
    delay_ms: u64,
}

impl BackoffState {
    pub fn new(config: RetryConfig) -> Self {
        let delay_ms = config.base_delay_ms;
        Self {
            config,
            attempts: 0,
            delay_ms,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Advance to the next attempt, updating the delay for the subsequent attempt.
    ///
    /// Returns the delay to wait *before* performing this attempt. Never runs
    /// out.
    pub fn next_delay_and_advance(&mut self) -> u64 {
        let current = self.delay_ms;
        self.attempts = self.attempts.saturating_add(1);
        self.delay_ms = ((self.delay_ms as f64) * self.config.multiplier.max(1.0))
            .min(self.config.max_delay_ms.max(self.config.base_delay_ms) as f64)
            as u64;
        self.jittered(current)
    }

    fn jittered(&self, delay_ms: u64) -> u64 {
        let jitter_range = (delay_ms as f64 * self.config.jitter_factor.clamp(0.0, 1.0)) as i64;
        if jitter_range > 0 {
            let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (delay_ms as i64 + jitter).max(0) as u64
        } else {
            delay_ms
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_policy_never_grows() {
        let mut backoff = BackoffState::new(RetryConfig::fixed(Duration::from_millis(1_500)));
        for _ in 0..50 {
            assert_eq!(backoff.next_delay_and_advance(), 1_500);
        }
        assert_eq!(backoff.attempts(), 50);
    }

    #[test]
    fn test_exponential_policy_doubles_up_to_cap() {
        let config = RetryConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter_factor: 0.0,
        };
        let mut backoff = BackoffState::new(config);
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay_and_advance()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000, 1_000]);
    }

    #[test]
    fn test_each_state_starts_from_base_delay() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::exponential(Duration::from_millis(10), Duration::from_millis(80))
        };
        let mut first = BackoffState::new(config.clone());
        first.next_delay_and_advance();
        first.next_delay_and_advance();

        let mut fresh = BackoffState::new(config);
        assert_eq!(fresh.attempts(), 0);
        assert_eq!(fresh.next_delay_and_advance(), 10);
    }

    #[test]
    fn test_jitter_stays_within_range() {
        let config = RetryConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            multiplier: 1.0,
            jitter_factor: 0.2,
        };
        let mut backoff = BackoffState::new(config);
        for _ in 0..100 {
            let delay = backoff.next_delay_and_advance();
            assert!((800..=1_200).contains(&delay), "delay {delay} out of range");
        }
    }
}
