//! Channel configuration.

use std::time::Duration;

use url::Url;

/// Retry delay policy for reconnecting an established channel.
///
/// There is no attempt limit: the client retries until it connects or is
/// closed intentionally. A `multiplier` of `1.0` gives a fixed interval.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay in milliseconds before the first retry
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,
    /// Growth factor applied after every failed attempt
    pub multiplier: f64,
    /// Jitter factor (0.0-1.0) for randomizing delays
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(1_500))
    }
}

impl RetryConfig {
    /// Constant retry interval without jitter.
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            base_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// Exponential backoff from `base` up to `max`, doubling each attempt.
    pub fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            base_delay_ms: base.as_millis() as u64,
            max_delay_ms: max.as_millis() as u64,
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Configuration for a [`ChannelClient`](crate::ChannelClient).
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint of the game server
    pub endpoint: Url,
    /// Reconnection delay policy
    pub retry: RetryConfig,
    /// How often frames sent while disconnected are re-attempted
    pub send_poll_interval: Duration,
    /// How long an opening handshake may take before it counts as failed
    pub handshake_timeout: Duration,
    /// How long an intentional close waits for the peer's close frame
    pub close_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            retry: RetryConfig::default(),
            send_poll_interval: Duration::from_millis(1_500),
            handshake_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_send_poll_interval(mut self, interval: Duration) -> Self {
        self.send_poll_interval = interval;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}
