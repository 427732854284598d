//! Player configuration

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use hatgame_channel::{endpoint_from_origin, ChannelConfig, RetryConfig, DEFAULT_GAME_PATH};

/// Length of a game code handed out by the server.
pub const GAME_CODE_LEN: usize = 4;

/// Player configuration loaded from environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConfig {
    /// Page origin of the game server, e.g. `http://localhost:8080`
    pub server_origin: String,
    /// Game to join, always upper-case
    pub game_code: String,
    /// Name shown to the other players
    pub player_name: String,
    /// Fixed delay between reconnection attempts
    pub retry_delay: Duration,
    /// How often queued sends are retried while disconnected
    pub send_poll_interval: Duration,
}

impl PlayerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let game_code = lookup("HAT_GAME_CODE")
            .context("HAT_GAME_CODE environment variable is required")?
            .trim()
            .to_ascii_uppercase();
        if game_code.len() != GAME_CODE_LEN || !game_code.chars().all(|c| c.is_ascii_uppercase())
        {
            bail!("HAT_GAME_CODE must be {GAME_CODE_LEN} letters, got {game_code:?}");
        }

        let player_name = lookup("HAT_PLAYER_NAME")
            .context("HAT_PLAYER_NAME environment variable is required")?
            .trim()
            .to_string();
        if player_name.is_empty() {
            bail!("HAT_PLAYER_NAME must not be empty");
        }

        Ok(Self {
            server_origin: lookup("HAT_SERVER_ORIGIN")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            game_code,
            player_name,
            retry_delay: Duration::from_millis(
                lookup("HAT_RETRY_DELAY_MS")
                    .unwrap_or_else(|| "1500".to_string())
                    .parse()
                    .context("HAT_RETRY_DELAY_MS must be a number of milliseconds")?,
            ),
            send_poll_interval: Duration::from_millis(
                lookup("HAT_SEND_POLL_MS")
                    .unwrap_or_else(|| "1500".to_string())
                    .parse()
                    .context("HAT_SEND_POLL_MS must be a number of milliseconds")?,
            ),
        })
    }

    /// Channel settings for the game endpoint on the configured origin.
    pub fn channel_config(&self) -> Result<ChannelConfig> {
        let endpoint = endpoint_from_origin(&self.server_origin, DEFAULT_GAME_PATH)
            .with_context(|| format!("invalid HAT_SERVER_ORIGIN {:?}", self.server_origin))?;

        Ok(ChannelConfig::new(endpoint)
            .with_retry(RetryConfig::fixed(self.retry_delay))
            .with_send_poll_interval(self.send_poll_interval))
    }
}
