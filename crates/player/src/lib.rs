//! Three Names in a Hat headless player.
//!
//! - `config`: environment-driven settings
//! - `console`: stdin command loop
//! - `session`: game message handling on top of the resilient channel

pub mod config;
pub mod console;
pub mod session;

pub use config::PlayerConfig;
pub use console::{run_input, InputEnd};
pub use session::{parse_command, Command, GameSession, Identity, Outbox, Progress};
