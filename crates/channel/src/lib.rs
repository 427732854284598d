//! Hat Game channel.
//!
//! A reconnecting WebSocket client that presents a logically continuous duplex
//! message channel to the game server across physical reconnects:
//! - `ChannelClient`: connect / send / close plus inbound and reconnect hooks
//! - `envelope`: the `{type, data}` wire envelope and frame codec
//! - `endpoint`: WebSocket URL derivation from a page origin
//! - `transport`: the socket seam, with a tokio-tungstenite implementation

mod backoff;
mod client;
mod config;
mod error;
mod state;

pub mod endpoint;
pub mod envelope;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use client::ChannelClient;
pub use config::{ChannelConfig, RetryConfig};
pub use endpoint::{endpoint_from_origin, EndpointError, DEFAULT_GAME_PATH};
pub use envelope::{Envelope, Inbound, Payload};
pub use error::{ConnectError, SendError, TransportError};
pub use state::ConnectionState;
pub use transport::{CloseFrame, Duplex, Frame, Transport, WsTransport};
