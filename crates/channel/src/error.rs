//! Error types for the channel client.

use thiserror::Error;

/// Failure reported by the underlying socket.
///
/// Carries the rendered transport error so it stays `Clone` and independent of
/// the concrete WebSocket library.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The opening handshake failed (unreachable endpoint, protocol negotiation)
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The established stream reported an error
    #[error("stream error: {0}")]
    Stream(String),
    /// Writing a frame to the established stream failed
    #[error("send failed: {0}")]
    Send(String),
}

/// Error returned to the caller of [`ChannelClient::connect`](crate::ChannelClient::connect).
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// The client was closed intentionally while the handshake was in flight
    #[error("client was closed during the connection attempt")]
    Closed,
    /// Another connection attempt was already in flight and did not open
    #[error("concurrent connection attempt failed")]
    AttemptFailed,
}

/// Error returned by the send operations.
///
/// Sending while disconnected is not an error; frames are held until a
/// connection is available.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("payload is not JSON-encodable: {0}")]
    Serialize(#[from] serde_json::Error),
}
