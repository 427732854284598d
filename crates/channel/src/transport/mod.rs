//! Socket transport seam.
//!
//! The channel client only sees frames. Implementations own the actual socket:
//! - `ws`: tokio-tungstenite WebSocket transport
//! - `testing::ScriptedTransport` (test builds): in-memory peers driven by tests

mod ws;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::Sink;
use url::Url;

use crate::error::TransportError;

pub use ws::WsTransport;

/// Data or close frame on the wire. Ping/pong stay inside the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close(Option<CloseFrame>),
}

/// Close code and reason carried by a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

/// Both halves of one live connection handle.
pub struct Duplex {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens connection handles to the game server.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform the opening handshake against `endpoint`.
    async fn open(&self, endpoint: &Url) -> Result<Duplex, TransportError>;
}
