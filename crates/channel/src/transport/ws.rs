//! WebSocket transport using tokio-tungstenite

use std::borrow::Cow;

use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{CloseFrame, Duplex, Frame, Transport};
use crate::error::TransportError;

/// Transport that opens a real WebSocket per handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, endpoint: &Url) -> Result<Duplex, TransportError> {
        let (ws_stream, _response) = connect_async(endpoint.as_str())
            .await
            .map_err(|e| TransportError::Handshake(e.to_string()))?;

        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame_to_message(frame))));

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(message) => message_to_frame(message).map(Ok),
                Err(e) => Some(Err(TransportError::Stream(e.to_string()))),
            })
        });

        Ok(Duplex {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        })
    }
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text),
        Frame::Binary(bytes) => Message::Binary(bytes),
        Frame::Close(close) => Message::Close(close.map(|c| WsCloseFrame {
            code: CloseCode::from(c.code),
            reason: Cow::Owned(c.reason),
        })),
    }
}

fn message_to_frame(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text)),
        Message::Binary(bytes) => Some(Frame::Binary(bytes)),
        Message::Close(close) => Some(Frame::Close(close.map(|c| CloseFrame {
            code: u16::from(c.code),
            reason: c.reason.into_owned(),
        }))),
        // Pings are answered by tungstenite itself
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}
