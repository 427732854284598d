//! Wire envelope and frame codec.
//!
//! Every structured message exchanged with the game server is wrapped as
//! `{"type": <string>, "data": <any>}`. The channel never interprets `type` or
//! `data`; it only converts between application payloads and socket frames.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SendError;
use crate::transport::Frame;

/// `{type, data}` message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Envelope {
    /// Envelope without data, e.g. `{"type":"pong"}`.
    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: Value::Null,
        }
    }

    /// Envelope carrying any serializable data.
    pub fn new(kind: impl Into<String>, data: impl Serialize) -> Result<Self, SendError> {
        Ok(Self {
            kind: kind.into(),
            data: serde_json::to_value(data)?,
        })
    }

    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Decode `data` into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Outbound application payload.
///
/// Text and binary payloads are transport-native and go out unmodified;
/// envelopes and JSON values are serialized.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
    Envelope(Envelope),
    Json(Value),
}

impl Payload {
    pub(crate) fn into_frame(self) -> Result<Frame, SendError> {
        Ok(match self {
            Payload::Text(text) => Frame::Text(text),
            Payload::Binary(bytes) => Frame::Binary(bytes),
            Payload::Envelope(envelope) => Frame::Text(serde_json::to_string(&envelope)?),
            Payload::Json(value) => Frame::Text(serde_json::to_string(&value)?),
        })
    }
}

impl From<Envelope> for Payload {
    fn from(envelope: Envelope) -> Self {
        Payload::Envelope(envelope)
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Binary(bytes)
    }
}

/// Decoded inbound frame handed to the message handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Envelope(Envelope),
    /// Text frame that is not an envelope
    Text(String),
    Binary(Vec<u8>),
}

impl Inbound {
    /// Decode a data frame. Control frames yield `None`.
    pub(crate) fn decode(frame: Frame) -> Option<Self> {
        match frame {
            Frame::Text(text) => Some(match serde_json::from_str::<Envelope>(&text) {
                Ok(envelope) => Inbound::Envelope(envelope),
                Err(_) => Inbound::Text(text),
            }),
            Frame::Binary(bytes) => Some(Inbound::Binary(bytes)),
            Frame::Close(_) => None,
        }
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Inbound::Envelope(envelope) => Some(envelope),
            _ => None,
        }
    }
}
