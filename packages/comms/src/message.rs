//! Transport-level envelopes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    Request,
    Response,
    /// Out-of-band notification, never matched against requests
    Broadcast,
    Ping,
    Pong,
}

/// Message envelope carried by a [`MessageBus`](crate::MessageBus)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub from: String,
    pub to: String,
    /// Correlation id; a response reuses the id of its request
    pub id: String,
    #[serde(default)]
    pub payload: Value,
}

impl Message {
    pub fn new(
        kind: MessageKind,
        from: impl Into<String>,
        to: impl Into<String>,
        id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            from: from.into(),
            to: to.into(),
            id: id.into(),
            payload,
        }
    }

    pub fn request(from: &str, to: &str, id: &str, payload: Value) -> Self {
        Self::new(MessageKind::Request, from, to, id, payload)
    }

    /// Build the response to `request`, addressed back to its sender
    pub fn response_to(request: &Message, body: ResponseBody) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            MessageKind::Response,
            request.to.clone(),
            request.from.clone(),
            request.id.clone(),
            serde_json::to_value(body)?,
        ))
    }

    pub fn pong_to(ping: &Message) -> Self {
        Self::new(
            MessageKind::Pong,
            ping.to.clone(),
            ping.from.clone(),
            ping.id.clone(),
            Value::Null,
        )
    }
}

/// Payload of a RESPONSE envelope
///
/// `Error` carries request-level failures (malformed request, missing user
/// id). Protocol failures travel inside `Ok` as typed data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum ResponseBody {
    Ok(Value),
    Error(String),
}
