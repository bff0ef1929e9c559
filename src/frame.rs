// ABOUTME: Wire-format types and frame classification for the gateway connection
// ABOUTME: Splits inbound JSON frames into events, command responses, and rejects

use serde::Serialize;
use serde_json::Value;

use crate::error::AdapterError;

/// The `post_type` discriminator values the gateway emits for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MetaEvent,
    Message,
    Notice,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MetaEvent => "meta_event",
            EventKind::Message => "message",
            EventKind::Notice => "notice",
        }
    }

    fn from_post_type(value: &str) -> Option<Self> {
        match value {
            "meta_event" => Some(EventKind::MetaEvent),
            "message" => Some(EventKind::Message),
            "notice" => Some(EventKind::Notice),
            _ => None,
        }
    }
}

/// An event frame bound for the ingress queue.
#[derive(Debug, Clone)]
pub struct EventFrame {
    pub kind: EventKind,
    /// Full decoded frame; handlers receive the whole object.
    pub payload: Value,
}

/// A command-response frame bound for the correlation pool.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    /// Correlation id from the `echo` field. None when the gateway sent a
    /// response without one (or with a non-string value); such frames can
    /// never match a pending command.
    pub echo: Option<String>,
    pub payload: Value,
}

/// Classification of one inbound frame.
#[derive(Debug, Clone)]
pub enum Classified {
    Event(EventFrame),
    Response(CommandResponse),
}

/// Classify a raw text frame from the gateway.
///
/// Frames with `post_type` of meta_event/message/notice become events.
/// Frames with no `post_type` (or an explicit null) are command responses.
/// Anything else is an UnknownKind error; malformed JSON is a Decode error.
pub fn classify(raw: &str) -> Result<Classified, AdapterError> {
    let payload: Value = serde_json::from_str(raw)?;

    match payload.get("post_type") {
        None | Some(Value::Null) => {
            let echo = payload
                .get("echo")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            Ok(Classified::Response(CommandResponse { echo, payload }))
        }
        Some(Value::String(s)) => match EventKind::from_post_type(s) {
            Some(kind) => Ok(Classified::Event(EventFrame { kind, payload })),
            None => Err(AdapterError::UnknownKind {
                post_type: s.clone(),
            }),
        },
        Some(other) => Err(AdapterError::UnknownKind {
            post_type: other.to_string(),
        }),
    }
}

/// Outbound command envelope written to the gateway.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundCommand {
    pub action: String,
    pub params: Value,
    pub echo: String,
}

impl OutboundCommand {
    pub fn new(action: impl Into<String>, params: Value, echo: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params,
            echo: echo.into(),
        }
    }
}
