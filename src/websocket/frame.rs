//! Incoming frame classification and outgoing payload encoding.
//!
//! Byte-level framing is done by `tokio-tungstenite`; this module decides what
//! a decoded message means for a connection of a given payload kind.

use bytes::Bytes;
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;

use crate::error::SessionError;

/// Payload marker declared on a WebSocket route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Binary,
    Json,
    #[default]
    Text,
}

/// A message travelling to or from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
    Binary(Bytes),
}

impl Payload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Encode for a connection of the given kind.
    pub fn into_message(self, kind: PayloadKind) -> Message {
        match (self, kind) {
            (Payload::Binary(bytes), _) => Message::Binary(bytes),
            (Payload::Json(value), _) => Message::Text(value.to_string().into()),
            (Payload::Text(text), PayloadKind::Binary) => Message::Binary(Bytes::from(text)),
            (Payload::Text(text), _) => Message::Text(text.into()),
        }
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Binary(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Binary(Bytes::from(value))
    }
}

/// What the session should do with one decoded message.
#[derive(Debug)]
pub enum FrameEvent {
    Message(Payload),
    /// Client-initiated close, including an empty payload.
    Close,
    /// Report to the registry; the socket stays open.
    Error(SessionError),
    /// Control frames handled by the codec.
    Ignore,
}

/// Cheap structural check: trimmed text starts and ends with `""`, `[]` or `{}`.
pub fn looks_like_json(text: &str) -> bool {
    let text = text.trim();
    let (Some(first), Some(last)) = (text.chars().next(), text.chars().last()) else {
        return false;
    };
    if text.len() < 2 {
        return false;
    }
    matches!((first, last), ('"', '"') | ('[', ']') | ('{', '}'))
}

/// Classify a decoded message for a connection of `kind`.
///
/// Oversized payloads are errors and never close the socket. On JSON
/// connections a payload that doesn't look like JSON closes the socket,
/// while one that looks like JSON but fails to parse is only reported.
pub fn classify(message: Message, kind: PayloadKind, max_size: usize) -> FrameEvent {
    let size = message.len();
    if size > max_size {
        return FrameEvent::Error(SessionError::FrameTooLarge {
            size,
            max: max_size,
        });
    }

    match message {
        Message::Close(_) => FrameEvent::Close,
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => FrameEvent::Ignore,
        Message::Text(text) if text.is_empty() => FrameEvent::Close,
        Message::Binary(bytes) if bytes.is_empty() => FrameEvent::Close,
        Message::Text(text) => match kind {
            PayloadKind::Json => json_event(text.as_str()),
            _ => FrameEvent::Message(Payload::Text(text.as_str().to_string())),
        },
        Message::Binary(bytes) => match kind {
            PayloadKind::Json => match std::str::from_utf8(&bytes) {
                Ok(text) => json_event(text),
                Err(_) => FrameEvent::Close,
            },
            _ => FrameEvent::Message(Payload::Binary(bytes)),
        },
    }
}

fn json_event(text: &str) -> FrameEvent {
    if !looks_like_json(text) {
        return FrameEvent::Close;
    }
    match serde_json::from_str(text) {
        Ok(value) => FrameEvent::Message(Payload::Json(value)),
        Err(e) => FrameEvent::Error(SessionError::Json(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Message {
        Message::Text(s.to_string().into())
    }

    #[test]
    fn test_looks_like_json() {
        assert!(looks_like_json("{\"a\":1}"));
        assert!(looks_like_json(" [1,2] "));
        assert!(looks_like_json("\"x\""));
        assert!(!looks_like_json("hello"));
        assert!(!looks_like_json("{"));
        assert!(!looks_like_json("\""));
    }

    #[test]
    fn test_oversized_is_error_not_close() {
        let event = classify(text("0123456789"), PayloadKind::Text, 5);
        assert!(matches!(
            event,
            FrameEvent::Error(SessionError::FrameTooLarge { size: 10, max: 5 })
        ));
    }

    #[test]
    fn test_empty_payload_closes() {
        assert!(matches!(classify(text(""), PayloadKind::Text, 100), FrameEvent::Close));
        assert!(matches!(
            classify(Message::Binary(Bytes::new()), PayloadKind::Binary, 100),
            FrameEvent::Close
        ));
    }

    #[test]
    fn test_plain_text_delivered_verbatim() {
        match classify(text("hi there"), PayloadKind::Text, 100) {
            FrameEvent::Message(Payload::Text(t)) => assert_eq!(t, "hi there"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_json_connection_asymmetry() {
        match classify(text("{\"n\":1}"), PayloadKind::Json, 100) {
            FrameEvent::Message(Payload::Json(v)) => assert_eq!(v["n"], 1),
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            classify(text("{not json}"), PayloadKind::Json, 100),
            FrameEvent::Error(SessionError::Json(_))
        ));

        assert!(matches!(
            classify(text("plain words"), PayloadKind::Json, 100),
            FrameEvent::Close
        ));
    }

    #[test]
    fn test_control_frames_ignored() {
        assert!(matches!(
            classify(Message::Ping(Bytes::new()), PayloadKind::Text, 100),
            FrameEvent::Ignore
        ));
    }

    #[test]
    fn test_encode_by_kind() {
        let msg = Payload::Json(serde_json::json!({"a": 1})).into_message(PayloadKind::Json);
        assert_eq!(msg, Message::Text("{\"a\":1}".to_string().into()));

        let msg = Payload::from("raw").into_message(PayloadKind::Binary);
        assert_eq!(msg, Message::Binary(Bytes::from_static(b"raw")));
    }
}
