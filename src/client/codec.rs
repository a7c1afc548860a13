//! Text-frame codec for the streaming channel.
//!
//! The channel speaks a prefix-tagged text protocol: a session-open control
//! frame, a keep-alive ping that must be answered immediately with a fixed
//! pong token, and application messages — a prefix followed by a JSON
//! `{type, data?}` payload. The codec classifies inbound frames, guards
//! against oversized or malformed payloads, and never raises decode failures
//! to callers: one bad frame must not take down the listener pipeline.
//! Unrecognized frame kinds are logged at low severity and ignored for
//! forward compatibility.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::error::Result;

/// Prefix of the session-open control frame.
pub const SESSION_OPEN_PREFIX: &str = "0";
/// Keep-alive ping token sent by the server.
pub const PING_FRAME: &str = "2";
/// Pong token answering a ping.
pub const PONG_FRAME: &str = "3";
/// Prefix of application-message frames.
pub const MESSAGE_PREFIX: &str = "42";

/// Hard ceiling on a single application payload. Frames above this are
/// dropped before parsing so a buggy or malicious remote cannot exhaust
/// memory with one frame.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;
/// Bound on the `type` field of an application message.
pub const MAX_TYPE_LEN: usize = 128;

/// A decoded application message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    /// Logical message type used for listener dispatch.
    pub kind: String,
    pub data: Option<Value>,
}

impl ChannelMessage {
    pub fn new(kind: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    /// Encode for the wire: message prefix plus the JSON payload.
    pub(crate) fn encode(&self) -> String {
        let mut payload = serde_json::Map::new();
        payload.insert("type".to_string(), Value::String(self.kind.clone()));
        if let Some(data) = &self.data {
            payload.insert("data".to_string(), data.clone());
        }
        format!("{}{}", MESSAGE_PREFIX, Value::Object(payload))
    }
}

/// Classification of one inbound text frame.
#[derive(Debug, PartialEq)]
pub enum Frame {
    SessionOpen,
    KeepAlive,
    Message(ChannelMessage),
    /// Malformed, oversized, or unrecognized input; already logged.
    Ignored,
}

/// Write half of the streaming channel, as seen by the codec. Split out as a
/// trait so the keep-alive reply path is testable without a live socket.
#[async_trait]
pub trait FrameSink {
    async fn send_frame(&mut self, frame: &str) -> Result<()>;
}

/// Classify and decode one raw text frame, answering keep-alive pings on
/// `sink` without delay. Never fails: undecodable input is logged and
/// reported as [`Frame::Ignored`].
pub async fn decode_frame<S: FrameSink + Send>(raw: &str, sink: &mut S) -> Frame {
    if raw == PING_FRAME {
        // The remote closes the connection if the pong is late.
        if let Err(err) = sink.send_frame(PONG_FRAME).await {
            warn!(error = %err, "failed to answer keep-alive ping");
        }
        return Frame::KeepAlive;
    }

    if let Some(payload) = raw.strip_prefix(MESSAGE_PREFIX) {
        if payload.is_empty() {
            trace!("ignoring empty application frame");
            return Frame::Ignored;
        }
        if payload.len() > MAX_MESSAGE_BYTES {
            warn!(
                bytes = payload.len(),
                limit = MAX_MESSAGE_BYTES,
                "dropping oversized application frame"
            );
            return Frame::Ignored;
        }
        return match serde_json::from_str::<Value>(payload) {
            Ok(value) => match validate_message(value) {
                Some(message) => Frame::Message(message),
                None => Frame::Ignored,
            },
            Err(err) => {
                warn!(error = %err, "dropping undecodable application frame");
                Frame::Ignored
            }
        };
    }

    if raw.starts_with(SESSION_OPEN_PREFIX) {
        debug!("streaming session opened");
        return Frame::SessionOpen;
    }

    trace!(prefix = ?raw.chars().next(), "ignoring unrecognized frame kind");
    Frame::Ignored
}

/// Structural validation of a parsed payload. The warning names the payload
/// shape and whether a `type` field was present, but never echoes the
/// payload body.
fn validate_message(value: Value) -> Option<ChannelMessage> {
    match value {
        Value::Object(mut map) => match map.get("type") {
            Some(Value::String(kind)) if !kind.is_empty() && kind.len() <= MAX_TYPE_LEN => {
                let kind = kind.clone();
                let data = map.remove("data");
                Some(ChannelMessage { kind, data })
            }
            other => {
                warn!(
                    has_type = other.is_some(),
                    "dropping message frame without a usable type field"
                );
                None
            }
        },
        other => {
            warn!(
                payload_kind = json_kind(&other),
                "dropping non-object message frame"
            );
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSink {
        sent: Vec<String>,
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_frame(&mut self, frame: &str) -> Result<()> {
            self.sent.push(frame.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn ping_produces_exactly_one_pong_and_no_message() {
        let mut sink = RecordingSink::default();
        let frame = decode_frame(PING_FRAME, &mut sink).await;
        assert_eq!(frame, Frame::KeepAlive);
        assert_eq!(sink.sent, vec![PONG_FRAME.to_string()]);
    }

    #[tokio::test]
    async fn session_open_is_acknowledged_and_discarded() {
        let mut sink = RecordingSink::default();
        let frame = decode_frame("0{\"sid\":\"abc\"}", &mut sink).await;
        assert_eq!(frame, Frame::SessionOpen);
        assert!(sink.sent.is_empty());
    }

    #[tokio::test]
    async fn well_formed_message_is_decoded() {
        let mut sink = RecordingSink::default();
        let raw = "42{\"type\":\"combat-update\",\"data\":{\"round\":3}}";
        match decode_frame(raw, &mut sink).await {
            Frame::Message(message) => {
                assert_eq!(message.kind, "combat-update");
                assert_eq!(message.data, Some(json!({"round": 3})));
            }
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_without_data_is_decoded() {
        let mut sink = RecordingSink::default();
        match decode_frame("42{\"type\":\"pause\"}", &mut sink).await {
            Frame::Message(message) => {
                assert_eq!(message.kind, "pause");
                assert_eq!(message.data, None);
            }
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_frame_is_dropped_without_error() {
        let mut sink = RecordingSink::default();
        let raw = format!("{}{}", MESSAGE_PREFIX, "x".repeat(MAX_MESSAGE_BYTES + 1));
        assert_eq!(decode_frame(&raw, &mut sink).await, Frame::Ignored);
        assert!(sink.sent.is_empty());
    }

    #[tokio::test]
    async fn empty_type_is_dropped() {
        let mut sink = RecordingSink::default();
        assert_eq!(
            decode_frame("42{\"type\":\"\"}", &mut sink).await,
            Frame::Ignored
        );
    }

    #[tokio::test]
    async fn missing_type_is_dropped() {
        let mut sink = RecordingSink::default();
        assert_eq!(
            decode_frame("42{\"no_type\":1}", &mut sink).await,
            Frame::Ignored
        );
    }

    #[tokio::test]
    async fn overlong_type_is_dropped() {
        let mut sink = RecordingSink::default();
        let raw = format!("42{{\"type\":\"{}\"}}", "t".repeat(MAX_TYPE_LEN + 1));
        assert_eq!(decode_frame(&raw, &mut sink).await, Frame::Ignored);
    }

    #[tokio::test]
    async fn non_object_payload_is_dropped() {
        let mut sink = RecordingSink::default();
        assert_eq!(decode_frame("42[1,2,3]", &mut sink).await, Frame::Ignored);
        assert_eq!(decode_frame("42\"hello\"", &mut sink).await, Frame::Ignored);
    }

    #[tokio::test]
    async fn malformed_json_is_dropped() {
        let mut sink = RecordingSink::default();
        assert_eq!(
            decode_frame("42{\"type\":", &mut sink).await,
            Frame::Ignored
        );
    }

    #[tokio::test]
    async fn unknown_frame_kinds_are_ignored() {
        let mut sink = RecordingSink::default();
        assert_eq!(decode_frame("7", &mut sink).await, Frame::Ignored);
        assert_eq!(decode_frame("", &mut sink).await, Frame::Ignored);
        assert_eq!(decode_frame("41error", &mut sink).await, Frame::Ignored);
        assert!(sink.sent.is_empty());
    }

    #[tokio::test]
    async fn encode_round_trips_through_decode() {
        let mut sink = RecordingSink::default();
        let original = ChannelMessage::new("chat", Some(json!({"text": "hail and well met"})));
        match decode_frame(&original.encode(), &mut sink).await {
            Frame::Message(decoded) => assert_eq!(decoded, original),
            other => panic!("expected a message, got {other:?}"),
        }
    }
}
