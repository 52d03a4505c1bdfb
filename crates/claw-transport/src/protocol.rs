//! Wire protocols carried over stream connections.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::Frame;

/// How text frames are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    /// Parse as JSON, falling back to raw text.
    #[default]
    Json,
    /// Pass through untouched (terminal bytes).
    Raw,
}

/// Decoded incoming frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    Binary(Bytes),
}

impl Payload {
    #[must_use]
    pub fn decode(frame: Frame, mode: ParseMode) -> Self {
        match (frame, mode) {
            (Frame::Binary(data), _) => Self::Binary(data),
            (Frame::Text(text), ParseMode::Raw) => Self::Text(text),
            (Frame::Text(text), ParseMode::Json) => match serde_json::from_str(&text) {
                Ok(value) => Self::Json(value),
                Err(_) => Self::Text(text),
            },
        }
    }
}

// ==================== Log stream ====================

/// JSON envelope sent by the log endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEnvelope {
    Log { log: String },
    Error { detail: String },
    Status { status: String },
}

/// What a log panel should do with one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Line(String),
    Error(String),
    Status(String),
    /// Not a recognized envelope; shown verbatim.
    Raw(String),
}

impl LogEntry {
    #[must_use]
    pub fn from_payload(payload: Payload) -> Self {
        match payload {
            Payload::Json(value) => match serde_json::from_value::<LogEnvelope>(value.clone()) {
                Ok(LogEnvelope::Log { log }) => Self::Line(log),
                Ok(LogEnvelope::Error { detail }) => Self::Error(detail),
                Ok(LogEnvelope::Status { status }) => Self::Status(status),
                Err(_) => Self::Raw(value.to_string()),
            },
            Payload::Text(text) => Self::Raw(text),
            Payload::Binary(data) => Self::Raw(String::from_utf8_lossy(&data).into_owned()),
        }
    }
}

// ==================== Gateway ====================

/// Request methods understood by the gateway.
pub mod methods {
    pub const CHAT_SEND: &str = "chat.send";
    pub const CHAT_HISTORY: &str = "chat.history";
    pub const CHAT_ABORT: &str = "chat.abort";
    pub const FILES_LIST: &str = "files.list";
    pub const FILES_GET: &str = "files.get";
    pub const FILES_SET: &str = "files.set";
    pub const FILES_DELETE: &str = "files.delete";
    pub const CONFIG_GET: &str = "config.get";
    pub const CONFIG_SET: &str = "config.set";
}

/// Error body attached to a failed gateway response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
}

/// One frame on the gateway event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    Req {
        id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Res {
        id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<GatewayErrorBody>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

impl GatewayFrame {
    #[must_use]
    pub fn request(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self::Req {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Serialize for sending.
    ///
    /// # Errors
    /// Returns error if the params cannot be serialized.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::Text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

/// A complete chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            run_id: None,
            timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ContentPayload {
    run_id: String,
    delta: String,
}

#[derive(Debug, Clone, Deserialize)]
struct RunPayload {
    run_id: String,
    #[serde(default)]
    message: Option<String>,
}

/// Typed gateway event.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// Whole message (echo of a user turn, or a non-streamed reply).
    Chat(ChatMessage),
    /// Incremental assistant output.
    ChatContent { run_id: String, delta: String },
    ChatDone { run_id: String },
    ChatError { run_id: String, message: String },
    /// Anything this client does not model.
    Other { event: String, payload: Value },
}

impl GatewayEvent {
    /// Type an `event` frame. Malformed payloads for known events become `Other`.
    #[must_use]
    pub fn from_parts(event: String, payload: Value) -> Self {
        let typed = match event.as_str() {
            "chat" => serde_json::from_value(payload.clone()).ok().map(Self::Chat),
            "chat.content" => serde_json::from_value::<ContentPayload>(payload.clone())
                .ok()
                .map(|p| Self::ChatContent {
                    run_id: p.run_id,
                    delta: p.delta,
                }),
            "chat.done" => serde_json::from_value::<RunPayload>(payload.clone())
                .ok()
                .map(|p| Self::ChatDone { run_id: p.run_id }),
            "chat.error" => serde_json::from_value::<RunPayload>(payload.clone())
                .ok()
                .map(|p| Self::ChatError {
                    run_id: p.run_id,
                    message: p.message.unwrap_or_else(|| "unknown error".to_owned()),
                }),
            _ => None,
        };
        typed.unwrap_or(Self::Other { event, payload })
    }
}

/// Entry returned by `files.list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub size: Option<u64>,
}

/// `files.get` / `files.set` body; content travels base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContent {
    pub path: String,
    pub content: String,
}

impl FileContent {
    #[must_use]
    pub fn encode(path: impl Into<String>, data: &[u8]) -> Self {
        Self {
            path: path.into(),
            content: BASE64.encode(data),
        }
    }

    #[must_use]
    pub fn decode(&self) -> Option<Vec<u8>> {
        BASE64.decode(&self.content).ok()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_mode_falls_back_to_text() {
        assert_eq!(
            Payload::decode(Frame::text(r#"{"a":1}"#), ParseMode::Json),
            Payload::Json(json!({"a": 1}))
        );
        assert_eq!(
            Payload::decode(Frame::text("oops"), ParseMode::Json),
            Payload::Text("oops".into())
        );
        assert_eq!(
            Payload::decode(Frame::text("42"), ParseMode::Raw),
            Payload::Text("42".into())
        );
    }

    #[test]
    fn log_envelopes_map_to_entries() {
        let entry = |raw: &str| LogEntry::from_payload(Payload::decode(Frame::text(raw), ParseMode::Json));

        assert_eq!(entry(r#"{"event":"log","log":"hello"}"#), LogEntry::Line("hello".into()));
        assert_eq!(
            entry(r#"{"event":"error","detail":"no such container"}"#),
            LogEntry::Error("no such container".into())
        );
        assert_eq!(
            entry(r#"{"event":"status","status":"running"}"#),
            LogEntry::Status("running".into())
        );
        assert_eq!(entry("oops"), LogEntry::Raw("oops".into()));
        let LogEntry::Raw(raw) = entry(r#"{"event":"metrics","cpu":3}"#) else {
            panic!("unknown envelope should stay raw");
        };
        assert!(raw.contains("metrics"));
    }

    #[test]
    fn gateway_request_shape() {
        let frame = GatewayFrame::request("1", methods::CHAT_SEND, json!({"message": "hi"}));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "req", "id": "1", "method": "chat.send", "params": {"message": "hi"}})
        );
    }

    #[test]
    fn gateway_response_parses_error_body() {
        let frame: GatewayFrame = serde_json::from_value(json!({
            "type": "res", "id": "7", "ok": false,
            "error": {"code": "not_found", "message": "no such file"}
        }))
        .unwrap();
        let GatewayFrame::Res { ok, error, .. } = frame else {
            panic!("expected response");
        };
        assert!(!ok);
        assert_eq!(error.unwrap().message, "no such file");
    }

    #[test]
    fn gateway_events_are_typed() {
        assert_eq!(
            GatewayEvent::from_parts("chat.content".into(), json!({"run_id": "r", "delta": "He"})),
            GatewayEvent::ChatContent {
                run_id: "r".into(),
                delta: "He".into()
            }
        );
        assert_eq!(
            GatewayEvent::from_parts("chat.error".into(), json!({"run_id": "r"})),
            GatewayEvent::ChatError {
                run_id: "r".into(),
                message: "unknown error".into()
            }
        );
        assert!(matches!(
            GatewayEvent::from_parts("chat".into(), json!({"role": "user", "content": "hi"})),
            GatewayEvent::Chat(ChatMessage { role: ChatRole::User, .. })
        ));
        assert!(matches!(
            GatewayEvent::from_parts("chat.content".into(), json!({"nope": true})),
            GatewayEvent::Other { .. }
        ));
        assert!(matches!(
            GatewayEvent::from_parts("presence".into(), json!({})),
            GatewayEvent::Other { .. }
        ));
    }

    #[test]
    fn file_content_is_base64() {
        let body = FileContent::encode("notes.md", b"# hi\n");
        assert_eq!(body.content, "IyBoaQo=");
        assert_eq!(body.decode().unwrap(), b"# hi\n");
    }
}
