//! Notification classification.

use serde_json::Value;

use super::message::Message;

/// Kinds of content a request can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// `execute_result` or `display_data`
    Result,
    /// `error`
    Error,
    /// `stream` (stdout/stderr text)
    Stream,
}

/// What a notification means to the collection loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// `status` with `execution_state: busy`
    Busy,
    /// `status` with `execution_state: idle`
    Idle,
    /// `execute_input`, carrying the code the kernel is running
    Echo { code: String },
    /// Output belonging in the batch
    Content(ContentKind),
    /// Anything else, including a status with another execution state.
    /// Kept visible so protocol drift shows up in tests.
    Unknown,
}

impl MessageKind {
    pub fn is_content(&self) -> bool {
        matches!(self, MessageKind::Content(_))
    }
}

/// Map a message's type tag to its [`MessageKind`].
pub fn classify(message: &Message) -> MessageKind {
    match message.msg_type() {
        "status" => match message.execution_state() {
            Some("busy") => MessageKind::Busy,
            Some("idle") => MessageKind::Idle,
            _ => MessageKind::Unknown,
        },
        "execute_input" => MessageKind::Echo {
            code: message
                .content
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        "execute_result" | "display_data" => MessageKind::Content(ContentKind::Result),
        "error" => MessageKind::Content(ContentKind::Error),
        "stream" => MessageKind::Content(ContentKind::Stream),
        _ => MessageKind::Unknown,
    }
}
