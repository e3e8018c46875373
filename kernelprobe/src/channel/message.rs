//! Kernel request, reply, and notification types.

use std::fmt;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use super::wire::{Header, WireMessage};
use crate::error::{DecodeError, Result};

/// `msg_type` of the terminal reply to an execution request.
pub const EXECUTE_REPLY: &str = "execute_reply";

/// MIME type to rendered value, in the order the kernel sent them.
pub type MimeBundle = IndexMap<String, Value>;

/// Which of the two kernel channels a message travelled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Request/reply channel (the Jupyter shell socket).
    Command,
    /// Broadcast channel (the Jupyter iopub socket).
    Notification,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Command => "command",
            Channel::Notification => "notification",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An execution request.
///
/// # Example
///
/// ```rust
/// use kernelprobe::channel::ExecuteRequest;
///
/// let request = ExecuteRequest::new("select 1 + 1").store_history(true);
/// assert!(!request.silent);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub code: String,
    pub silent: bool,
    pub store_history: bool,
    pub stop_on_error: bool,
}

impl ExecuteRequest {
    /// Create a request with every flag off.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            silent: false,
            store_history: false,
            stop_on_error: false,
        }
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn store_history(mut self, store_history: bool) -> Self {
        self.store_history = store_history;
        self
    }

    pub fn stop_on_error(mut self, stop_on_error: bool) -> Self {
        self.stop_on_error = stop_on_error;
        self
    }
}

/// A request as sent on the command channel.
///
/// `msg_id` is the correlation key: the reply and every notification caused
/// by this request carry it as their parent.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelRequest {
    pub msg_id: String,
    pub msg_type: String,
    pub content: Value,
}

impl KernelRequest {
    /// Create a request with a fresh message id.
    pub fn new(msg_type: impl Into<String>, content: Value) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            msg_type: msg_type.into(),
            content,
        }
    }

    /// Wrap an [`ExecuteRequest`].
    pub fn execute(request: &ExecuteRequest) -> Self {
        Self::new(
            "execute_request",
            json!({
                "code": request.code,
                "silent": request.silent,
                "store_history": request.store_history,
                "user_expressions": {},
                "allow_stdin": false,
                "stop_on_error": request.stop_on_error,
            }),
        )
    }

    /// A `kernel_info_request`, used as the readiness probe.
    pub fn kernel_info() -> Self {
        Self::new("kernel_info_request", json!({}))
    }
}

/// A message received from the kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: Channel,
    pub header: Header,
    pub parent_header: Option<Header>,
    pub metadata: Value,
    pub content: Value,
    /// Order in which this transport decoded messages, across both channels.
    pub sequence: u64,
}

impl Message {
    /// Build a message from its decoded wire form.
    pub fn from_wire(channel: Channel, wire: WireMessage, sequence: u64) -> Self {
        Self {
            channel,
            header: wire.header,
            parent_header: wire.parent_header,
            metadata: wire.metadata,
            content: wire.content,
            sequence,
        }
    }

    /// The type tag, e.g. `status` or `execute_result`.
    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// Id of the request this message responds to.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header
            .as_ref()
            .map(|parent| parent.msg_id.as_str())
            .filter(|id| !id.is_empty())
    }

    /// `execution_state` of a status message.
    pub fn execution_state(&self) -> Option<&str> {
        self.content.get("execution_state")?.as_str()
    }

    /// The `data` bundle of a result or display message.
    pub fn data(&self) -> Option<MimeBundle> {
        let data = self.content.get("data")?;
        serde_json::from_value(data.clone()).ok()
    }

    /// Plain-text rendering of the message.
    ///
    /// Uses `text/plain` from the data bundle, then the `text` of a stream
    /// message, then `ename: evalue` of an error.
    pub fn text(&self) -> Option<String> {
        if let Some(plain) = self
            .content
            .get("data")
            .and_then(|data| data.get("text/plain"))
            .and_then(Value::as_str)
        {
            return Some(plain.to_string());
        }
        if let Some(text) = self.content.get("text").and_then(Value::as_str) {
            return Some(text.to_string());
        }
        let ename = self.content.get("ename").and_then(Value::as_str)?;
        let evalue = self
            .content
            .get("evalue")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some(format!("{ename}: {evalue}"))
    }
}

/// Status field of a command-channel reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Ok,
    Error,
    Aborted,
}

#[derive(Deserialize)]
struct ReplyFields {
    status: ReplyStatus,
    #[serde(default)]
    execution_count: Option<u64>,
}

/// The terminal reply to one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: ReplyStatus,
    pub execution_count: Option<u64>,
    pub message: Message,
}

impl Reply {
    /// Parse the reply fields out of a command-channel message.
    pub fn from_message(message: Message) -> Result<Self> {
        let fields: ReplyFields =
            serde_json::from_value(message.content.clone()).map_err(DecodeError::from)?;
        Ok(Self {
            status: fields.status,
            execution_count: fields.execution_count,
            message,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(msg_type: &str, content: Value) -> Message {
        Message {
            channel: Channel::Notification,
            header: Header::new("m", "s", msg_type),
            parent_header: None,
            metadata: json!({}),
            content,
            sequence: 1,
        }
    }

    #[test]
    fn test_execute_request_content() {
        let request = KernelRequest::execute(&ExecuteRequest::new("select 1").silent(true));
        assert_eq!(request.msg_type, "execute_request");
        assert_eq!(request.content["code"], "select 1");
        assert_eq!(request.content["silent"], true);
        assert_eq!(request.content["stop_on_error"], false);
        assert_ne!(request.msg_id, KernelRequest::kernel_info().msg_id);
    }

    #[test]
    fn test_text_prefers_plain_data() {
        let msg = message(
            "execute_result",
            json!({"data": {"text/html": "<b>2</b>", "text/plain": "2"}}),
        );
        assert_eq!(msg.text().as_deref(), Some("2"));

        let bundle = msg.data().unwrap();
        assert_eq!(bundle.keys().collect::<Vec<_>>(), ["text/html", "text/plain"]);
    }

    #[test]
    fn test_text_for_stream_and_error() {
        let stream = message("stream", json!({"name": "stdout", "text": "yo\n"}));
        assert_eq!(stream.text().as_deref(), Some("yo\n"));

        let error = message(
            "error",
            json!({"ename": "SqliteError", "evalue": "incomplete input", "traceback": []}),
        );
        assert_eq!(error.text().as_deref(), Some("SqliteError: incomplete input"));
    }

    #[test]
    fn test_empty_parent_id_is_none() {
        let mut msg = message("status", json!({"execution_state": "idle"}));
        msg.parent_header = Some(Header::new("", "s", "execute_request"));
        assert_eq!(msg.parent_msg_id(), None);
        assert_eq!(msg.execution_state(), Some("idle"));
    }

    #[test]
    fn test_reply_status() {
        let mut msg = message(EXECUTE_REPLY, json!({"status": "ok", "execution_count": 3}));
        msg.channel = Channel::Command;
        let reply = Reply::from_message(msg).unwrap();
        assert!(reply.is_ok());
        assert_eq!(reply.execution_count, Some(3));

        let aborted = message(EXECUTE_REPLY, json!({"status": "aborted"}));
        assert_eq!(
            Reply::from_message(aborted).unwrap().status,
            ReplyStatus::Aborted
        );
        assert!(Reply::from_message(message(EXECUTE_REPLY, json!({}))).is_err());
    }
}
