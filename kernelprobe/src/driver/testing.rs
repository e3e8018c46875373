//! In-memory kernel for driving sessions in tests.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::{Value, json};
use uuid::Uuid;

use crate::channel::{Channel, EXECUTE_REPLY, Header, KernelRequest, Message};
use crate::error::{Result, TransportError};
use crate::transport::{KernelTransport, Transport};

type Responder = Box<dyn FnMut(&KernelRequest) -> Vec<Message> + Send>;

/// Kernel whose responses come from a closure over each request.
///
/// Produced messages are queued on the channel they name. Receives never
/// block: an empty queue reports a timeout immediately.
pub(crate) struct ScriptedKernel {
    responder: Responder,
    command: VecDeque<Message>,
    notification: VecDeque<Message>,
    sequence: u64,
    open: bool,
    pub(crate) sent: Vec<KernelRequest>,
}

impl ScriptedKernel {
    pub(crate) fn new(
        responder: impl FnMut(&KernelRequest) -> Vec<Message> + Send + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            command: VecDeque::new(),
            notification: VecDeque::new(),
            sequence: 0,
            open: true,
            sent: Vec::new(),
        }
    }

    /// Answers every request with `2`.
    pub(crate) fn well_behaved() -> Self {
        Self::new(|request| Self::standard_cycle(request, "2"))
    }

    /// Reply, busy, echo, one result, idle.
    pub(crate) fn standard_cycle(request: &KernelRequest, result: &str) -> Vec<Message> {
        let id = &request.msg_id;
        let code = request.content.get("code").cloned().unwrap_or(Value::Null);
        vec![
            reply(id, "ok"),
            status(id, "busy"),
            notification(id, "execute_input", json!({"code": code})),
            notification(
                id,
                "display_data",
                json!({"data": {"text/plain": result}, "metadata": {}}),
            ),
            status(id, "idle"),
        ]
    }

    /// Queue a message as if the kernel had already sent it.
    pub(crate) fn enqueue(&mut self, mut message: Message) {
        self.sequence += 1;
        message.sequence = self.sequence;
        match message.channel {
            Channel::Command => self.command.push_back(message),
            Channel::Notification => self.notification.push_back(message),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(TransportError::Closed.into())
        }
    }
}

fn message(channel: Channel, parent: &str, msg_type: &str, content: Value) -> Message {
    Message {
        channel,
        header: Header::new(Uuid::new_v4().to_string(), "scripted", msg_type),
        parent_header: Some(Header::new(parent, "client", "execute_request")),
        metadata: json!({}),
        content,
        sequence: 0,
    }
}

/// An `execute_reply` with the given status.
pub(crate) fn reply(parent: &str, status: &str) -> Message {
    message(
        Channel::Command,
        parent,
        EXECUTE_REPLY,
        json!({"status": status, "execution_count": 1}),
    )
}

pub(crate) fn status(parent: &str, state: &str) -> Message {
    notification(parent, "status", json!({"execution_state": state}))
}

pub(crate) fn notification(parent: &str, msg_type: &str, content: Value) -> Message {
    message(Channel::Notification, parent, msg_type, content)
}

impl Transport for ScriptedKernel {
    type Config = ();
    type Outbound = KernelRequest;
    type Inbound = Message;

    async fn connect(_config: ()) -> Result<Self> {
        Ok(Self::well_behaved())
    }

    async fn send(&mut self, request: &KernelRequest) -> Result<()> {
        self.ensure_open()?;
        for message in (self.responder)(request) {
            self.enqueue(message);
        }
        self.sent.push(request.clone());
        Ok(())
    }

    async fn receive(&mut self, _timeout: Duration) -> Result<Option<Message>> {
        self.ensure_open()?;
        Ok(self
            .command
            .pop_front()
            .or_else(|| self.notification.pop_front()))
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl KernelTransport for ScriptedKernel {
    async fn receive_from(&mut self, channel: Channel, _timeout: Duration) -> Result<Option<Message>> {
        self.ensure_open()?;
        Ok(match channel {
            Channel::Command => self.command.pop_front(),
            Channel::Notification => self.notification.pop_front(),
        })
    }
}
