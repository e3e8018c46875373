//! One request/response cycle against a kernel.

use std::time::Duration;

use log::{debug, trace, warn};
use tokio::time::Instant;

use super::batch::{BatchBuilder, OutputBatch};
use crate::channel::{
    Channel, EXECUTE_REPLY, ExecuteRequest, KernelRequest, MessageKind, Reply, classify,
};
use crate::error::{ProtocolError, Result};
use crate::transport::{KernelTransport, deadline_after};

/// Where a session is in its request cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No request issued yet, or the last cycle failed.
    Init,
    /// Request written to the command channel.
    Sent,
    /// Waiting for the terminal reply.
    AwaitReply,
    /// Reply received; waiting for the `busy` notification.
    AwaitBusy,
    /// `busy` seen; collecting output until `idle`.
    Collecting,
    /// Cycle complete. A new request may be issued.
    Idle,
}

/// Bounds for one execution cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long to wait for the command-channel reply.
    pub reply_timeout: Duration,

    /// Bound on each notification receive.
    pub poll_timeout: Duration,

    /// Maximum notification receives per cycle.
    pub max_polls: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(5),
            poll_timeout: Duration::from_millis(100),
            max_polls: 100,
        }
    }
}

/// Reply and output of a completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub reply: Reply,
    pub batch: OutputBatch,
}

impl Execution {
    /// Text of the first result or error, whichever came first.
    pub fn text(&self) -> Option<String> {
        self.batch
            .iter()
            .find(|item| matches!(item.kind, MessageKind::Content(_)))
            .and_then(|item| item.text())
    }
}

/// Drives execution requests over a [`KernelTransport`].
///
/// One request is outstanding at a time. Every failure puts the session back
/// in [`SessionState::Init`] and leaves the transport open.
///
/// # Example
///
/// ```rust,no_run
/// use kernelprobe::driver::SessionBuilder;
/// use kernelprobe::transport::ConnectionInfo;
///
/// # async fn example() -> Result<(), kernelprobe::Error> {
/// let info = ConnectionInfo::from_file("kernel.json")?;
/// let mut session = SessionBuilder::new().connect(info).await?;
///
/// let execution = session.run("select 1 + 1").await?;
/// assert_eq!(execution.text().as_deref(), Some("2"));
///
/// session.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct ExecutionSession<T: KernelTransport> {
    transport: T,
    config: SessionConfig,
    state: SessionState,
    outstanding: Option<String>,
}

impl<T: KernelTransport> ExecutionSession<T> {
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Init,
            outstanding: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Whether a request is in flight.
    pub fn has_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }

    fn transition(&mut self, next: SessionState) {
        trace!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn reset(&mut self) {
        if self.state != SessionState::Init {
            debug!("session reset from {:?}", self.state);
        }
        self.state = SessionState::Init;
        self.outstanding = None;
    }

    fn expect_state(&self, expected: SessionState, operation: &str) -> Result<&str> {
        match &self.outstanding {
            Some(msg_id) if self.state == expected => Ok(msg_id.as_str()),
            _ => Err(ProtocolError::violation(format!(
                "{operation} called in state {:?}",
                self.state
            ))
            .into()),
        }
    }

    /// Send an execution request. Returns its message id.
    pub async fn execute(&mut self, request: &ExecuteRequest) -> Result<String> {
        let result = self.execute_inner(request).await;
        if result.is_err() {
            self.reset();
        }
        result
    }

    async fn execute_inner(&mut self, request: &ExecuteRequest) -> Result<String> {
        if let Some(pending) = &self.outstanding {
            return Err(
                ProtocolError::violation(format!("request {pending} is still outstanding")).into(),
            );
        }
        if !matches!(self.state, SessionState::Init | SessionState::Idle) {
            return Err(ProtocolError::violation(format!(
                "cannot execute in state {:?}",
                self.state
            ))
            .into());
        }

        let message = KernelRequest::execute(request);
        self.transport.send(&message).await?;
        debug!("execute_request {} sent: {:?}", message.msg_id, request.code);
        self.outstanding = Some(message.msg_id.clone());
        self.transition(SessionState::Sent);
        Ok(message.msg_id)
    }

    /// Wait for the `execute_reply` to the outstanding request.
    pub async fn await_reply(&mut self, timeout: Duration) -> Result<Reply> {
        let result = self.await_reply_inner(timeout).await;
        if result.is_err() {
            self.reset();
        }
        result
    }

    async fn await_reply_inner(&mut self, timeout: Duration) -> Result<Reply> {
        let msg_id = self.expect_state(SessionState::Sent, "await_reply")?.to_string();
        self.transition(SessionState::AwaitReply);

        let deadline = deadline_after(timeout);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let received = if remaining.is_zero() {
                None
            } else {
                self.transport
                    .receive_from(Channel::Command, remaining)
                    .await?
            };
            let Some(message) = received else {
                return Err(ProtocolError::Timeout {
                    waiting_for: "execute reply",
                    after: timeout,
                }
                .into());
            };

            if message.msg_type() != EXECUTE_REPLY {
                debug!("discarding {} while awaiting reply", message.msg_type());
                continue;
            }
            if message.parent_msg_id() != Some(msg_id.as_str()) {
                debug!(
                    "discarding reply to {:?}, awaiting {msg_id}",
                    message.parent_msg_id()
                );
                continue;
            }

            let reply = Reply::from_message(message)?;
            trace!("reply {:?} for {msg_id}", reply.status);
            self.transition(SessionState::AwaitBusy);
            return Ok(reply);
        }
    }

    /// Collect notifications for the outstanding request until `idle`.
    ///
    /// Makes at most `max_polls` receives of up to `poll_timeout` each, and
    /// gives up once `poll_timeout * max_polls` has elapsed.
    pub async fn drain_notifications(
        &mut self,
        code: &str,
        poll_timeout: Duration,
        max_polls: u32,
    ) -> Result<OutputBatch> {
        let result = self.drain_inner(code, poll_timeout, max_polls).await;
        if result.is_err() {
            self.reset();
        }
        result
    }

    async fn drain_inner(
        &mut self,
        code: &str,
        poll_timeout: Duration,
        max_polls: u32,
    ) -> Result<OutputBatch> {
        let msg_id = self
            .expect_state(SessionState::AwaitBusy, "drain_notifications")?
            .to_string();

        let budget = poll_timeout.saturating_mul(max_polls);
        let deadline = deadline_after(budget);
        let mut builder = BatchBuilder::default();
        let mut echoed = false;

        for _ in 0..max_polls {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let Some(message) = self
                .transport
                .receive_from(Channel::Notification, poll_timeout.min(remaining))
                .await?
            else {
                continue;
            };

            if message.parent_msg_id() != Some(msg_id.as_str()) {
                debug!(
                    "skipping {} for parent {:?}",
                    message.msg_type(),
                    message.parent_msg_id()
                );
                continue;
            }

            let kind = classify(&message);
            let collecting = self.state == SessionState::Collecting;
            match kind {
                MessageKind::Busy if !collecting => self.transition(SessionState::Collecting),
                MessageKind::Busy => {
                    return Err(ProtocolError::violation("busy status after output started").into());
                }
                _ if !collecting => {
                    return Err(ProtocolError::violation(format!(
                        "{} arrived before busy status",
                        message.msg_type()
                    ))
                    .into());
                }
                MessageKind::Idle => {
                    self.outstanding = None;
                    self.transition(SessionState::Idle);
                    return Ok(builder.finish());
                }
                MessageKind::Echo { code: echoed_code } => {
                    if echoed {
                        return Err(ProtocolError::violation("input echoed twice").into());
                    }
                    if echoed_code != code {
                        return Err(ProtocolError::Inconsistent {
                            expected: code.to_string(),
                            actual: echoed_code,
                        }
                        .into());
                    }
                    echoed = true;
                }
                MessageKind::Unknown if message.msg_type() == "status" => {
                    return Err(ProtocolError::violation(format!(
                        "unexpected execution state {:?}",
                        message.execution_state()
                    ))
                    .into());
                }
                MessageKind::Unknown => {
                    warn!("unrecognized notification type {}", message.msg_type());
                    builder.push(kind, message);
                }
                MessageKind::Content(_) => builder.push(kind, message),
            }
        }

        Err(ProtocolError::Timeout {
            waiting_for: "idle status",
            after: budget,
        }
        .into())
    }

    /// Execute `code` with default flags and collect its output.
    pub async fn run(&mut self, code: &str) -> Result<Execution> {
        self.run_request(&ExecuteRequest::new(code)).await
    }

    /// Execute a request and collect its output, using the configured bounds.
    pub async fn run_request(&mut self, request: &ExecuteRequest) -> Result<Execution> {
        let SessionConfig {
            reply_timeout,
            poll_timeout,
            max_polls,
        } = self.config;

        self.execute(request).await?;
        let reply = self.await_reply(reply_timeout).await?;
        let batch = self
            .drain_notifications(&request.code, poll_timeout, max_polls)
            .await?;
        Ok(Execution { reply, batch })
    }

    /// Shut down the transport. Safe to call more than once.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.reset();
        self.transport.shutdown().await
    }
}
