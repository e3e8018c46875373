//! Kernel transport over ZeroMQ.
//!
//! The command channel is a DEALER socket on the kernel's shell port; the
//! notification channel is a SUB socket on its iopub port, subscribed to
//! everything.

use std::time::Duration;

use log::{debug, trace, warn};
use secrecy::ExposeSecret;
use tokio::time::Instant;
use uuid::Uuid;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage, ZmqResult};

use super::config::KernelConfig;
use super::launcher::KernelProcess;
use super::{KernelTransport, Transport, deadline_after};
use crate::channel::{Channel, Header, KernelRequest, Message, Signer, WireMessage};
use crate::error::{DecodeError, Result, TransportError};

/// Bound on each kernel_info round trip during the readiness handshake.
const READY_REPLY_POLL: Duration = Duration::from_millis(500);

/// How long to wait for a notification proving the subscription is live.
const READY_NOTIFICATION_POLL: Duration = Duration::from_millis(200);

/// A connect attempt that failed is retried after this long.
const CONNECT_RETRY: Duration = Duration::from_millis(50);

/// Quiet period that ends the post-handshake flush.
const FLUSH_POLL: Duration = Duration::from_millis(50);

const FLUSH_LIMIT: usize = 64;

/// Command and notification channels to one kernel.
pub struct ChannelTransport {
    session_id: String,
    signer: Signer,
    shell: Option<DealerSocket>,
    iopub: Option<SubSocket>,
    send_timeout: Duration,
    sequence: u64,
    kernel: Option<KernelProcess>,
}

impl ChannelTransport {
    /// Connect both channels and wait until the kernel answers on both.
    pub async fn connect(config: KernelConfig) -> Result<Self> {
        let connection = config.connection;
        connection.validate()?;
        let deadline = deadline_after(config.ready_timeout);

        let mut shell = DealerSocket::new();
        connect_until(&mut shell, &connection.shell_endpoint(), deadline, config.ready_timeout)
            .await?;

        let mut iopub = SubSocket::new();
        connect_until(&mut iopub, &connection.iopub_endpoint(), deadline, config.ready_timeout)
            .await?;
        iopub.subscribe("").await.map_err(TransportError::Zmq)?;

        let mut transport = Self {
            session_id: Uuid::new_v4().to_string(),
            signer: Signer::new(connection.key.expose_secret()),
            shell: Some(shell),
            iopub: Some(iopub),
            send_timeout: config.send_timeout,
            sequence: 0,
            kernel: None,
        };

        if let Err(e) = transport.wait_for_ready(deadline, config.ready_timeout).await {
            let _ = transport.shutdown().await;
            return Err(e);
        }
        debug!(
            "connected to kernel at {} (session {})",
            connection.shell_endpoint(),
            transport.session_id
        );
        Ok(transport)
    }

    /// Tie a launched kernel's lifetime to this transport.
    pub(crate) fn with_kernel(mut self, kernel: KernelProcess) -> Self {
        self.kernel = Some(kernel);
        self
    }

    /// Session id stamped on every outgoing header.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send `kernel_info_request` until the kernel replies on the command
    /// channel and at least one notification gets through the subscription,
    /// then discard whatever notifications the probes caused.
    async fn wait_for_ready(&mut self, deadline: Instant, ready_timeout: Duration) -> Result<()> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let probe = KernelRequest::kernel_info();
            self.send_request(&probe).await?;

            let replied = self.await_kernel_info(&probe.msg_id, deadline).await?;
            let subscribed = self
                .receive_from(Channel::Notification, READY_NOTIFICATION_POLL)
                .await?
                .is_some();
            trace!("readiness probe {attempt}: replied={replied} subscribed={subscribed}");

            if replied && subscribed {
                break;
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout(ready_timeout).into());
            }
        }

        let mut flushed = 0;
        while flushed < FLUSH_LIMIT
            && self
                .receive_from(Channel::Notification, FLUSH_POLL)
                .await?
                .is_some()
        {
            flushed += 1;
        }
        debug!("kernel ready after {attempt} probe(s), flushed {flushed} notification(s)");
        Ok(())
    }

    async fn await_kernel_info(&mut self, msg_id: &str, deadline: Instant) -> Result<bool> {
        let until = (Instant::now() + READY_REPLY_POLL).min(deadline);
        loop {
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            let Some(message) = self.receive_from(Channel::Command, remaining).await? else {
                return Ok(false);
            };
            if message.msg_type() == "kernel_info_reply" && message.parent_msg_id() == Some(msg_id)
            {
                return Ok(true);
            }
            trace!("ignoring {} while waiting for kernel_info_reply", message.msg_type());
        }
    }

    async fn send_request(&mut self, request: &KernelRequest) -> Result<()> {
        let header = Header::new(&request.msg_id, &self.session_id, &request.msg_type);
        let frames = WireMessage::new(header, request.content.clone()).into_frames(&self.signer)?;
        let message = ZmqMessage::try_from(frames).map_err(|e| DecodeError::Frame {
            message: e.to_string(),
        })?;

        let shell = self.shell.as_mut().ok_or(TransportError::Closed)?;
        tokio::time::timeout(self.send_timeout, shell.send(message))
            .await
            .map_err(|_| TransportError::Timeout(self.send_timeout))?
            .map_err(TransportError::Zmq)?;
        trace!("sent {} {}", request.msg_type, request.msg_id);
        Ok(())
    }

    fn decode(&mut self, channel: Channel, received: ZmqResult<ZmqMessage>) -> Result<Message> {
        let frames = received.map_err(TransportError::Zmq)?.into_vec();
        let wire = WireMessage::from_frames(frames, &self.signer)?;
        self.sequence += 1;
        let message = Message::from_wire(channel, wire, self.sequence);
        trace!(
            "received {} on {} channel (#{})",
            message.msg_type(),
            channel,
            message.sequence
        );
        Ok(message)
    }
}

async fn connect_until<S: Socket>(
    socket: &mut S,
    endpoint: &str,
    deadline: Instant,
    ready_timeout: Duration,
) -> Result<()> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, socket.connect(endpoint)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) if Instant::now() + CONNECT_RETRY < deadline => {
                trace!("connect to {endpoint} failed ({e}); retrying");
                tokio::time::sleep(CONNECT_RETRY).await;
            }
            Ok(Err(e)) => {
                debug!("giving up on {endpoint}: {e}");
                return Err(TransportError::Timeout(ready_timeout).into());
            }
            Err(_) => {
                debug!("no answer from {endpoint} within {ready_timeout:?}");
                return Err(TransportError::Timeout(ready_timeout).into());
            }
        }
    }
}

impl Transport for ChannelTransport {
    type Config = KernelConfig;
    type Outbound = KernelRequest;
    type Inbound = Message;

    async fn connect(config: KernelConfig) -> Result<Self> {
        ChannelTransport::connect(config).await
    }

    async fn send(&mut self, request: &KernelRequest) -> Result<()> {
        self.send_request(request).await
    }

    /// Next message from either channel, preferring the command channel.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let (Some(shell), Some(iopub)) = (self.shell.as_mut(), self.iopub.as_mut()) else {
            return Err(TransportError::Closed.into());
        };
        let received = tokio::time::timeout(timeout, async {
            tokio::select! {
                biased;
                received = shell.recv() => (Channel::Command, received),
                received = iopub.recv() => (Channel::Notification, received),
            }
        })
        .await;

        match received {
            Err(_) => Ok(None),
            Ok((channel, received)) => self.decode(channel, received).map(Some),
        }
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(shell) = self.shell.take() {
            for e in shell.close().await {
                debug!("closing command channel: {e}");
            }
        }
        if let Some(iopub) = self.iopub.take() {
            for e in iopub.close().await {
                debug!("closing notification channel: {e}");
            }
        }
        if let Some(kernel) = self.kernel.take() {
            kernel.stop().await?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shell.is_some() && self.iopub.is_some()
    }
}

impl KernelTransport for ChannelTransport {
    async fn receive_from(&mut self, channel: Channel, timeout: Duration) -> Result<Option<Message>> {
        let received = match channel {
            Channel::Command => {
                let shell = self.shell.as_mut().ok_or(TransportError::Closed)?;
                tokio::time::timeout(timeout, shell.recv()).await
            }
            Channel::Notification => {
                let iopub = self.iopub.as_mut().ok_or(TransportError::Closed)?;
                tokio::time::timeout(timeout, iopub.recv()).await
            }
        };

        match received {
            Err(_) => Ok(None),
            Ok(received) => self.decode(channel, received).map(Some),
        }
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        if self.is_open() {
            warn!(
                "ChannelTransport for session {} dropped without shutdown()",
                self.session_id
            );
        }
    }
}
