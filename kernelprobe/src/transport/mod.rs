//! Transport layer.
//!
//! Two ways of reaching the driven program:
//!
//! - [`ProcessTransport`] spawns it and talks over stdin/stdout/stderr.
//! - [`ChannelTransport`] connects to it running as a kernel, over a command
//!   channel and a notification channel.
//!
//! Both implement [`Transport`]. Execution sessions are written against
//! [`KernelTransport`] and never name a concrete transport.

pub mod config;
mod kernel;
mod launcher;
mod process;

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

pub use config::{ConnectionInfo, KernelConfig, ProcessConfig, free_port};
pub use kernel::ChannelTransport;
pub use launcher::{CONNECTION_FILE_PLACEHOLDER, KernelLauncher};
pub use process::{CliOutput, ProcessExit, ProcessPhase, ProcessResult, ProcessTransport};

use crate::channel::{Channel, KernelRequest, Message};
use crate::error::Result;

/// Longest wait a deadline can express; larger bounds are clamped to it.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The instant `bound` from now. Bounds too large to represent, such as
/// `Duration::MAX`, are clamped so an effectively unbounded wait never
/// overflows.
pub(crate) fn deadline_after(bound: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(bound).unwrap_or(now + FAR_FUTURE)
}

/// The capability set shared by every transport.
pub trait Transport: Send {
    /// What `connect` needs.
    type Config: Send;

    /// What `send` writes.
    type Outbound: ?Sized + Sync;

    /// What `receive` yields.
    type Inbound: Send;

    /// Establish the transport.
    fn connect(config: Self::Config) -> impl Future<Output = Result<Self>> + Send
    where
        Self: Sized;

    /// Write one outbound item.
    fn send(&mut self, data: &Self::Outbound) -> impl Future<Output = Result<()>> + Send;

    /// Wait up to `timeout` for the next inbound item. `Ok(None)` means
    /// nothing arrived in time.
    fn receive(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Self::Inbound>>> + Send;

    /// Release everything the transport holds. Calling it again is a no-op.
    fn shutdown(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Whether the transport can still send.
    fn is_open(&self) -> bool;
}

/// A transport to a kernel, with one receive per channel.
pub trait KernelTransport: Transport<Outbound = KernelRequest, Inbound = Message> {
    /// Wait up to `timeout` for the next message on `channel` only.
    fn receive_from(
        &mut self,
        channel: Channel,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Message>>> + Send;
}
