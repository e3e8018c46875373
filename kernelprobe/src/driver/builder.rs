//! Builder for creating execution sessions.

use std::path::Path;
use std::time::Duration;

use super::session::{ExecutionSession, SessionConfig};
use crate::error::{Result, TransportError};
use crate::transport::{
    ChannelTransport, ConnectionInfo, KernelConfig, KernelLauncher, KernelTransport,
};

/// Builder for constructing execution sessions.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use kernelprobe::driver::SessionBuilder;
///
/// # async fn example() -> Result<(), kernelprobe::Error> {
/// let mut session = SessionBuilder::new()
///     .reply_timeout(Duration::from_secs(2))
///     .max_polls(50)
///     .connect_file("kernel.json")
///     .await?;
/// # session.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    session: SessionConfig,
    send_timeout: Duration,
    ready_timeout: Duration,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self {
            session: SessionConfig::default(),
            send_timeout: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(10),
        }
    }

    /// How long to wait for each command-channel reply (default: 5s).
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.session.reply_timeout = timeout;
        self
    }

    /// Bound on each notification receive (default: 100ms).
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.session.poll_timeout = timeout;
        self
    }

    /// Maximum notification receives per request (default: 100).
    pub fn max_polls(mut self, max_polls: u32) -> Self {
        self.session.max_polls = max_polls;
        self
    }

    /// Bound on a single command-channel send (default: 1s).
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Bound on the readiness handshake (default: 10s).
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    fn session_config(&self) -> Result<SessionConfig> {
        if self.session.max_polls == 0 {
            return Err(TransportError::InvalidConfig {
                message: "max_polls must be at least 1".to_string(),
            }
            .into());
        }
        if self.session.poll_timeout.is_zero() {
            return Err(TransportError::InvalidConfig {
                message: "poll_timeout must be non-zero".to_string(),
            }
            .into());
        }
        Ok(self.session)
    }

    /// Connect to a running kernel.
    pub async fn connect(
        self,
        connection: ConnectionInfo,
    ) -> Result<ExecutionSession<ChannelTransport>> {
        let session = self.session_config()?;
        let config = KernelConfig {
            connection,
            send_timeout: self.send_timeout,
            ready_timeout: self.ready_timeout,
        };
        let transport = ChannelTransport::connect(config).await?;
        Ok(ExecutionSession::new(transport, session))
    }

    /// Connect to a running kernel described by a connection file.
    pub async fn connect_file(
        self,
        path: impl AsRef<Path>,
    ) -> Result<ExecutionSession<ChannelTransport>> {
        let connection = ConnectionInfo::from_file(path)?;
        self.connect(connection).await
    }

    /// Start a kernel program and connect to it. The session's `shutdown()`
    /// stops the program.
    pub async fn launch(
        self,
        launcher: KernelLauncher,
    ) -> Result<ExecutionSession<ChannelTransport>> {
        let session = self.session_config()?;
        let transport = launcher
            .send_timeout(self.send_timeout)
            .ready_timeout(self.ready_timeout)
            .launch()
            .await?;
        Ok(ExecutionSession::new(transport, session))
    }

    /// Wrap an already-connected transport.
    pub fn with_transport<T: KernelTransport>(self, transport: T) -> Result<ExecutionSession<T>> {
        Ok(ExecutionSession::new(transport, self.session_config()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::ScriptedKernel;
    use crate::error::Error;

    #[test]
    fn test_defaults() {
        let session = SessionBuilder::new()
            .with_transport(ScriptedKernel::well_behaved())
            .unwrap();
        assert_eq!(*session.config(), SessionConfig::default());
        assert_eq!(session.config().reply_timeout, Duration::from_secs(5));
        assert_eq!(session.config().poll_timeout, Duration::from_millis(100));
        assert_eq!(session.config().max_polls, 100);
    }

    #[test]
    fn test_setters() {
        let session = SessionBuilder::new()
            .reply_timeout(Duration::from_secs(1))
            .poll_timeout(Duration::from_millis(5))
            .max_polls(7)
            .with_transport(ScriptedKernel::well_behaved())
            .unwrap();
        assert_eq!(session.config().max_polls, 7);
        assert_eq!(session.config().poll_timeout, Duration::from_millis(5));
    }

    #[test]
    fn test_zero_polls_rejected() {
        let err = SessionBuilder::new()
            .max_polls(0)
            .with_transport(ScriptedKernel::well_behaved())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Transport(TransportError::InvalidConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_connection_file() {
        let err = SessionBuilder::new()
            .connect_file("/nonexistent/kernel.json")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Transport(TransportError::Io(_))));
    }
}
