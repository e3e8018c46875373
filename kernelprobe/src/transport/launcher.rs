//! Starting a kernel program for a session.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, warn};
use tempfile::TempDir;
use uuid::Uuid;

use super::config::{ConnectionInfo, KernelConfig, ProcessConfig};
use super::kernel::ChannelTransport;
use super::process::{ProcessExit, ProcessTransport};
use crate::error::{DecodeError, Error, ProcessError, Result, TransportError};

/// Argument text replaced with the path of the generated connection file.
pub const CONNECTION_FILE_PLACEHOLDER: &str = "{connection_file}";

const CONNECTION_FILE_NAME: &str = "kernel.json";

/// Starts a kernel program on loopback ports and connects to it.
///
/// # Example
///
/// ```rust,no_run
/// use kernelprobe::transport::KernelLauncher;
///
/// # async fn example() -> Result<(), kernelprobe::Error> {
/// let transport = KernelLauncher::new("target/debug/sql-engine")
///     .args(["jupyter", "up", "--connection", "{connection_file}"])
///     .launch()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct KernelLauncher {
    program: OsString,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    send_timeout: Duration,
    ready_timeout: Duration,
}

impl KernelLauncher {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            send_timeout: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(10),
        }
    }

    /// Add an argument. [`CONNECTION_FILE_PLACEHOLDER`] is substituted.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    fn process_config(&self, connection_file: &str) -> ProcessConfig {
        let args = self
            .args
            .iter()
            .map(|arg| arg.replace(CONNECTION_FILE_PLACEHOLDER, connection_file));
        let config = ProcessConfig::new(self.program.clone()).args(args);
        match &self.cwd {
            Some(cwd) => config.cwd(cwd),
            None => config,
        }
    }

    /// Write a connection file, start the program, and connect to it.
    ///
    /// The returned transport owns the kernel process; `shutdown()` stops it.
    pub async fn launch(self) -> Result<ChannelTransport> {
        if !self.args.iter().any(|arg| arg.contains(CONNECTION_FILE_PLACEHOLDER)) {
            return Err(TransportError::InvalidConfig {
                message: format!("no argument contains {CONNECTION_FILE_PLACEHOLDER}"),
            }
            .into());
        }

        let dir = tempfile::tempdir().map_err(TransportError::Io)?;
        let connection = ConnectionInfo::loopback(Uuid::new_v4().to_string())?;
        let path = dir.path().join(CONNECTION_FILE_NAME);
        let contents = serde_json::to_vec_pretty(&connection.to_json()).map_err(DecodeError::from)?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(TransportError::Io)?;

        let process = ProcessTransport::spawn(self.process_config(&path.to_string_lossy()))?;
        debug!("launched kernel with connection file {}", path.display());

        let config = KernelConfig {
            connection,
            send_timeout: self.send_timeout,
            ready_timeout: self.ready_timeout,
        };
        let mut kernel = KernelProcess { process, _dir: dir };
        let connected = tokio::select! {
            connected = ChannelTransport::connect(config) => connected,
            exited = kernel.wait_exit() => return Err(kernel.exited_early(exited?).await),
        };
        match connected {
            Ok(transport) => Ok(transport.with_kernel(kernel)),
            Err(e) => {
                kernel.stop().await?;
                Err(e)
            }
        }
    }
}

/// A launched kernel and the directory holding its connection file.
pub(crate) struct KernelProcess {
    process: ProcessTransport,
    _dir: TempDir,
}

impl KernelProcess {
    /// Resolves once the program exits on its own.
    async fn wait_exit(&mut self) -> Result<ProcessExit> {
        loop {
            if let Some(exit) = self.process.wait_timeout(Duration::MAX).await? {
                return Ok(exit);
            }
        }
    }

    /// The error for a kernel that exited before it became ready.
    async fn exited_early(self, exit: ProcessExit) -> Error {
        let result = match self.process.collect().await {
            Ok(result) => result,
            Err(e) => return e,
        };
        let stderr = String::from_utf8_lossy(&result.stderr).trim_end().to_string();
        debug!("kernel exited during startup ({:?}): {stderr}", exit.code);
        ProcessError::Unsuccessful {
            code: exit.code,
            stderr,
        }
        .into()
    }

    /// Kill the kernel and log anything it wrote to stderr.
    pub(crate) async fn stop(mut self) -> Result<()> {
        let exit = self.process.terminate(true).await?;
        let result = self.process.collect().await?;
        if !result.stderr.is_empty() {
            warn!(
                "kernel stderr ({:?}): {}",
                exit.code,
                String::from_utf8_lossy(&result.stderr).trim_end()
            );
        }
        Ok(())
    }
}
