//! Subprocess transport.
//!
//! stdout and stderr go to anonymous temporary files rather than pipes, so a
//! chatty program never blocks on a full pipe while the driver is busy
//! writing its stdin, and output survives a forced kill.

use std::fs::File;
use std::io::{self, SeekFrom};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};

use super::Transport;
use super::config::ProcessConfig;
use crate::error::{DecodeError, ProcessError, Result, TransportError};
use crate::normalize;

/// Observable lifecycle phase of a [`ProcessTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessPhase {
    Running,
    Exited,
    Killed,
}

enum ProcessState {
    Running {
        child: Child,
        stdin: Option<ChildStdin>,
    },
    Exited {
        status: ExitStatus,
    },
    Killed {
        status: ExitStatus,
    },
}

/// How a process stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, `None` when ended by a signal.
    pub code: Option<i32>,

    /// Whether the driver force-terminated the process.
    pub killed: bool,
}

impl ProcessExit {
    fn from_status(status: ExitStatus, killed: bool) -> Self {
        Self {
            code: status.code(),
            killed,
        }
    }

    /// A killed process is never successful, whatever status it reported.
    pub fn success(&self) -> bool {
        !self.killed && self.code == Some(0)
    }
}

struct Capture {
    stdout: File,
    stderr: File,
}

impl Capture {
    fn new() -> io::Result<Self> {
        Ok(Self {
            stdout: tempfile::tempfile()?,
            stderr: tempfile::tempfile()?,
        })
    }

    async fn read(file: File) -> io::Result<Vec<u8>> {
        let mut file = tokio::fs::File::from_std(file);
        file.seek(SeekFrom::Start(0)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

/// A spawned program driven over its standard streams.
///
/// # Example
///
/// ```rust,no_run
/// use kernelprobe::transport::{ProcessConfig, ProcessTransport};
///
/// # async fn example() -> Result<(), kernelprobe::Error> {
/// let mut process = ProcessTransport::spawn(ProcessConfig::new("sqlite3"))?;
/// process.communicate([b".timer off\nselect 1 + 1;\n"]).await?;
/// process.terminate(true).await?;
/// let result = process.collect().await?;
/// assert!(!result.success);
/// # Ok(())
/// # }
/// ```
pub struct ProcessTransport {
    program: String,
    state: ProcessState,
    capture: Option<Capture>,
}

impl ProcessTransport {
    /// Start the program with piped stdin and captured stdout/stderr.
    pub fn spawn(config: ProcessConfig) -> Result<Self> {
        let program = config.display_name();
        let capture = Capture::new().map_err(ProcessError::Io)?;

        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(capture.stdout.try_clone().map_err(ProcessError::Io)?))
            .stderr(Stdio::from(capture.stderr.try_clone().map_err(ProcessError::Io)?))
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let stdin = child.stdin.take();
        debug!("spawned {:?} (pid {:?})", program, child.id());

        Ok(Self {
            program,
            state: ProcessState::Running { child, stdin },
            capture: Some(capture),
        })
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ProcessPhase {
        match self.state {
            ProcessState::Running { .. } => ProcessPhase::Running,
            ProcessState::Exited { .. } => ProcessPhase::Exited,
            ProcessState::Killed { .. } => ProcessPhase::Killed,
        }
    }

    /// How the process stopped, if it has.
    pub fn exit(&self) -> Option<ProcessExit> {
        match self.state {
            ProcessState::Running { .. } => None,
            ProcessState::Exited { status } => Some(ProcessExit::from_status(status, false)),
            ProcessState::Killed { status } => Some(ProcessExit::from_status(status, true)),
        }
    }

    /// Write each buffer to stdin in order. Does not wait for exit.
    ///
    /// A program that exits before reading all of its input closes the pipe;
    /// that is treated as end of input rather than an error.
    pub async fn communicate<I, B>(&mut self, buffers: I) -> Result<()>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let ProcessState::Running { stdin, .. } = &mut self.state else {
            return Err(TransportError::Closed.into());
        };
        let Some(pipe) = stdin.as_mut() else {
            return Err(TransportError::Closed.into());
        };

        for buffer in buffers {
            let buffer = buffer.as_ref();
            let written = match pipe.write_all(buffer).await {
                Ok(()) => pipe.flush().await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => trace!("wrote {} bytes to {:?}", buffer.len(), self.program),
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("{:?} closed its stdin early", self.program);
                    *stdin = None;
                    return Ok(());
                }
                Err(e) => return Err(ProcessError::Io(e).into()),
            }
        }
        Ok(())
    }

    /// Close stdin so the program sees end of input.
    pub fn close_stdin(&mut self) {
        if let ProcessState::Running { stdin, .. } = &mut self.state {
            stdin.take();
        }
    }

    /// Wait up to `timeout` for the program to exit on its own.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<ProcessExit>> {
        if let ProcessState::Running { child, .. } = &mut self.state {
            let status = match tokio::time::timeout(timeout, child.wait()).await {
                Err(_) => return Ok(None),
                Ok(status) => status.map_err(ProcessError::Io)?,
            };
            self.state = ProcessState::Exited { status };
        }
        Ok(self.exit())
    }

    /// Stop the program.
    ///
    /// With `force`, the program is killed immediately unless it has already
    /// exited. Without it, stdin is closed and the call blocks until the
    /// program exits on its own. Either way the child is reaped.
    pub async fn terminate(&mut self, force: bool) -> Result<ProcessExit> {
        let ProcessState::Running { child, stdin } = &mut self.state else {
            return self.exit().ok_or_else(|| ProcessError::StillRunning.into());
        };

        if !force {
            stdin.take();
            let status = child.wait().await.map_err(ProcessError::Io)?;
            self.state = ProcessState::Exited { status };
        } else if let Some(status) = child.try_wait().map_err(ProcessError::Io)? {
            self.state = ProcessState::Exited { status };
        } else {
            // Kill before closing stdin, or the program may exit on EOF first.
            if let Err(e) = child.start_kill() {
                debug!("kill of {:?} failed: {}", self.program, e);
            }
            stdin.take();
            let status = child.wait().await.map_err(ProcessError::Io)?;
            debug!("killed {:?} ({})", self.program, status);
            self.state = ProcessState::Killed { status };
        }

        self.exit().ok_or_else(|| ProcessError::StillRunning.into())
    }

    /// Read everything the stopped program wrote.
    pub async fn collect(mut self) -> Result<ProcessResult> {
        let exit = self.exit().ok_or(ProcessError::StillRunning)?;
        let capture = self.capture.take().ok_or(ProcessError::StillRunning)?;

        let stdout = Capture::read(capture.stdout).await.map_err(ProcessError::Io)?;
        let stderr = Capture::read(capture.stderr).await.map_err(ProcessError::Io)?;
        debug!(
            "{:?} finished: code={:?} killed={} stdout={}B stderr={}B",
            self.program,
            exit.code,
            exit.killed,
            stdout.len(),
            stderr.len()
        );

        Ok(ProcessResult {
            stdout,
            stderr,
            success: exit.success(),
            exit_code: exit.code,
            killed: exit.killed,
        })
    }
}

impl Drop for ProcessTransport {
    fn drop(&mut self) {
        if let ProcessState::Running { child, .. } = &mut self.state {
            warn!("{:?} dropped while running; killing it", self.program);
            let _ = child.start_kill();
        }
    }
}

impl Transport for ProcessTransport {
    type Config = ProcessConfig;
    type Outbound = [u8];
    type Inbound = ProcessExit;

    async fn connect(config: ProcessConfig) -> Result<Self> {
        Self::spawn(config)
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.communicate([data]).await
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<ProcessExit>> {
        self.wait_timeout(timeout).await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.terminate(true).await.map(|_| ())
    }

    fn is_open(&self) -> bool {
        self.phase() == ProcessPhase::Running
    }
}

/// Everything a finished program wrote, and whether it succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub killed: bool,
}

impl ProcessResult {
    /// Decode both streams as UTF-8, optionally stripping terminal escapes.
    pub fn decode(self, strip_control_sequences: bool) -> Result<CliOutput> {
        let decode = |stream: &'static str, bytes: Vec<u8>| -> Result<String> {
            let text = String::from_utf8(bytes)
                .map_err(|source| DecodeError::Utf8 { stream, source })?;
            Ok(if strip_control_sequences {
                normalize::strip_control_sequences(&text).into_owned()
            } else {
                text
            })
        };

        Ok(CliOutput {
            stdout: decode("stdout", self.stdout)?,
            stderr: decode("stderr", self.stderr)?,
            success: self.success,
            exit_code: self.exit_code,
        })
    }
}

/// Decoded output of a finished program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: Option<i32>,
}

impl CliOutput {
    /// Replace version strings in both streams with the fixed placeholder.
    pub fn redacted(self) -> Self {
        Self {
            stdout: normalize::redact_version(&self.stdout).into_owned(),
            stderr: normalize::redact_version(&self.stderr).into_owned(),
            ..self
        }
    }

    /// Fail unless the program exited with status 0.
    pub fn require_success(self) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(ProcessError::Unsuccessful {
                code: self.exit_code,
                stderr: self.stderr,
            }
            .into())
        }
    }
}
