//! Running the engine as a command-line program.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use log::debug;

use crate::error::Result;
use crate::transport::{CliOutput, ProcessConfig, ProcessTransport};

/// Runs one program with varying arguments.
///
/// # Example
///
/// ```rust,no_run
/// use kernelprobe::driver::CliRunner;
///
/// # async fn example() -> Result<(), kernelprobe::Error> {
/// let cli = CliRunner::new("target/debug/sql-engine");
///
/// let version = cli.command(["--version"]).redact().run().await?;
/// assert_eq!(version.stdout.trim(), "sql-engine VERSION");
///
/// let repl = cli
///     .command(Vec::<String>::new())
///     .communicate(".timer off\nselect 1 + 1;\n")
///     .kill()
///     .run()
///     .await?;
/// assert!(!repl.success);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CliRunner {
    program: OsString,
    cwd: Option<PathBuf>,
    settle: Duration,
}

impl CliRunner {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            cwd: None,
            settle: Duration::from_millis(500),
        }
    }

    /// Default working directory for every invocation.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Default grace period before a kill (see [`CliInvocation::kill`]).
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Start describing one invocation.
    pub fn command<I, S>(&self, args: I) -> CliInvocation
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut config = ProcessConfig::new(self.program.clone()).args(args);
        config.cwd = self.cwd.clone();
        CliInvocation {
            config,
            input: Vec::new(),
            kill: false,
            settle: self.settle,
            strip: true,
            redact: false,
        }
    }
}

/// One run of the program.
///
/// By default stdin is closed after any input is written and the run waits
/// for the program to exit; terminal escapes are stripped from the output.
#[derive(Debug, Clone)]
#[must_use = "an invocation does nothing until run() is awaited"]
pub struct CliInvocation {
    config: ProcessConfig,
    input: Vec<Vec<u8>>,
    kill: bool,
    settle: Duration,
    strip: bool,
    redact: bool,
}

impl CliInvocation {
    /// Write `input` to stdin. Multiple calls are written in order.
    pub fn communicate(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input.push(input.into());
        self
    }

    /// Kill the program instead of waiting for it, once it has had the
    /// settle period to finish. Used for interactive modes that never exit
    /// on their own. A killed run is never successful.
    pub fn kill(mut self) -> Self {
        self.kill = true;
        self
    }

    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Keep terminal escape sequences in the output.
    pub fn raw(mut self) -> Self {
        self.strip = false;
        self
    }

    /// Replace version strings in the output with a placeholder.
    pub fn redact(mut self) -> Self {
        self.redact = true;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.config.cwd = Some(cwd.into());
        self
    }

    /// Spawn, feed input, stop, and decode.
    pub async fn run(self) -> Result<CliOutput> {
        let mut process = ProcessTransport::spawn(self.config)?;
        if !self.input.is_empty() {
            process.communicate(&self.input).await?;
        }
        process.close_stdin();

        if self.kill {
            match process.wait_timeout(self.settle).await? {
                Some(exit) => debug!("exited within settle period: {exit:?}"),
                None => {
                    process.terminate(true).await?;
                }
            }
        } else {
            process.terminate(false).await?;
        }

        let output = process.collect().await?.decode(self.strip)?;
        Ok(if self.redact { output.redacted() } else { output })
    }
}
