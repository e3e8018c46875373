//! # kernelprobe
//!
//! Async harness for driving an interactive SQL engine from tests.
//!
//! The engine can be reached two ways:
//!
//! - as a subprocess, feeding stdin and capturing stdout/stderr
//!   ([`ProcessTransport`], [`CliRunner`]);
//! - as a Jupyter kernel, over a command channel and a notification channel
//!   ([`ChannelTransport`], [`ExecutionSession`]).
//!
//! Sessions check the notification protocol as they collect output: each
//! request must produce exactly one reply, one `busy`, at most one matching
//! echo of the input, and one final `idle`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use kernelprobe::{KernelLauncher, SessionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), kernelprobe::Error> {
//!     let launcher = KernelLauncher::new("target/debug/sql-engine")
//!         .args(["jupyter", "up", "--connection", "{connection_file}"]);
//!     let mut session = SessionBuilder::new().launch(launcher).await?;
//!
//!     let execution = session.run("select 1 + 1").await?;
//!     println!("{:?}", execution.text());
//!
//!     session.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod driver;
pub mod error;
pub mod normalize;
pub mod transport;

// Re-export main types for convenience
pub use channel::{ExecuteRequest, MessageKind, classify};
pub use driver::{
    CliInvocation, CliRunner, Execution, ExecutionSession, OutputBatch, SessionBuilder,
    SessionConfig,
};
pub use error::Error;
pub use transport::{
    ChannelTransport, CliOutput, ConnectionInfo, KernelLauncher, KernelTransport,
    ProcessTransport, Transport,
};
