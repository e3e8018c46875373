//! High-level drivers for the engine under test.
//!
//! [`ExecutionSession`] runs requests against a kernel and checks the
//! notification protocol as it goes. [`CliRunner`] runs the engine as a plain
//! command-line program.

mod batch;
mod builder;
mod cli;
mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{OutputBatch, OutputItem};
pub use builder::SessionBuilder;
pub use cli::{CliInvocation, CliRunner};
pub use session::{Execution, ExecutionSession, SessionConfig, SessionState};
