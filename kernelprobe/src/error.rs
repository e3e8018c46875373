//! Error types for kernelprobe.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for kernelprobe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Socket and connection level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Kernel messaging protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Driven subprocess errors
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    /// Captured bytes or frames that could not be decoded
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Whether this error is a protocol-level timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Protocol(ProtocolError::Timeout { .. })
                | Error::Transport(TransportError::Timeout(_))
        )
    }
}

/// Transport layer errors (sockets, connection setup).
#[derive(Error, Debug)]
pub enum TransportError {
    /// ZeroMQ socket error
    #[error("ZeroMQ error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Channel was closed by `shutdown()` or by the peer
    #[error("Channel closed")]
    Closed,

    /// Invalid transport configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Kernel protocol errors raised while driving an execution cycle.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// No reply, or no terminal idle status, within the bound
    #[error("Timed out after {after:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: &'static str,
        after: Duration,
    },

    /// Notification ordering broken or a message arrived in the wrong state
    #[error("Protocol violation: {message}")]
    Violation { message: String },

    /// Echoed code differs from the code that was sent
    #[error("Echoed input {actual:?} does not match request {expected:?}")]
    Inconsistent { expected: String, actual: String },
}

impl ProtocolError {
    pub(crate) fn violation(message: impl Into<String>) -> Self {
        ProtocolError::Violation {
            message: message.into(),
        }
    }
}

/// Subprocess errors.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The program could not be started
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Output was requested before the process stopped
    #[error("Process is still running")]
    StillRunning,

    /// The process exited unsuccessfully where success was required
    #[error("Process exited unsuccessfully (code {code:?}): {stderr}")]
    Unsuccessful { code: Option<i32>, stderr: String },

    /// I/O error on a process stream
    #[error("Process I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Decoding errors for captured output and wire frames.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Captured bytes are not valid UTF-8
    #[error("{stream} is not valid UTF-8: {source}")]
    Utf8 {
        stream: &'static str,
        #[source]
        source: std::string::FromUtf8Error,
    },

    /// A JSON frame could not be parsed or built
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A multipart message is malformed
    #[error("Malformed frame: {message}")]
    Frame { message: String },
}

/// Result type alias using kernelprobe's Error.
pub type Result<T> = std::result::Result<T, Error>;
