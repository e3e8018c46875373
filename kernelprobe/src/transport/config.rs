//! Transport configuration.

use std::ffi::OsString;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};

use crate::error::{DecodeError, Result, TransportError};

/// The only signature scheme the wire codec implements.
pub const SIGNATURE_SCHEME: &str = "hmac-sha256";

/// Jupyter connection file contents.
#[derive(Debug, Deserialize)]
pub struct ConnectionInfo {
    pub ip: String,

    /// ZeroMQ transport, normally `tcp`.
    pub transport: String,

    pub shell_port: u16,

    pub iopub_port: u16,

    #[serde(default)]
    pub stdin_port: u16,

    #[serde(default)]
    pub control_port: u16,

    #[serde(default)]
    pub hb_port: u16,

    /// HMAC key. Empty disables signing.
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub key: SecretString,

    #[serde(default = "default_signature_scheme")]
    pub signature_scheme: String,

    #[serde(default)]
    pub kernel_name: Option<String>,
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn default_signature_scheme() -> String {
    SIGNATURE_SCHEME.to_string()
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

impl ConnectionInfo {
    /// Read a connection file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read(path.as_ref()).map_err(TransportError::Io)?;
        let info: Self = serde_json::from_slice(&raw).map_err(DecodeError::from)?;
        info.validate()?;
        Ok(info)
    }

    /// Connection info on 127.0.0.1 with freshly allocated ports.
    pub fn loopback(key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            ip: "127.0.0.1".to_string(),
            transport: "tcp".to_string(),
            shell_port: free_port()?,
            iopub_port: free_port()?,
            stdin_port: free_port()?,
            control_port: free_port()?,
            hb_port: free_port()?,
            key: SecretString::from(key.into()),
            signature_scheme: SIGNATURE_SCHEME.to_string(),
            kernel_name: None,
        })
    }

    /// Reject configurations the transport cannot speak.
    pub fn validate(&self) -> Result<()> {
        if self.signature_scheme != SIGNATURE_SCHEME {
            return Err(TransportError::InvalidConfig {
                message: format!("unsupported signature scheme '{}'", self.signature_scheme),
            }
            .into());
        }
        if self.shell_port == 0 || self.iopub_port == 0 {
            return Err(TransportError::InvalidConfig {
                message: "shell_port and iopub_port are required".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// ZeroMQ endpoint for a port on this connection.
    pub fn endpoint(&self, port: u16) -> String {
        format!("{}://{}:{}", self.transport, self.ip, port)
    }

    pub fn shell_endpoint(&self) -> String {
        self.endpoint(self.shell_port)
    }

    pub fn iopub_endpoint(&self) -> String {
        self.endpoint(self.iopub_port)
    }

    /// The connection file JSON, key included.
    pub fn to_json(&self) -> Value {
        json!({
            "ip": self.ip,
            "transport": self.transport,
            "shell_port": self.shell_port,
            "iopub_port": self.iopub_port,
            "stdin_port": self.stdin_port,
            "control_port": self.control_port,
            "hb_port": self.hb_port,
            "key": self.key.expose_secret(),
            "signature_scheme": self.signature_scheme,
            "kernel_name": self.kernel_name,
        })
    }
}

/// Ask the OS for an unused TCP port on the loopback interface.
pub fn free_port() -> Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).map_err(TransportError::Io)?;
    let port = listener.local_addr().map_err(TransportError::Io)?.port();
    Ok(port)
}

/// Configuration for connecting to a kernel.
#[derive(Debug)]
pub struct KernelConfig {
    pub connection: ConnectionInfo,

    /// Bound on a single command-channel send.
    pub send_timeout: Duration,

    /// Bound on the readiness handshake after connecting.
    pub ready_timeout: Duration,
}

impl KernelConfig {
    pub fn new(connection: ConnectionInfo) -> Self {
        Self {
            connection,
            send_timeout: Duration::from_secs(1),
            ready_timeout: Duration::from_secs(10),
        }
    }
}

/// Program to spawn, with its arguments and working directory.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
}

impl ProcessConfig {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Program name for logs and errors.
    pub fn display_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }
}
