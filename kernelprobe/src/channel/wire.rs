//! Jupyter wire framing.
//!
//! A kernel message travels as a ZeroMQ multipart message:
//!
//! ```text
//! [identities...] <IDS|MSG> signature header parent_header metadata content [buffers...]
//! ```
//!
//! The signature is a hex HMAC-SHA256 over the four JSON frames, or empty
//! when the connection has no key.

use std::fmt::Write as _;

use bytes::Bytes;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use crate::error::{DecodeError, ProtocolError, Result};

/// Frame separating routing identities from the signed message.
pub const DELIMITER: &[u8] = b"<IDS|MSG>";

/// Messaging protocol version stamped on outgoing headers.
pub const PROTOCOL_VERSION: &str = "5.3";

const USERNAME: &str = "kernelprobe";

type HmacSha256 = Hmac<Sha256>;

/// Message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub date: String,
    pub msg_type: String,
    #[serde(default)]
    pub version: String,
}

impl Header {
    /// Create a header stamped with the current time.
    pub fn new(
        msg_id: impl Into<String>,
        session: impl Into<String>,
        msg_type: impl Into<String>,
    ) -> Self {
        Self {
            msg_id: msg_id.into(),
            session: session.into(),
            username: USERNAME.to_string(),
            date: chrono::Utc::now().to_rfc3339(),
            msg_type: msg_type.into(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

/// HMAC signer for one connection key.
pub struct Signer {
    key: Option<SecretString>,
}

impl Signer {
    /// Create a signer. An empty key disables signing.
    pub fn new(key: &str) -> Self {
        if key.is_empty() {
            Self::unsigned()
        } else {
            Self {
                key: Some(SecretString::from(key.to_owned())),
            }
        }
    }

    /// A signer that produces empty signatures and accepts anything.
    pub fn unsigned() -> Self {
        Self { key: None }
    }

    /// Whether messages are actually signed.
    pub fn is_signing(&self) -> bool {
        self.key.is_some()
    }

    fn mac(&self, parts: &[&[u8]]) -> Option<HmacSha256> {
        let key = self.key.as_ref()?;
        let mut mac = HmacSha256::new_from_slice(key.expose_secret().as_bytes())
            .expect("HMAC accepts keys of any length");
        for part in parts {
            mac.update(part);
        }
        Some(mac)
    }

    /// Hex signature over `parts`.
    pub fn sign(&self, parts: &[&[u8]]) -> String {
        let Some(mac) = self.mac(parts) else {
            return String::new();
        };
        let digest = mac.finalize().into_bytes();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }

    /// Check a received hex signature in constant time.
    pub fn verify(&self, parts: &[&[u8]], signature: &[u8]) -> bool {
        let Some(mac) = self.mac(parts) else {
            return true;
        };
        match decode_hex(signature) {
            Some(raw) => mac.verify_slice(&raw).is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("signing", &self.is_signing())
            .finish()
    }
}

fn decode_hex(raw: &[u8]) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return None;
    }
    raw.chunks_exact(2)
        .map(|pair| {
            let text = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(text, 16).ok()
        })
        .collect()
}

/// A decoded multipart kernel message.
#[derive(Debug, Clone)]
pub struct WireMessage {
    /// Routing prefix (ROUTER peer ids or a PUB topic).
    pub identities: Vec<Bytes>,
    pub header: Header,
    pub parent_header: Option<Header>,
    pub metadata: Value,
    pub content: Value,
    pub buffers: Vec<Bytes>,
}

impl WireMessage {
    /// Create a message with no parent, identities, or buffers.
    pub fn new(header: Header, content: Value) -> Self {
        Self {
            identities: Vec::new(),
            header,
            parent_header: None,
            metadata: Value::Object(Default::default()),
            content,
            buffers: Vec::new(),
        }
    }

    /// Mark this message as a response to `parent`.
    pub fn with_parent(mut self, parent: &Header) -> Self {
        self.parent_header = Some(parent.clone());
        self
    }

    /// Route this message to the given peers.
    pub fn with_identities(mut self, identities: Vec<Bytes>) -> Self {
        self.identities = identities;
        self
    }

    /// Serialize and sign into multipart frames.
    pub fn into_frames(self, signer: &Signer) -> Result<Vec<Bytes>> {
        let header = serde_json::to_vec(&self.header).map_err(DecodeError::from)?;
        let parent = match &self.parent_header {
            Some(parent) => serde_json::to_vec(parent).map_err(DecodeError::from)?,
            None => b"{}".to_vec(),
        };
        let metadata = serde_json::to_vec(&self.metadata).map_err(DecodeError::from)?;
        let content = serde_json::to_vec(&self.content).map_err(DecodeError::from)?;
        let signature = signer.sign(&[
            header.as_slice(),
            parent.as_slice(),
            metadata.as_slice(),
            content.as_slice(),
        ]);

        let mut frames = self.identities;
        frames.reserve(6 + self.buffers.len());
        frames.push(Bytes::from_static(DELIMITER));
        frames.push(Bytes::from(signature));
        frames.push(Bytes::from(header));
        frames.push(Bytes::from(parent));
        frames.push(Bytes::from(metadata));
        frames.push(Bytes::from(content));
        frames.extend(self.buffers);
        Ok(frames)
    }

    /// Parse and verify multipart frames.
    pub fn from_frames(mut frames: Vec<Bytes>, signer: &Signer) -> Result<Self> {
        let split = frames
            .iter()
            .position(|frame| frame.as_ref() == DELIMITER)
            .ok_or_else(|| DecodeError::Frame {
                message: "missing <IDS|MSG> delimiter".to_string(),
            })?;
        if frames.len() < split + 6 {
            return Err(DecodeError::Frame {
                message: format!(
                    "expected 5 frames after delimiter, got {}",
                    frames.len() - split - 1
                ),
            }
            .into());
        }

        let buffers = frames.split_off(split + 6);
        let signed = frames.split_off(split + 1);
        frames.truncate(split);
        let identities = frames;

        let (signature, header, parent, metadata, content) =
            (&signed[0], &signed[1], &signed[2], &signed[3], &signed[4]);
        if !signer.verify(
            &[header.as_ref(), parent.as_ref(), metadata.as_ref(), content.as_ref()],
            signature,
        ) {
            return Err(ProtocolError::violation("message signature does not match").into());
        }

        let header: Header = serde_json::from_slice(header).map_err(DecodeError::from)?;
        let parent: Value = serde_json::from_slice(parent).map_err(DecodeError::from)?;
        let parent_header = match parent {
            Value::Object(ref map) if map.is_empty() => None,
            Value::Null => None,
            other => Some(serde_json::from_value(other).map_err(DecodeError::from)?),
        };

        Ok(Self {
            identities,
            header,
            parent_header,
            metadata: serde_json::from_slice(metadata).map_err(DecodeError::from)?,
            content: serde_json::from_slice(content).map_err(DecodeError::from)?,
            buffers,
        })
    }
}
