//! Channel layer: kernel messages, wire framing, and classification.
//!
//! This module knows what travels over the command and notification
//! channels, but not how the channels are connected.

mod classify;
mod message;
pub mod wire;

pub use classify::{ContentKind, MessageKind, classify};
pub use message::{
    Channel, EXECUTE_REPLY, ExecuteRequest, KernelRequest, Message, MimeBundle, Reply,
    ReplyStatus,
};
pub use wire::{Header, Signer, WireMessage};
