//! # Protocol Layer
//!
//! What travels inside a packet and how peers authenticate each other.
//!
//! ## Components
//! - **Rpc**: signed envelope around every post-handshake payload
//! - **Message**: public or encrypted message content
//! - **Handshake**: pluggable admission policy and the DID handshake
//! - **Dispatcher**: per-command routing of inbound messages

pub mod dispatcher;
pub mod handshake;
pub mod message;
pub mod rpc;

#[cfg(test)]
mod tests;

pub use dispatcher::Dispatcher;
pub use handshake::{DidHandshake, Handshake, NoopHandshake, PeerIdentity};
pub use message::{MessageContent, Visibility};
pub use rpc::Rpc;
