//! # Peer Protocol
//!
//! Peer-to-peer messaging core: checksummed packet framing, signed RPC
//! envelopes, DID-authenticated peers and a bounded TCP transport.
//!
//! ## Layers
//! - [`core`]: packet framing with a CRC-64 trailer and its tokio codec
//! - [`protocol`]: RPC envelopes, message content, handshakes and dispatch
//! - [`did`]: identities, documents and the caching verifier
//! - [`transport`]: TCP connections, peers and peer limits
//! - [`utils`]: crypto, checksums, logging, metrics, timeouts
//!
//! ## Example
//! ```rust,no_run
//! use peer_protocol::config::NetworkConfig;
//! use peer_protocol::did::{Did, DidVerifier};
//! use peer_protocol::protocol::DidHandshake;
//! use peer_protocol::transport::{Delivery, TcpTransport};
//! use std::sync::Arc;
//!
//! # async fn run() -> peer_protocol::Result<()> {
//! let config = NetworkConfig::default();
//! let identity = Arc::new(Did::generate(vec![])?);
//! let verifier = Arc::new(DidVerifier::new(config.verifier.clone()));
//! let handshake = Arc::new(DidHandshake::new(identity.clone(), verifier));
//!
//! let (transport, mut deliveries) = TcpTransport::new(config.transport, identity, handshake);
//! transport.listen().await?;
//!
//! while let Some(delivery) = deliveries.recv().await {
//!     if let Delivery::Message(msg) = delivery {
//!         println!("{} says {:?}", msg.sender, msg.payload);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod did;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use crate::core::packet::{Command, Packet};
pub use crate::did::{Did, DidDocument, DidVerifier};
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::{MessageContent, Rpc, Visibility};
pub use crate::transport::TcpTransport;
