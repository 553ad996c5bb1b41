//! # Transport Layer
//!
//! TCP connections, admitted peers and the registry that bounds them.
//!
//! ## Components
//! - **Connection**: framed socket used during the handshake
//! - **Peer**: outbound queue, read and write pumps, raw streams
//! - **PeerState**: inbound and outbound peer maps with limits
//! - **TcpTransport**: accept loop, dialing, delivery channel and shutdown

pub mod connection;
pub mod peer;
pub mod peer_state;
pub mod tcp;

pub use connection::Connection;
pub use peer::{Delivery, InboundMessage, Peer, RawStream};
pub use peer_state::PeerState;
pub use tcp::TcpTransport;
