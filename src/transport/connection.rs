//! Framed TCP connection used before a peer is admitted.
//!
//! The handshake drives a [`Connection`] directly, one packet at a time. Once
//! admitted, the connection is split into a framed read half for the read pump
//! and a framed write half for the write pump.

use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::DEFAULT_MAX_HANDSHAKE_BYTES;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Framed, FramedRead, FramedWrite};
use tracing::trace;

pub type PacketReader = FramedRead<OwnedReadHalf, PacketCodec>;
pub type PacketWriter = FramedWrite<OwnedWriteHalf, PacketCodec>;

pub struct Connection {
    framed: Framed<TcpStream, PacketCodec>,
    remote_addr: SocketAddr,
    outbound: bool,
    handshake_limit: usize,
}

impl Connection {
    pub fn new(stream: TcpStream, outbound: bool) -> Result<Self> {
        let remote_addr = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        Ok(Self {
            framed: Framed::new(stream, PacketCodec),
            remote_addr,
            outbound,
            handshake_limit: DEFAULT_MAX_HANDSHAKE_BYTES,
        })
    }

    /// Cap on one reassembled handshake message sent or received here.
    pub fn with_handshake_limit(mut self, limit: usize) -> Self {
        self.handshake_limit = limit;
        self
    }

    pub fn handshake_limit(&self) -> usize {
        self.handshake_limit
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// True when we dialed this connection.
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    pub async fn send_packet(&mut self, packet: Packet) -> Result<()> {
        trace!(peer = %self.remote_addr, command = %packet.command(), "Sending packet");
        self.framed.send(packet).await
    }

    /// Next packet, or `ConnectionClosed` at end of stream.
    pub async fn recv_packet(&mut self) -> Result<Packet> {
        self.framed
            .next()
            .await
            .ok_or(ProtocolError::ConnectionClosed)?
    }

    /// Split into pump halves. Bytes already buffered by the decoder move to
    /// the read half; read them with [`next_packet`], which decodes buffered
    /// frames before polling the socket.
    pub fn into_split(self) -> (PacketReader, PacketWriter) {
        let parts = self.framed.into_parts();
        let (read_half, write_half) = parts.io.into_split();

        let mut reader = FramedRead::new(read_half, PacketCodec);
        reader.read_buffer_mut().extend_from_slice(&parts.read_buf);
        let writer = FramedWrite::new(write_half, PacketCodec);
        (reader, writer)
    }
}

/// Next packet from a pump reader, or `None` at end of stream.
///
/// A fresh `FramedRead` polls the socket before decoding what it already
/// holds, so frames handed over by [`Connection::into_split`] or left behind
/// by a raw stream are decoded here first.
pub(crate) async fn next_packet(reader: &mut PacketReader) -> Option<Result<Packet>> {
    match PacketCodec.decode(reader.read_buffer_mut()) {
        Ok(Some(packet)) => Some(Ok(packet)),
        Ok(None) => reader.next().await,
        Err(e) => Some(Err(e)),
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_addr", &self.remote_addr)
            .field("outbound", &self.outbound)
            .field("handshake_limit", &self.handshake_limit)
            .finish()
    }
}
