//! Admitted peer and its pumps.
//!
//! A [`Peer`] owns the outbound queue of one live connection. Two tasks drive
//! the socket:
//!
//! - the **read pump** decodes packets, verifies checksums and RPC signatures
//!   and forwards [`Delivery`] values to the transport's shared channel
//! - the **write pump** drains the bounded queue, emits heartbeats and writes
//!   framed bytes until the first write error
//!
//! Both stop when the peer's [`CancellationToken`] fires.
//!
//! ## Raw streams
//! A `Stream` packet carries an RPC whose payload is the big-endian `u64`
//! length of the raw bytes that follow it on the socket. The read pump hands
//! its reader to the consumer as a [`RawStream`] and suspends until the
//! stream is dropped. Unread stream bytes are discarded before packet
//! dispatch resumes.

use crate::core::packet::{Command, Packet};
use crate::did::identity::Did;
use crate::error::{CryptoError, FrameError, ProtocolError, Result};
use crate::protocol::handshake::PeerIdentity;
use crate::protocol::message::{MessageContent, Visibility};
use crate::protocol::rpc::Rpc;
use crate::transport::connection::{next_packet, PacketReader, PacketWriter};
use crate::utils::metrics::Metrics;
use bytes::Bytes;
use futures::SinkExt;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Size of the stream length marker.
pub const STREAM_MARKER_SIZE: usize = 8;

/// Work for the write pump.
#[derive(Debug)]
pub(crate) enum Outbound {
    Packet(Packet),
    Stream { header: Packet, data: Bytes },
    Disconnect,
}

/// Packet received from an admitted peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Socket address of the peer
    pub peer: SocketAddr,
    /// Address from the RPC envelope
    pub sender: String,
    pub command: Command,
    pub visibility: Visibility,
    /// Decrypted message body, or the raw RPC payload for non-message commands
    pub payload: Vec<u8>,
    /// True when the envelope signature was checked against a handshake identity
    pub authenticated: bool,
}

/// Item on the transport's delivery channel.
#[derive(Debug)]
pub enum Delivery {
    Message(InboundMessage),
    Stream(RawStream),
}

/// Raw bytes that followed a `Stream` packet.
///
/// Implements [`AsyncRead`] and yields end of stream after the announced
/// length. Dropping it resumes packet dispatch on the peer.
pub struct RawStream {
    peer: SocketAddr,
    sender: String,
    length: u64,
    remaining: u64,
    reader: Option<PacketReader>,
    release: Option<oneshot::Sender<(PacketReader, u64)>>,
}

impl RawStream {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Announced stream length.
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Read the rest of the stream into memory.
    pub async fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let capacity = usize::try_from(self.remaining).unwrap_or(usize::MAX);
        let mut data = Vec::with_capacity(capacity.min(1024 * 1024));
        self.read_to_end(&mut data).await?;
        Ok(data)
    }
}

impl AsyncRead for RawStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.remaining == 0 || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let Some(reader) = this.reader.as_mut() else {
            return Poll::Ready(Ok(()));
        };

        let want = this.remaining.min(buf.remaining() as u64) as usize;

        // Bytes the packet decoder already pulled off the socket come first.
        let buffered = reader.read_buffer_mut();
        if !buffered.is_empty() {
            let n = want.min(buffered.len());
            buf.put_slice(&buffered.split_to(n));
            this.remaining -= n as u64;
            return Poll::Ready(Ok(()));
        }

        let mut scratch = [0u8; 8192];
        let cap = want.min(scratch.len());
        let mut chunk = ReadBuf::new(&mut scratch[..cap]);
        match Pin::new(reader.get_mut()).poll_read(cx, &mut chunk) {
            Poll::Ready(Ok(())) => {
                let filled = chunk.filled();
                if filled.is_empty() {
                    return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
                }
                buf.put_slice(filled);
                this.remaining -= filled.len() as u64;
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl Drop for RawStream {
    fn drop(&mut self) {
        if let (Some(reader), Some(release)) = (self.reader.take(), self.release.take()) {
            let _ = release.send((reader, self.remaining));
        }
    }
}

impl fmt::Debug for RawStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawStream")
            .field("peer", &self.peer)
            .field("length", &self.length)
            .field("remaining", &self.remaining)
            .finish()
    }
}

/// Count of open raw streams with a wakeup when it reaches zero.
#[derive(Debug, Default)]
struct StreamGroup {
    open: AtomicUsize,
    idle: Notify,
}

pub struct Peer {
    addr: SocketAddr,
    outbound: bool,
    identity: Option<PeerIdentity>,
    local: Arc<Did>,
    queue: mpsc::Sender<Outbound>,
    streams: StreamGroup,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
}

impl Peer {
    /// Create a peer and the receiving end of its outbound queue.
    pub(crate) fn new(
        addr: SocketAddr,
        outbound: bool,
        identity: Option<PeerIdentity>,
        local: Arc<Did>,
        queue_capacity: usize,
        cancel: CancellationToken,
        metrics: Arc<Metrics>,
    ) -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (queue, rx) = mpsc::channel(queue_capacity.max(1));
        let peer = Arc::new(Self {
            addr,
            outbound,
            identity,
            local,
            queue,
            streams: StreamGroup::default(),
            cancel,
            metrics,
        });
        (peer, rx)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// True when we dialed this peer.
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// Identity established by the handshake, `None` for anonymous peers.
    pub fn identity(&self) -> Option<&PeerIdentity> {
        self.identity.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the peer's pumps are told to stop.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Queue a signed packet, waiting for queue space.
    pub async fn send(&self, command: Command, payload: &[u8]) -> Result<()> {
        let packet = self.seal(command, payload)?;
        self.queue
            .send(Outbound::Packet(packet))
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Queue a signed packet without waiting.
    pub fn try_send(&self, command: Command, payload: &[u8]) -> Result<()> {
        let packet = self.seal(command, payload)?;
        self.queue
            .try_send(Outbound::Packet(packet))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => ProtocolError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
            })
    }

    pub async fn send_public(&self, data: &[u8]) -> Result<()> {
        let content = MessageContent::public(data)?;
        self.send(Command::MessageSend, &content.to_bytes()).await
    }

    /// Encrypt under the handshake session key and queue.
    pub async fn send_private(&self, data: &[u8]) -> Result<()> {
        let key = self
            .identity
            .as_ref()
            .map(PeerIdentity::session_key)
            .ok_or(CryptoError::MissingKey("session key"))?;
        let content = MessageContent::private(data, key)?;
        self.send(Command::MessageSend, &content.to_bytes()).await
    }

    /// Queue a raw stream: a signed length marker followed by `data`.
    pub async fn send_stream(&self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let marker = (data.len() as u64).to_be_bytes();
        let header = self.seal(Command::Stream, &marker)?;
        self.queue
            .send(Outbound::Stream { header, data })
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Send `Disconnect` after the queued packets and stop both pumps.
    /// Stops immediately when the queue is full or gone.
    pub fn close(&self) {
        if self.queue.try_send(Outbound::Disconnect).is_err() {
            self.cancel.cancel();
        }
    }

    /// Stop both pumps without notifying the remote side.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn open_stream(&self) {
        self.streams.open.fetch_add(1, Ordering::AcqRel);
        self.metrics.stream_opened();
    }

    pub fn close_stream(&self) {
        let previous = self
            .streams
            .open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.streams.idle.notify_waiters();
        }
    }

    pub fn open_streams(&self) -> usize {
        self.streams.open.load(Ordering::Acquire)
    }

    /// Wait until no raw stream is open on this peer.
    pub async fn wait_stream(&self) {
        loop {
            let idle = self.streams.idle.notified();
            if self.open_streams() == 0 {
                return;
            }
            idle.await;
        }
    }

    fn seal(&self, command: Command, payload: &[u8]) -> Result<Packet> {
        let rpc = Rpc::with_payload(payload, &self.local)?;
        Packet::encode(command, &rpc.to_bytes())
    }

    /// Check an inbound envelope against the handshake identity.
    fn authenticate(&self, rpc: &Rpc) -> Result<bool> {
        let Some(identity) = &self.identity else {
            return Ok(false);
        };
        if rpc.from_address()? != identity.address() {
            return Err(CryptoError::KeyMismatch.into());
        }
        rpc.verify(identity.verifying_key())?;
        Ok(true)
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("addr", &self.addr)
            .field("outbound", &self.outbound)
            .field("identity", &self.identity)
            .field("open_streams", &self.open_streams())
            .finish_non_exhaustive()
    }
}

/// Decode, check and forward inbound packets until the peer closes, the
/// token fires or a packet fails verification.
pub(crate) async fn read_pump(
    peer: Arc<Peer>,
    mut reader: PacketReader,
    deliveries: mpsc::Sender<Delivery>,
    max_stream_bytes: u64,
) -> Result<()> {
    loop {
        let packet = tokio::select! {
            _ = peer.cancel.cancelled() => return Ok(()),
            next = next_packet(&mut reader) => match next {
                Some(packet) => packet?,
                None => {
                    debug!(peer = %peer.addr, "Remote closed connection");
                    return Ok(());
                }
            },
        };
        peer.metrics.packet_received(packet.encoded_len() as u64);

        if let Err(e) = packet.check() {
            peer.metrics.checksum_failure();
            return Err(e);
        }

        let rpc = Rpc::from_bytes(packet.payload())?;
        let authenticated = match peer.authenticate(&rpc) {
            Ok(authenticated) => authenticated,
            Err(e) => {
                peer.metrics.signature_failure();
                return Err(e);
            }
        };
        let sender = rpc.from_address()?.to_string();
        trace!(peer = %peer.addr, command = %packet.command(), "Packet received");

        let delivery = match packet.command() {
            Command::Heartbeat => continue,
            Command::Disconnect => {
                debug!(peer = %peer.addr, "Peer sent disconnect");
                return Ok(());
            }
            Command::Handshake | Command::HandshakeEnd => {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "{} after handshake",
                    packet.command()
                )));
            }
            Command::Stream => {
                let length = stream_length(rpc.payload(), max_stream_bytes)?;
                peer.open_stream();
                let (release, released) = oneshot::channel();
                let stream = RawStream {
                    peer: peer.addr,
                    sender,
                    length,
                    remaining: length,
                    reader: Some(reader),
                    release: Some(release),
                };
                debug!(peer = %peer.addr, length, "Raw stream opened");

                tokio::select! {
                    _ = peer.cancel.cancelled() => return Ok(()),
                    sent = deliveries.send(Delivery::Stream(stream)) => {
                        sent.map_err(|_| ProtocolError::ConnectionClosed)?
                    }
                }
                let (returned, unread) = tokio::select! {
                    _ = peer.cancel.cancelled() => return Ok(()),
                    result = released => result.map_err(|_| ProtocolError::ConnectionClosed)?,
                };
                reader = returned;
                if unread > 0 {
                    debug!(peer = %peer.addr, unread, "Discarding unread stream bytes");
                    discard(&mut reader, unread).await?;
                }
                peer.close_stream();
                continue;
            }
            Command::MessageSend => {
                let content = rpc.message()?;
                let key = peer.identity.as_ref().map(PeerIdentity::session_key);
                Delivery::Message(InboundMessage {
                    peer: peer.addr,
                    sender,
                    command: Command::MessageSend,
                    visibility: content.visibility(),
                    payload: content.open(key)?,
                    authenticated,
                })
            }
            Command::PeerInfo => Delivery::Message(InboundMessage {
                peer: peer.addr,
                sender,
                command: Command::PeerInfo,
                visibility: Visibility::Public,
                payload: rpc.payload().to_vec(),
                authenticated,
            }),
        };

        tokio::select! {
            _ = peer.cancel.cancelled() => return Ok(()),
            sent = deliveries.send(delivery) => sent.map_err(|_| ProtocolError::ConnectionClosed)?,
        }
    }
}

/// Drain the outbound queue onto the socket, with heartbeats when the
/// interval is non-zero. The peer is cancelled whenever the pump exits, so a
/// failed write also stops the read pump.
pub(crate) async fn write_pump(
    peer: Arc<Peer>,
    writer: PacketWriter,
    queue: mpsc::Receiver<Outbound>,
    heartbeat: Duration,
) -> Result<()> {
    let result = write_loop(&peer, writer, queue, heartbeat).await;
    peer.cancel.cancel();
    result
}

async fn write_loop(
    peer: &Peer,
    mut writer: PacketWriter,
    mut queue: mpsc::Receiver<Outbound>,
    heartbeat: Duration,
) -> Result<()> {
    let mut ticker = heartbeat_ticker(heartbeat);

    loop {
        let next = tokio::select! {
            _ = peer.cancel.cancelled() => return Ok(()),
            _ = tick(&mut ticker) => None,
            item = queue.recv() => match item {
                Some(item) => Some(item),
                None => return Ok(()),
            },
        };

        match next {
            None => {
                let packet = peer.seal(Command::Heartbeat, &[])?;
                write_packet(peer, &mut writer, packet).await?;
            }
            Some(Outbound::Packet(packet)) => write_packet(peer, &mut writer, packet).await?,
            Some(Outbound::Stream { header, data }) => {
                write_packet(peer, &mut writer, header).await?;
                writer.get_mut().write_all(&data).await?;
                peer.metrics.stream_bytes_sent(data.len() as u64);
            }
            Some(Outbound::Disconnect) => {
                let packet = peer.seal(Command::Disconnect, &[])?;
                let result = write_packet(peer, &mut writer, packet).await;
                let _ = writer.get_mut().shutdown().await;
                return result;
            }
        }
    }
}

async fn write_packet(peer: &Peer, writer: &mut PacketWriter, packet: Packet) -> Result<()> {
    let size = packet.encoded_len() as u64;
    writer.send(packet).await?;
    peer.metrics.packet_sent(size);
    Ok(())
}

fn heartbeat_ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn stream_length(marker: &[u8], max: u64) -> Result<u64> {
    let raw: [u8; STREAM_MARKER_SIZE] = marker
        .try_into()
        .map_err(|_| FrameError::InvalidStreamMarker)?;
    let length = u64::from_be_bytes(raw);
    if length > max {
        return Err(FrameError::PayloadTooLarge {
            size: usize::try_from(length).unwrap_or(usize::MAX),
            max: usize::try_from(max).unwrap_or(usize::MAX),
        }
        .into());
    }
    Ok(length)
}

async fn discard(reader: &mut PacketReader, mut remaining: u64) -> Result<()> {
    let buffered = reader.read_buffer_mut();
    let n = remaining.min(buffered.len() as u64) as usize;
    let _ = buffered.split_to(n);
    remaining -= n as u64;

    let mut scratch = [0u8; 8192];
    while remaining > 0 {
        let want = remaining.min(scratch.len() as u64) as usize;
        let read = reader.get_mut().read(&mut scratch[..want]).await?;
        if read == 0 {
            warn!("Connection closed inside a raw stream");
            return Err(ProtocolError::ConnectionClosed);
        }
        remaining -= read as u64;
    }
    Ok(())
}
