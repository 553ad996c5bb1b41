//! # TCP Transport
//!
//! Accepts and dials TCP connections, runs the configured [`Handshake`] on
//! each one and admits the result into [`PeerState`].
//!
//! ## Connection lifecycle
//! 1. `listen()` accept loop or `dial(addr)` produces a [`Connection`]
//! 2. the handshake runs under `handshake_timeout`
//! 3. the peer is admitted, or the connection is dropped on a limit or duplicate
//! 4. a write pump task and a read pump run until either side stops
//! 5. the peer is removed from peer state and the socket closes
//!
//! Every received packet lands on one bounded delivery channel returned by
//! [`TcpTransport::new`].
//!
//! ## Shutdown
//! `close()` stops the accept loop and leaves admitted peers running.
//! `shutdown()` also cancels every peer and waits, bounded by
//! `shutdown_timeout`, for all spawned tasks.

use crate::config::TransportConfig;
use crate::core::packet::Command;
use crate::did::identity::Did;
use crate::error::{AdmissionError, ProtocolError, Result};
use crate::protocol::handshake::Handshake;
use crate::protocol::message::MessageContent;
use crate::transport::connection::Connection;
use crate::transport::peer::{read_pump, write_pump, Delivery, Peer};
use crate::transport::peer_state::{HandshakeGuard, PeerState};
use crate::utils::metrics::{Metrics, MetricsSnapshot, Timer};
use crate::utils::timeout::with_timeout_error;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

/// State shared between the transport handle, the accept loop and handlers.
struct Shared {
    config: TransportConfig,
    identity: Arc<Did>,
    handshake: Arc<dyn Handshake>,
    state: Arc<PeerState>,
    deliveries: mpsc::Sender<Delivery>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

struct Listening {
    addr: SocketAddr,
    cancel: CancellationToken,
}

pub struct TcpTransport {
    shared: Arc<Shared>,
    listener: Mutex<Option<Listening>>,
}

impl TcpTransport {
    /// Build a transport and the receiving end of its delivery channel.
    pub fn new(
        config: TransportConfig,
        identity: Arc<Did>,
        handshake: Arc<dyn Handshake>,
    ) -> (Self, mpsc::Receiver<Delivery>) {
        let (deliveries, rx) = mpsc::channel(config.delivery_capacity.max(1));
        let state = Arc::new(PeerState::new(config.max_inbound, config.max_outbound));
        let shared = Arc::new(Shared {
            config,
            identity,
            handshake,
            state,
            deliveries,
            metrics: Arc::new(Metrics::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        let transport = Self {
            shared,
            listener: Mutex::new(None),
        };
        (transport, rx)
    }

    /// Bind `listen_address` and start the accept loop. Returns the bound
    /// address, which differs from the configured one when it uses port 0.
    #[instrument(skip(self), fields(address = %self.shared.config.listen_address))]
    pub async fn listen(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.local_addr()? {
            return Err(ProtocolError::AlreadyListening(addr));
        }

        let listener = TcpListener::bind(&self.shared.config.listen_address).await?;
        let addr = listener.local_addr()?;
        let cancel = self.shared.shutdown.child_token();

        {
            let mut slot = self.listener.lock().map_err(|_| ProtocolError::LockPoisoned)?;
            if let Some(existing) = slot.as_ref() {
                return Err(ProtocolError::AlreadyListening(existing.addr));
            }
            *slot = Some(Listening {
                addr,
                cancel: cancel.clone(),
            });
        }

        info!(%addr, "Listening for peers");
        let shared = Arc::clone(&self.shared);
        self.shared
            .tracker
            .spawn(accept_loop(shared, listener, cancel));
        Ok(addr)
    }

    /// Connect to `addr`, run the handshake and admit the peer.
    #[instrument(skip(self))]
    pub async fn dial(&self, addr: SocketAddr) -> Result<Arc<Peer>> {
        let shared = &self.shared;
        if !shared.state.has_outbound_capacity() {
            shared.metrics.admission_rejected();
            return Err(AdmissionError::ExceedOutboundLimit(shared.config.max_outbound).into());
        }

        let stream = with_timeout_error(
            async { TcpStream::connect(addr).await.map_err(ProtocolError::from) },
            shared.config.dial_timeout,
        )
        .await?;
        shared.metrics.connection_opened();

        let peer = Arc::clone(shared).establish(stream, true, None).await?;
        Ok(peer)
    }

    pub fn peer(&self, addr: &SocketAddr) -> Result<Option<Arc<Peer>>> {
        self.shared.state.get(addr)
    }

    pub fn peers(&self) -> Result<Vec<Arc<Peer>>> {
        self.shared.state.peers()
    }

    pub fn state(&self) -> &PeerState {
        &self.shared.state
    }

    pub fn identity(&self) -> &Arc<Did> {
        &self.shared.identity
    }

    /// Queue a public message to every admitted peer without waiting.
    /// Returns how many peers accepted it.
    pub fn broadcast(&self, data: &[u8]) -> Result<usize> {
        let payload = MessageContent::public(data)?.to_bytes();
        let mut delivered = 0;
        for peer in self.shared.state.peers()? {
            match peer.try_send(Command::MessageSend, &payload) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(peer = %peer.addr(), error = %e, "Broadcast skipped peer"),
            }
        }
        Ok(delivered)
    }

    /// Address of the running accept loop.
    pub fn local_addr(&self) -> Result<Option<SocketAddr>> {
        let slot = self.listener.lock().map_err(|_| ProtocolError::LockPoisoned)?;
        Ok(slot.as_ref().map(|l| l.addr))
    }

    /// Stop accepting connections. Admitted peers keep running.
    pub fn close(&self) -> Result<()> {
        let listening = self
            .listener
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned)?
            .take();
        if let Some(listening) = listening {
            listening.cancel.cancel();
            info!(addr = %listening.addr, "Stopped accepting peers");
        }
        Ok(())
    }

    /// Stop accepting, cancel every peer and wait for all tasks.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        self.close()?;
        self.shared.shutdown.cancel();
        self.shared.tracker.close();

        let timeout = self.shared.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.shared.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.shared.tracker.len(),
                "Shutdown timeout reached before all peer tasks finished"
            );
            return Err(ProtocolError::Timeout);
        }

        self.shared.metrics.log_metrics();
        info!("Transport shut down");
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("identity", &self.shared.identity.identifier())
            .field("peers", &self.shared.state.len())
            .finish_non_exhaustive()
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: TcpListener, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                shared.metrics.connection_opened();
                if !shared.state.has_inbound_capacity() {
                    shared.metrics.admission_rejected();
                    warn!(peer = %addr, "Inbound peer limit reached, dropping connection");
                    continue;
                }

                let guard = shared.state.begin_inbound_handshake();
                let handler = Arc::clone(&shared);
                shared.tracker.spawn(async move {
                    if let Err(e) = handler.establish(stream, false, Some(guard)).await {
                        debug!(peer = %addr, error = %e, "Inbound connection rejected");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
    debug!("Accept loop stopped");
}

impl Shared {
    /// Handshake and admit. On success the pumps are spawned and the peer is
    /// returned; on failure the stream is dropped unregistered.
    async fn establish(
        self: Arc<Self>,
        stream: TcpStream,
        outbound: bool,
        guard: Option<HandshakeGuard>,
    ) -> Result<Arc<Peer>> {
        let mut conn = Connection::new(stream, outbound)?
            .with_handshake_limit(self.config.max_handshake_bytes);
        let addr = conn.remote_addr();

        self.metrics.handshake_attempt();
        let identity = {
            let _timer = Timer::start("handshake");
            tokio::select! {
                _ = self.shutdown.cancelled() => Err(ProtocolError::ConnectionClosed),
                result = with_timeout_error(
                    self.handshake.handshake(&mut conn),
                    self.config.handshake_timeout,
                ) => result,
            }
        };
        let identity = match identity {
            Ok(identity) => {
                self.metrics.handshake_success();
                identity
            }
            Err(e) => {
                self.metrics.handshake_failed();
                warn!(peer = %addr, error = %e, "Handshake failed");
                return Err(e);
            }
        };
        drop(guard);

        let (peer, queue) = Peer::new(
            addr,
            outbound,
            identity,
            Arc::clone(&self.identity),
            self.config.peer_queue_capacity,
            self.shutdown.child_token(),
            Arc::clone(&self.metrics),
        );
        if let Err(e) = self.state.admit(Arc::clone(&peer)) {
            self.metrics.admission_rejected();
            warn!(peer = %addr, error = %e, "Peer not admitted");
            return Err(e);
        }
        self.metrics.peer_admitted();
        info!(
            peer = %addr,
            outbound,
            did = peer.identity().map(|id| id.did()).unwrap_or("anonymous"),
            "Peer admitted"
        );

        let (reader, writer) = conn.into_split();
        let writer_task = self.tracker.spawn(write_pump(
            Arc::clone(&peer),
            writer,
            queue,
            self.config.heartbeat_interval,
        ));

        let handler = Arc::clone(&self);
        let pumped = Arc::clone(&peer);
        self.tracker.spawn(async move {
            let result = read_pump(
                Arc::clone(&pumped),
                reader,
                handler.deliveries.clone(),
                handler.config.max_stream_bytes,
            )
            .await;
            match result {
                Ok(()) => debug!(peer = %addr, "Read pump finished"),
                Err(e) => warn!(peer = %addr, error = %e, "Peer connection failed"),
            }

            pumped.abort();
            match writer_task.await {
                Ok(Err(e)) => debug!(peer = %addr, error = %e, "Write pump failed"),
                Err(e) => error!(peer = %addr, error = %e, "Write pump panicked"),
                Ok(Ok(())) => {}
            }

            match handler.state.remove(&pumped) {
                Ok(Some(_)) => {
                    handler.metrics.peer_removed();
                    info!(peer = %addr, "Peer removed");
                }
                Ok(None) => {}
                Err(e) => error!(peer = %addr, error = %e, "Failed to remove peer"),
            }
        });

        Ok(peer)
    }
}
