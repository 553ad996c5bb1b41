//! Registry of admitted peers.
//!
//! Inbound and outbound peers live in separate maps with separate limits.
//! `add_*` are the only mutators that grow a map and both enforce the limit
//! and reject an address that is already registered in either direction.
//! Removal is idempotent. Counts are mirrored in atomics so capacity checks
//! on the accept path never take a lock.

use crate::error::{AdmissionError, ProtocolError, Result};
use crate::transport::peer::Peer;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

type PeerMap = RwLock<HashMap<SocketAddr, Arc<Peer>>>;

#[derive(Debug)]
pub struct PeerState {
    outbound: PeerMap,
    inbound: PeerMap,
    max_outbound: usize,
    max_inbound: usize,
    outbound_count: AtomicUsize,
    inbound_count: AtomicUsize,
    /// Inbound connections still in the handshake
    pending_inbound: AtomicUsize,
}

/// Reserves an inbound slot while a handshake runs. Released on drop.
#[derive(Debug)]
pub struct HandshakeGuard {
    state: Arc<PeerState>,
}

impl Drop for HandshakeGuard {
    fn drop(&mut self) {
        self.state.pending_inbound.fetch_sub(1, Ordering::AcqRel);
    }
}

impl PeerState {
    pub fn new(max_inbound: usize, max_outbound: usize) -> Self {
        Self {
            outbound: RwLock::new(HashMap::new()),
            inbound: RwLock::new(HashMap::new()),
            max_outbound,
            max_inbound,
            outbound_count: AtomicUsize::new(0),
            inbound_count: AtomicUsize::new(0),
            pending_inbound: AtomicUsize::new(0),
        }
    }

    /// Register a peer we dialed.
    pub fn add_outbound(&self, peer: Arc<Peer>) -> Result<()> {
        self.insert(&self.outbound, &self.inbound, &self.outbound_count, peer, self.max_outbound)
            .map_err(|e| match e {
                Rejection::Full => AdmissionError::ExceedOutboundLimit(self.max_outbound).into(),
                Rejection::Duplicate(addr) => AdmissionError::DuplicatePeer(addr).into(),
                Rejection::Poisoned => ProtocolError::LockPoisoned,
            })
    }

    /// Register a peer that dialed us.
    pub fn add_inbound(&self, peer: Arc<Peer>) -> Result<()> {
        self.insert(&self.inbound, &self.outbound, &self.inbound_count, peer, self.max_inbound)
            .map_err(|e| match e {
                Rejection::Full => AdmissionError::ExceedInboundLimit(self.max_inbound).into(),
                Rejection::Duplicate(addr) => AdmissionError::DuplicatePeer(addr).into(),
                Rejection::Poisoned => ProtocolError::LockPoisoned,
            })
    }

    /// Register a peer in the map matching its direction.
    pub fn admit(&self, peer: Arc<Peer>) -> Result<()> {
        if peer.is_outbound() {
            self.add_outbound(peer)
        } else {
            self.add_inbound(peer)
        }
    }

    pub fn remove_outbound(&self, addr: &SocketAddr) -> Result<Option<Arc<Peer>>> {
        Self::take(&self.outbound, &self.outbound_count, addr)
    }

    pub fn remove_inbound(&self, addr: &SocketAddr) -> Result<Option<Arc<Peer>>> {
        Self::take(&self.inbound, &self.inbound_count, addr)
    }

    /// Remove `peer` from the map matching its direction.
    pub fn remove(&self, peer: &Peer) -> Result<Option<Arc<Peer>>> {
        if peer.is_outbound() {
            self.remove_outbound(&peer.addr())
        } else {
            self.remove_inbound(&peer.addr())
        }
    }

    pub fn get(&self, addr: &SocketAddr) -> Result<Option<Arc<Peer>>> {
        for map in [&self.outbound, &self.inbound] {
            let peers = map.read().map_err(|_| ProtocolError::LockPoisoned)?;
            if let Some(peer) = peers.get(addr) {
                return Ok(Some(peer.clone()));
            }
        }
        Ok(None)
    }

    /// Snapshot of every admitted peer.
    pub fn peers(&self) -> Result<Vec<Arc<Peer>>> {
        let mut all = Vec::with_capacity(self.len());
        for map in [&self.outbound, &self.inbound] {
            let peers = map.read().map_err(|_| ProtocolError::LockPoisoned)?;
            all.extend(peers.values().cloned());
        }
        Ok(all)
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound_count.load(Ordering::Acquire)
    }

    pub fn inbound_count(&self) -> usize {
        self.inbound_count.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.outbound_count() + self.inbound_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_outbound_capacity(&self) -> bool {
        self.outbound_count() < self.max_outbound
    }

    /// True when admitted plus handshaking inbound peers are under the limit.
    pub fn has_inbound_capacity(&self) -> bool {
        self.inbound_count() + self.pending_inbound.load(Ordering::Acquire) < self.max_inbound
    }

    /// Hold an inbound slot for the duration of a handshake.
    pub fn begin_inbound_handshake(self: &Arc<Self>) -> HandshakeGuard {
        self.pending_inbound.fetch_add(1, Ordering::AcqRel);
        HandshakeGuard {
            state: Arc::clone(self),
        }
    }

    fn insert(
        &self,
        map: &PeerMap,
        other: &PeerMap,
        count: &AtomicUsize,
        peer: Arc<Peer>,
        max: usize,
    ) -> std::result::Result<(), Rejection> {
        let addr = peer.addr();
        // Read the other map first so the two locks are never held together.
        if other.read().map_err(|_| Rejection::Poisoned)?.contains_key(&addr) {
            return Err(Rejection::Duplicate(addr));
        }

        let mut peers = map.write().map_err(|_| Rejection::Poisoned)?;
        if peers.contains_key(&addr) {
            return Err(Rejection::Duplicate(addr));
        }
        if peers.len() >= max {
            return Err(Rejection::Full);
        }
        peers.insert(addr, peer);
        count.store(peers.len(), Ordering::Release);
        debug!(peer = %addr, total = peers.len(), "Peer registered");
        Ok(())
    }

    fn take(map: &PeerMap, count: &AtomicUsize, addr: &SocketAddr) -> Result<Option<Arc<Peer>>> {
        let mut peers = map.write().map_err(|_| ProtocolError::LockPoisoned)?;
        let removed = peers.remove(addr);
        count.store(peers.len(), Ordering::Release);
        Ok(removed)
    }
}

enum Rejection {
    Full,
    Duplicate(SocketAddr),
    Poisoned,
}
