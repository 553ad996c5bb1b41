//! Window of recently seen handshake challenges.
//!
//! A hello whose (identity, challenge) pair is still inside the window is a
//! replay. Entries leave the window after the TTL or, when the window is
//! full, oldest first.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Size of a handshake challenge in bytes.
pub const CHALLENGE_SIZE: usize = 32;

/// Remote identity plus the challenge it sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Remote DID identifier
    peer_id: String,
    challenge: [u8; CHALLENGE_SIZE],
}

/// Challenge window. `seen` and `queue` always hold the same keys; the queue
/// is ordered by arrival, which is also expiry order.
#[derive(Debug)]
pub struct ReplayCache {
    seen: HashSet<CacheKey>,
    queue: VecDeque<(Instant, CacheKey)>,
    ttl: Duration,
    capacity: usize,
}

impl ReplayCache {
    /// Five minute window, well past the handshake timeout.
    pub fn new() -> Self {
        Self::with_settings(Duration::from_secs(300), 10_000)
    }

    pub fn with_settings(ttl: Duration, max_entries: usize) -> Self {
        Self {
            seen: HashSet::new(),
            queue: VecDeque::new(),
            ttl,
            capacity: max_entries.max(1),
        }
    }

    /// True if `peer_id` already presented `challenge` inside the window.
    /// Otherwise the challenge is recorded and false is returned.
    pub fn is_replay(&mut self, peer_id: &str, challenge: &[u8; CHALLENGE_SIZE]) -> bool {
        let now = Instant::now();
        self.expire(now);

        let key = CacheKey {
            peer_id: peer_id.to_owned(),
            challenge: *challenge,
        };
        if self.seen.contains(&key) {
            return true;
        }

        while self.queue.len() >= self.capacity {
            self.pop_oldest();
        }
        self.seen.insert(key.clone());
        self.queue.push_back((now, key));
        trace!(peer_id, "Challenge recorded");
        false
    }

    fn expire(&mut self, now: Instant) {
        let mut expired = 0usize;
        while self
            .queue
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) >= self.ttl)
        {
            self.pop_oldest();
            expired += 1;
        }
        if expired > 0 {
            debug!(expired, "Expired replay window entries");
        }
    }

    fn pop_oldest(&mut self) {
        if let Some((_, key)) = self.queue.pop_front() {
            self.seen.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.queue.clear();
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}
