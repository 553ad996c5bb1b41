//! # Verification Cache
//!
//! TTL cache of DID verification verdicts, keyed by document id, detached
//! signature and document digest.
//!
//! ## Features
//! - **Thread-safe**: `RwLock<HashMap>`; lookups take the read lock only
//! - **TTL-based expiration**: expired entries report [`CacheMiss::Expired`] and are dropped
//! - **Memory-bounded**: when full, expired entries go first, then the oldest entry
//!
//! Poisoned locks are recovered; the map only holds derived verdicts.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, trace};

/// Outcome of one signature check over a DID document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    pub valid: bool,
    /// Document id the verdict is about
    pub subject: String,
    pub verified_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
    pub public_key: [u8; 32],
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub document_id: String,
    pub signature: Vec<u8>,
    pub digest: [u8; 32],
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMiss {
    #[error("no cached verdict")]
    NotFound,
    #[error("cached verdict expired")]
    Expired,
}

#[derive(Debug)]
struct CacheEntry {
    result: Arc<VerificationResult>,
    inserted_at: Instant,
}

#[derive(Debug)]
pub struct VerificationCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl VerificationCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live verdict for `key`. An expired entry is removed before reporting.
    pub fn get(&self, key: &CacheKey) -> Result<Arc<VerificationResult>, CacheMiss> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                None => return Err(CacheMiss::NotFound),
                Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                    trace!(subject = %entry.result.subject, "Verification cache hit");
                    return Ok(entry.result.clone());
                }
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have refreshed the entry between the two locks
        if let Some(entry) = entries.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Ok(entry.result.clone());
            }
        }
        entries.remove(key);
        trace!("Verification cache entry expired");
        Err(CacheMiss::Expired)
    }

    pub fn insert(&self, key: CacheKey, result: VerificationResult) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if entries.len() >= self.max_entries && !entries.contains_key(&key) {
            self.evict_expired(&mut entries);
            if entries.len() >= self.max_entries {
                Self::evict_oldest(&mut entries);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                result: Arc::new(result),
                inserted_at: Instant::now(),
            },
        );
        trace!(cache_size = entries.len(), "Verification verdict cached");
    }

    /// Drop every entry, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let count = entries.len();
        entries.clear();
        debug!(cleared_count = count, "Verification cache cleared");
        count
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired(&self, entries: &mut HashMap<CacheKey, CacheEntry>) {
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        let after = entries.len();

        if before != after {
            debug!(
                removed_count = before - after,
                remaining_count = after,
                "Expired verdicts evicted"
            );
        }
    }

    fn evict_oldest(entries: &mut HashMap<CacheKey, CacheEntry>) {
        if let Some(oldest_key) = entries
            .iter()
            .min_by_key(|(_, entry)| entry.inserted_at)
            .map(|(k, _)| k.clone())
        {
            entries.remove(&oldest_key);
            debug!("Oldest verdict evicted to make room");
        }
    }
}
