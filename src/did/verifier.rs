//! DID document verifier.
//!
//! Checks a detached Ed25519 signature over a document's canonical bytes,
//! after applying the configured policy (timestamp tolerance, trusted roots).
//! Signature verdicts are cached for a TTL so repeated handshakes with the
//! same peer skip the curve arithmetic.
//!
//! Every call to [`DidVerifier::verify`] counts once in `total` and once in
//! exactly one of `success` or `failure`. Policy rejections and malformed
//! input count as failures and are returned as errors; a well-formed
//! signature that does not match returns `Ok(false)`.

use crate::config::VerifierConfig;
use crate::did::cache::{CacheKey, CacheMiss, VerificationCache, VerificationResult};
use crate::did::document::DidDocument;
use crate::did::identity::parse_signature;
use crate::error::{ProtocolError, Result, VerifyError};
use chrono::{DateTime, Utc};
use ed25519_dalek::Verifier;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::{debug, instrument, trace, warn};

/// Counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerifierStats {
    pub total: u64,
    pub success: u64,
    pub failure: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_size: usize,
}

#[derive(Debug)]
pub struct DidVerifier {
    config: VerifierConfig,
    cache: Option<VerificationCache>,
    trusted_roots: RwLock<HashSet<String>>,
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl DidVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        let cache = config
            .enable_cache
            .then(|| VerificationCache::new(config.cache_ttl, config.max_cache_size));
        let trusted_roots = config.trusted_roots.iter().cloned().collect();

        Self {
            config,
            cache,
            trusted_roots: RwLock::new(trusted_roots),
            total: AtomicU64::new(0),
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify `signature` over `doc` as of now.
    pub fn verify(&self, doc: &DidDocument, signature: &[u8]) -> Result<bool> {
        self.verify_at(doc, signature, Utc::now())
    }

    /// Verify `signature` over `doc`, judging timestamps against `now`.
    #[instrument(skip_all, fields(did = %doc.id))]
    pub fn verify_at(
        &self,
        doc: &DidDocument,
        signature: &[u8],
        now: DateTime<Utc>,
    ) -> Result<bool> {
        self.total.fetch_add(1, Ordering::Relaxed);

        let outcome = self.evaluate(doc, signature, now);
        match &outcome {
            Ok(true) => {
                self.success.fetch_add(1, Ordering::Relaxed);
                debug!("DID document verified");
            }
            Ok(false) => {
                self.failure.fetch_add(1, Ordering::Relaxed);
                warn!("DID document signature mismatch");
            }
            Err(e) => {
                self.failure.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "DID document rejected");
            }
        }
        outcome
    }

    fn evaluate(&self, doc: &DidDocument, signature: &[u8], now: DateTime<Utc>) -> Result<bool> {
        let cache_key = match &self.cache {
            Some(cache) => {
                let key = CacheKey {
                    document_id: doc.id.clone(),
                    signature: signature.to_vec(),
                    digest: doc.digest()?,
                };
                match cache.get(&key) {
                    Ok(hit) => {
                        self.cache_hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(hit.valid);
                    }
                    Err(miss) => {
                        self.cache_misses.fetch_add(1, Ordering::Relaxed);
                        if miss == CacheMiss::Expired {
                            trace!("Cached verdict expired, re-verifying");
                        }
                    }
                }
                Some(key)
            }
            None => None,
        };

        if self.config.validate_timestamp {
            self.check_timestamp(doc, now)?;
        }
        if self.config.require_trusted_root {
            self.check_trusted_root(doc)?;
        }

        let parsed = parse_signature(signature)?;
        let public_key = doc.ed25519_key()?;
        let verdict = public_key.verify(&doc.canonical_bytes()?, &parsed);

        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            let expires_at = chrono::Duration::from_std(cache.ttl())
                .ok()
                .and_then(|ttl| now.checked_add_signed(ttl))
                .unwrap_or(now);
            cache.insert(
                key,
                VerificationResult {
                    valid: verdict.is_ok(),
                    subject: doc.id.clone(),
                    verified_at: now,
                    expires_at,
                    signature: signature.to_vec(),
                    public_key: public_key.to_bytes(),
                    error: verdict.as_ref().err().map(|e| e.to_string()),
                },
            );
        }

        Ok(verdict.is_ok())
    }

    fn check_timestamp(&self, doc: &DidDocument, now: DateTime<Utc>) -> Result<()> {
        let created = doc.created_at()?;
        let skew_ms = (now - created).num_milliseconds().unsigned_abs();
        let tolerance_ms = self.config.timestamp_tolerance.as_millis() as u64;
        if skew_ms > tolerance_ms {
            return Err(VerifyError::TimestampInvalid {
                skew_ms,
                tolerance_ms,
            }
            .into());
        }
        Ok(())
    }

    fn check_trusted_root(&self, doc: &DidDocument) -> Result<()> {
        let roots = self
            .trusted_roots
            .read()
            .map_err(|_| ProtocolError::LockPoisoned)?;
        if roots.is_empty() {
            return Err(VerifyError::MissingTrustedRoot.into());
        }
        if roots.contains(&doc.id) || doc.controllers().any(|c| roots.contains(c)) {
            return Ok(());
        }
        Err(VerifyError::DocNotController(doc.id.clone()).into())
    }

    pub fn add_trusted_root(&self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        debug!(root = %id, "Trusted root added");
        self.trusted_roots
            .write()
            .map_err(|_| ProtocolError::LockPoisoned)?
            .insert(id);
        Ok(())
    }

    pub fn is_trusted_root(&self, id: &str) -> bool {
        self.trusted_roots
            .read()
            .map(|roots| roots.contains(id))
            .unwrap_or(false)
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn stats(&self) -> VerifierStats {
        VerifierStats {
            total: self.total.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            failure: self.failure.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_size: self.cache.as_ref().map_or(0, VerificationCache::len),
        }
    }
}

impl Default for DidVerifier {
    fn default() -> Self {
        Self::new(VerifierConfig::default())
    }
}
