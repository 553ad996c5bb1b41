//! # Utility Modules
//!
//! Supporting utilities for cryptography, checksums, logging, and timing.
//!
//! ## Components
//! - **Crypto**: ChaCha20-Poly1305 AEAD encryption for private messages
//! - **Checksum**: CRC-64 over packet headers and payloads
//! - **Logging**: Structured logging configuration
//! - **Timeout**: Async timeout wrappers and protocol timing constants
//! - **Replay Cache**: TTL-based challenge deduplication for the handshake
//! - **Metrics**: Thread-safe transport counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Memory zeroing for sensitive data (zeroize crate)

pub mod checksum;
pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod replay_cache;
pub mod timeout;

pub use checksum::crc64;
pub use replay_cache::ReplayCache;
