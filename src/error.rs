//! # Error Types
//!
//! Error handling for the peer protocol.
//!
//! Every layer owns a small tagged enum so callers can match on exactly the
//! failures that layer produces. [`ProtocolError`] wraps all of them for code
//! that crosses layers (the transport, the handshake, configuration loading).
//!
//! ## Error Categories
//! - **Framing** ([`FrameError`]): oversized payloads, truncated input, checksum mismatch
//! - **Cryptographic** ([`CryptoError`]): missing key material, malformed or invalid signatures
//! - **Verifier policy** ([`VerifyError`]): timestamp and trusted-root rejections
//! - **Admission** ([`AdmissionError`]): peer limits and duplicate addresses
//!
//! Framing and cryptographic failures close the offending connection. Admission
//! failures drop only the connection being admitted. Policy failures are kept
//! apart from cryptographic ones so callers can tell "signed correctly but
//! rejected" from "not signed correctly".
//!
//! ## Example Usage
//! ```rust
//! use peer_protocol::error::{FrameError, ProtocolError, Result};
//! use peer_protocol::core::packet::{Command, Packet};
//!
//! fn frame(bytes: &[u8]) -> Result<Packet> {
//!     Packet::encode(Command::MessageSend, bytes)
//! }
//!
//! match frame(&[0u8; 512]) {
//!     Err(ProtocolError::Frame(FrameError::PayloadTooLarge { size, .. })) => {
//!         assert_eq!(size, 512)
//!     }
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Static error messages for the handshake path.
pub mod constants {
    /// Handshake negotiation errors
    pub const ERR_HANDSHAKE_FAILED: &str = "Handshake failed";
    pub const ERR_UNEXPECTED_MESSAGE: &str = "Unexpected handshake message";
    pub const ERR_HANDSHAKE_TOO_LARGE: &str = "Handshake message exceeds maximum size";
    pub const ERR_SELF_CONNECTION: &str = "Remote peer presented our own identity";

    /// Remote identity errors
    pub const ERR_DOCUMENT_REJECTED: &str = "Remote DID document signature is invalid";
    pub const ERR_MISSING_RESPONSE: &str = "Remote hello carries no challenge response";
    pub const ERR_UNEXPECTED_RESPONSE: &str = "Initiator hello must not carry a challenge response";
    pub const ERR_RESPONSE_INVALID: &str = "Challenge response signature is invalid";
    pub const ERR_INVALID_CHALLENGE: &str = "Challenge is not 32 base58-encoded bytes";

    /// Replay protection
    pub const ERR_REPLAY_ATTACK: &str = "Replay attack detected - challenge already seen";
}

/// Framing errors raised by the packet, RPC and message codecs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Checksum mismatch: frame carries {expected:#018x}, computed {computed:#018x}")]
    ChecksumMismatch { expected: u64, computed: u64 },

    #[error("Unknown command byte: {0:#04x}")]
    UnknownCommand(u8),

    #[error("Unknown visibility tag: {0:#04x}")]
    UnknownVisibility(u8),

    #[error("Address too long: {0} bytes (max 50)")]
    AddressTooLong(usize),

    #[error("Address field is not valid UTF-8")]
    InvalidAddress,

    #[error("Unexpected {0} trailing bytes after frame")]
    TrailingBytes(usize),

    #[error("Malformed stream marker")]
    InvalidStreamMarker,
}

/// Failures of signing, verification and symmetric encryption.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Missing key material: {0}")]
    MissingKey(&'static str),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Malformed signature: expected 64 bytes, got {0}")]
    MalformedSignature(usize),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Document id does not match its verification key")]
    KeyMismatch,

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,
}

/// Policy rejections from the DID verifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("Document carries no created timestamp")]
    MissingCreatedAt,

    #[error("Created timestamp is not RFC 3339: {0}")]
    MalformedTimestamp(String),

    #[error("Created timestamp outside tolerance: skew {skew_ms}ms, tolerance {tolerance_ms}ms")]
    TimestampInvalid { skew_ms: u64, tolerance_ms: u64 },

    #[error("Trusted root required but none configured")]
    MissingTrustedRoot,

    #[error("Document {0} is not controlled by a trusted root")]
    DocNotController(String),
}

/// Peer admission failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Outbound peer limit reached ({0})")]
    ExceedOutboundLimit(usize),

    #[error("Inbound peer limit reached ({0})")]
    ExceedInboundLimit(usize),

    #[error("Peer already connected: {0}")]
    DuplicatePeer(SocketAddr),
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Verification rejected: {0}")]
    Verify(#[from] VerifyError),

    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("Replay attack detected")]
    ReplayDetected,

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Outbound queue full")]
    QueueFull,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Transport already listening on {0}")]
    AlreadyListening(SocketAddr),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Synchronization primitive poisoned")]
    LockPoisoned,
}

impl ProtocolError {
    /// True for failures that must tear down the connection they occurred on.
    pub fn is_fatal_to_connection(&self) -> bool {
        !matches!(self, ProtocolError::Admission(_) | ProtocolError::QueueFull)
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
