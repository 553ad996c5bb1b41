//! Peer handshake.
//!
//! [`Handshake`] is the pluggable admission policy run on every new
//! connection before the peer is registered. [`DidHandshake`] authenticates
//! both sides with their DID documents in three messages:
//!
//! ```text
//! initiator -> Hello   { version, document, signature, challenge }
//! responder -> Hello   { version, document, signature, challenge, response }
//! initiator -> Confirm { response }
//! ```
//!
//! Each `response` is an Ed25519 signature over the other side's challenge
//! followed by the signer's own address, so a hello cannot be relayed to a
//! third party. Both sides then derive a shared session key from their static
//! X25519 keys and the two challenges.
//!
//! Handshake messages are JSON, chunked over `Handshake` packets and closed
//! by a single `HandshakeEnd` packet.
//!
//! [`NoopHandshake`] admits everyone anonymously.

use crate::config::PROTOCOL_VERSION;
use crate::core::packet::{Command, Packet, MAX_PACKET_PAYLOAD};
use crate::did::document::DidDocument;
use crate::did::identity::{address_for, parse_signature, Did};
use crate::did::verifier::DidVerifier;
use crate::error::{constants, CryptoError, ProtocolError, Result};
use crate::transport::connection::Connection;
use crate::utils::replay_cache::{ReplayCache, CHALLENGE_SIZE};
use async_trait::async_trait;
use ed25519_dalek::{Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument, warn};
use zeroize::Zeroize;

/// Default bound on one encoded handshake message.
pub const DEFAULT_MAX_HANDSHAKE_BYTES: usize = 16 * 1024;

/// Admission policy run on a fresh connection.
///
/// `Ok(Some(identity))` admits an authenticated peer, `Ok(None)` admits an
/// anonymous one, and any error drops the connection.
#[async_trait]
pub trait Handshake: Send + Sync {
    async fn handshake(&self, conn: &mut Connection) -> Result<Option<PeerIdentity>>;
}

/// Authenticated remote identity produced by [`DidHandshake`].
pub struct PeerIdentity {
    document: DidDocument,
    verifying_key: VerifyingKey,
    address: String,
    session_key: [u8; 32],
}

impl PeerIdentity {
    pub fn did(&self) -> &str {
        &self.document.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn document(&self) -> &DidDocument {
        &self.document
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Symmetric key for private messages with this peer.
    pub fn session_key(&self) -> &[u8; 32] {
        &self.session_key
    }
}

impl Drop for PeerIdentity {
    fn drop(&mut self) {
        self.session_key.zeroize();
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerIdentity")
            .field("did", &self.document.id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Handshake that trusts every peer and exchanges nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandshake;

#[async_trait]
impl Handshake for NoopHandshake {
    async fn handshake(&self, conn: &mut Connection) -> Result<Option<PeerIdentity>> {
        debug!(peer = %conn.remote_addr(), "Admitting peer without authentication");
        Ok(None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub version: String,
    pub document: DidDocument,
    /// Base58 signature over the document's canonical bytes
    pub signature: String,
    /// Base58 32-byte challenge for the other side to sign
    pub challenge: String,
    /// Base58 signature over the other side's challenge, responder only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeMessage {
    Hello(HandshakePayload),
    Confirm { response: String },
}

impl HandshakeMessage {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Mutual DID authentication.
pub struct DidHandshake {
    identity: Arc<Did>,
    verifier: Arc<DidVerifier>,
    replay_cache: Mutex<ReplayCache>,
    max_message_bytes: usize,
}

impl DidHandshake {
    pub fn new(identity: Arc<Did>, verifier: Arc<DidVerifier>) -> Self {
        Self {
            identity,
            verifier,
            replay_cache: Mutex::new(ReplayCache::new()),
            max_message_bytes: DEFAULT_MAX_HANDSHAKE_BYTES,
        }
    }

    pub fn with_max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub fn verifier(&self) -> &Arc<DidVerifier> {
        &self.verifier
    }

    /// The tighter of our own cap and the connection's.
    fn message_limit(&self, conn: &Connection) -> usize {
        self.max_message_bytes.min(conn.handshake_limit())
    }

    fn hello(
        &self,
        challenge: &[u8; CHALLENGE_SIZE],
        response: Option<String>,
    ) -> Result<HandshakeMessage> {
        let document = self.identity.document();
        let signature = self.identity.sign_document(&document)?;
        Ok(HandshakeMessage::Hello(HandshakePayload {
            version: PROTOCOL_VERSION.to_string(),
            document,
            signature: bs58::encode(signature).into_string(),
            challenge: bs58::encode(challenge).into_string(),
            response,
        }))
    }

    /// Sign the remote challenge bound to our own address.
    fn respond(&self, remote_challenge: &[u8; CHALLENGE_SIZE]) -> String {
        let signature = self
            .identity
            .sign(&challenge_data(remote_challenge, self.identity.address()));
        bs58::encode(signature).into_string()
    }

    /// Check a remote hello: version, document signature, self-connection
    /// and challenge replay. Returns the remote key and challenge.
    fn accept_hello(
        &self,
        hello: &HandshakePayload,
    ) -> Result<(VerifyingKey, [u8; CHALLENGE_SIZE])> {
        if hello.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(hello.version.clone()));
        }
        if hello.document.id == self.identity.identifier() {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_SELF_CONNECTION.into(),
            ));
        }

        let signature = decode_bs58(&hello.signature)?;
        if !self.verifier.verify(&hello.document, &signature)? {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_DOCUMENT_REJECTED.into(),
            ));
        }

        let challenge = decode_challenge(&hello.challenge)?;
        let is_replay = self
            .replay_cache
            .lock()
            .map_err(|_| ProtocolError::LockPoisoned)?
            .is_replay(&hello.document.id, &challenge);
        if is_replay {
            warn!(remote = %hello.document.id, "{}", constants::ERR_REPLAY_ATTACK);
            return Err(ProtocolError::ReplayDetected);
        }

        Ok((hello.document.ed25519_key()?, challenge))
    }

    fn identity_for(
        &self,
        document: DidDocument,
        verifying_key: VerifyingKey,
        initiator_challenge: &[u8; CHALLENGE_SIZE],
        responder_challenge: &[u8; CHALLENGE_SIZE],
    ) -> Result<PeerIdentity> {
        let mut shared = self.identity.shared_secret(&document.x25519_key()?)?;
        let session_key = derive_session_key(&shared, initiator_challenge, responder_challenge);
        shared.zeroize();

        Ok(PeerIdentity {
            address: address_for(&verifying_key),
            document,
            verifying_key,
            session_key,
        })
    }

    #[instrument(skip(self, conn), fields(peer = %conn.remote_addr()))]
    async fn initiate(&self, conn: &mut Connection) -> Result<PeerIdentity> {
        let max_bytes = self.message_limit(conn);
        let own_challenge: [u8; CHALLENGE_SIZE] = rand::random();
        write_message(conn, &self.hello(&own_challenge, None)?, max_bytes).await?;

        let hello = match read_message(conn, max_bytes).await? {
            HandshakeMessage::Hello(hello) => hello,
            HandshakeMessage::Confirm { .. } => {
                return Err(ProtocolError::UnexpectedMessage(
                    constants::ERR_UNEXPECTED_MESSAGE.into(),
                ))
            }
        };
        let (remote_key, remote_challenge) = self.accept_hello(&hello)?;

        let response = hello.response.as_deref().ok_or_else(|| {
            ProtocolError::HandshakeError(constants::ERR_MISSING_RESPONSE.into())
        })?;
        verify_response(&remote_key, response, &own_challenge)?;

        let confirm = HandshakeMessage::Confirm {
            response: self.respond(&remote_challenge),
        };
        write_message(conn, &confirm, max_bytes).await?;

        debug!(remote = %hello.document.id, "Outbound handshake complete");
        self.identity_for(hello.document, remote_key, &own_challenge, &remote_challenge)
    }

    #[instrument(skip(self, conn), fields(peer = %conn.remote_addr()))]
    async fn respond_to(&self, conn: &mut Connection) -> Result<PeerIdentity> {
        let max_bytes = self.message_limit(conn);
        let hello = match read_message(conn, max_bytes).await? {
            HandshakeMessage::Hello(hello) => hello,
            HandshakeMessage::Confirm { .. } => {
                return Err(ProtocolError::UnexpectedMessage(
                    constants::ERR_UNEXPECTED_MESSAGE.into(),
                ))
            }
        };
        if hello.response.is_some() {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_UNEXPECTED_RESPONSE.into(),
            ));
        }
        let (remote_key, remote_challenge) = self.accept_hello(&hello)?;

        let own_challenge: [u8; CHALLENGE_SIZE] = rand::random();
        let reply = self.hello(&own_challenge, Some(self.respond(&remote_challenge)))?;
        write_message(conn, &reply, max_bytes).await?;

        let response = match read_message(conn, max_bytes).await? {
            HandshakeMessage::Confirm { response } => response,
            HandshakeMessage::Hello(_) => {
                return Err(ProtocolError::UnexpectedMessage(
                    constants::ERR_UNEXPECTED_MESSAGE.into(),
                ))
            }
        };
        verify_response(&remote_key, &response, &own_challenge)?;

        debug!(remote = %hello.document.id, "Inbound handshake complete");
        self.identity_for(hello.document, remote_key, &remote_challenge, &own_challenge)
    }
}

#[async_trait]
impl Handshake for DidHandshake {
    async fn handshake(&self, conn: &mut Connection) -> Result<Option<PeerIdentity>> {
        let identity = if conn.is_outbound() {
            self.initiate(conn).await
        } else {
            self.respond_to(conn).await
        };

        match identity {
            Ok(identity) => Ok(Some(identity)),
            Err(e) => {
                warn!(
                    peer = %conn.remote_addr(),
                    error = %e,
                    "{}",
                    constants::ERR_HANDSHAKE_FAILED
                );
                Err(e)
            }
        }
    }
}

impl fmt::Debug for DidHandshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DidHandshake")
            .field("identity", &self.identity.identifier())
            .field("max_message_bytes", &self.max_message_bytes)
            .finish_non_exhaustive()
    }
}

/// Send one handshake message as `Handshake` chunks ending in `HandshakeEnd`.
pub async fn write_message(
    conn: &mut Connection,
    message: &HandshakeMessage,
    max_bytes: usize,
) -> Result<()> {
    let json = message.to_json()?;
    if json.len() > max_bytes {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_HANDSHAKE_TOO_LARGE.into(),
        ));
    }

    let chunk_count = json.len().div_ceil(MAX_PACKET_PAYLOAD).max(1);
    for (i, chunk) in json.chunks(MAX_PACKET_PAYLOAD).enumerate() {
        let command = if i + 1 == chunk_count {
            Command::HandshakeEnd
        } else {
            Command::Handshake
        };
        conn.send_packet(Packet::encode(command, chunk)?).await?;
    }
    Ok(())
}

/// Reassemble one handshake message, verifying every chunk's checksum.
pub async fn read_message(conn: &mut Connection, max_bytes: usize) -> Result<HandshakeMessage> {
    let mut json = Vec::new();
    loop {
        let packet = conn.recv_packet().await?;
        packet.check()?;

        if json.len() + packet.payload().len() > max_bytes {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_HANDSHAKE_TOO_LARGE.into(),
            ));
        }
        json.extend_from_slice(packet.payload());

        match packet.command() {
            Command::Handshake => continue,
            Command::HandshakeEnd => break,
            other => {
                return Err(ProtocolError::UnexpectedMessage(format!(
                    "{} during handshake",
                    other
                )))
            }
        }
    }
    HandshakeMessage::from_json(&json)
}

fn challenge_data(challenge: &[u8; CHALLENGE_SIZE], address: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(CHALLENGE_SIZE + address.len());
    data.extend_from_slice(challenge);
    data.extend_from_slice(address.as_bytes());
    data
}

fn verify_response(
    remote_key: &VerifyingKey,
    response: &str,
    own_challenge: &[u8; CHALLENGE_SIZE],
) -> Result<()> {
    let signature = parse_signature(&decode_bs58(response)?)?;
    remote_key
        .verify(&challenge_data(own_challenge, &address_for(remote_key)), &signature)
        .map_err(|_| ProtocolError::HandshakeError(constants::ERR_RESPONSE_INVALID.into()))
}

/// Derive the per-peer session key from the static DH secret and both challenges.
fn derive_session_key(
    shared_secret: &[u8; 32],
    initiator_challenge: &[u8; CHALLENGE_SIZE],
    responder_challenge: &[u8; CHALLENGE_SIZE],
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret);
    hasher.update(initiator_challenge);
    hasher.update(responder_challenge);
    hasher.finalize().into()
}

fn decode_bs58(encoded: &str) -> Result<Vec<u8>> {
    bs58::decode(encoded)
        .into_vec()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()).into())
}

fn decode_challenge(encoded: &str) -> Result<[u8; CHALLENGE_SIZE]> {
    decode_bs58(encoded)?
        .as_slice()
        .try_into()
        .map_err(|_| ProtocolError::HandshakeError(constants::ERR_INVALID_CHALLENGE.into()))
}
