//! Local DID identity.
//!
//! A [`Did`] owns an Ed25519 signing key and an X25519 key-agreement key.
//! Its identifier and address are pure functions of the Ed25519 public key:
//!
//! ```text
//! identifier = "did:key:z" + base58(0xed 0x01 ‖ ed25519_pub)
//! address    = "addr:"     + base58(sha3_256(ed25519_pub))
//! ```
//!
//! Identities are immutable once built and are shared behind `Arc`.

use crate::did::document::{
    DidDocument, Service, VerificationMethod, DID_CONTEXTS, ED25519_METHOD_TYPE,
    X25519_METHOD_TYPE,
};
use crate::error::{CryptoError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;
use x25519_dalek::{PublicKey as AgreementPublic, StaticSecret};
use zeroize::Zeroize;

/// Multicodec prefix for an Ed25519 public key.
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

pub const DID_KEY_PREFIX: &str = "did:key:z";
pub const ADDRESS_PREFIX: &str = "addr:";

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// A service endpoint advertised in the DID document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub service_type: String,
    pub endpoint: String,
}

impl ServiceEndpoint {
    pub fn new(service_type: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidMetadata {
    /// DID that controls this identity's keys; the identity itself when `None`
    pub controller: Option<String>,
    pub version: u32,
}

impl Default for DidMetadata {
    fn default() -> Self {
        Self {
            controller: None,
            version: 1,
        }
    }
}

pub struct Did {
    signing_key: SigningKey,
    agreement_secret: StaticSecret,
    agreement_public: AgreementPublic,
    identifier: String,
    address: String,
    services: Vec<ServiceEndpoint>,
    metadata: DidMetadata,
}

impl Did {
    /// Generate a fresh identity from OS entropy.
    pub fn generate(services: Vec<ServiceEndpoint>) -> Result<Self> {
        let mut signing_seed = [0u8; 32];
        let mut agreement_seed = [0u8; 32];
        getrandom::fill(&mut signing_seed)
            .and_then(|_| getrandom::fill(&mut agreement_seed))
            .map_err(|e| CryptoError::InvalidKey(format!("OS entropy unavailable: {e}")))?;

        let did = Self::from_seeds(signing_seed, agreement_seed, services);
        signing_seed.zeroize();
        agreement_seed.zeroize();
        Ok(did)
    }

    /// Rebuild an identity from its two 32-byte secret seeds.
    pub fn from_seeds(
        mut signing_seed: [u8; 32],
        mut agreement_seed: [u8; 32],
        services: Vec<ServiceEndpoint>,
    ) -> Self {
        let signing_key = SigningKey::from_bytes(&signing_seed);
        let agreement_secret = StaticSecret::from(agreement_seed);
        signing_seed.zeroize();
        agreement_seed.zeroize();

        let agreement_public = AgreementPublic::from(&agreement_secret);
        let verifying_key = signing_key.verifying_key();

        Self {
            identifier: identifier_for(&verifying_key),
            address: address_for(&verifying_key),
            signing_key,
            agreement_secret,
            agreement_public,
            services,
            metadata: DidMetadata::default(),
        }
    }

    /// Delegate control of this identity's keys to `controller`.
    pub fn with_controller(mut self, controller: impl Into<String>) -> Self {
        self.metadata.controller = Some(controller.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.metadata.version = version;
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn services(&self) -> &[ServiceEndpoint] {
        &self.services
    }

    pub fn metadata(&self) -> &DidMetadata {
        &self.metadata
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn agreement_public(&self) -> [u8; 32] {
        self.agreement_public.to_bytes()
    }

    /// Document stamped with the current time.
    pub fn document(&self) -> DidDocument {
        self.document_at(Utc::now())
    }

    /// Document stamped with `created`. Two calls with the same instant yield
    /// identical documents.
    pub fn document_at(&self, created: DateTime<Utc>) -> DidDocument {
        let controller = self
            .metadata
            .controller
            .clone()
            .unwrap_or_else(|| self.identifier.clone());

        DidDocument {
            context: DID_CONTEXTS.iter().map(|c| c.to_string()).collect(),
            id: self.identifier.clone(),
            verification_method: vec![VerificationMethod {
                id: format!("{}#keys-1", self.identifier),
                method_type: ED25519_METHOD_TYPE.to_string(),
                controller: controller.clone(),
                public_key_base58: bs58::encode(self.verifying_key().as_bytes()).into_string(),
            }],
            key_agreement: vec![VerificationMethod {
                id: format!("{}#keys-2", self.identifier),
                method_type: X25519_METHOD_TYPE.to_string(),
                controller,
                public_key_base58: bs58::encode(self.agreement_public.as_bytes()).into_string(),
            }],
            service: self
                .services
                .iter()
                .enumerate()
                .map(|(i, s)| Service {
                    id: format!("{}#service-{}", self.identifier, i + 1),
                    service_type: s.service_type.clone(),
                    service_endpoint: s.endpoint.clone(),
                })
                .collect(),
            created: Some(created.to_rfc3339_opts(SecondsFormat::Secs, true)),
            version: self.metadata.version,
        }
    }

    /// Sign the canonical JSON of `doc`.
    pub fn sign_document(&self, doc: &DidDocument) -> Result<[u8; SIGNATURE_SIZE]> {
        Ok(self.sign(&doc.canonical_bytes()?))
    }

    /// Verify `signature` over `doc` against this identity's key.
    pub fn verify_document(&self, doc: &DidDocument, signature: &[u8]) -> Result<()> {
        let signature = parse_signature(signature)?;
        self.verifying_key()
            .verify(&doc.canonical_bytes()?, &signature)
            .map_err(|_| CryptoError::SignatureInvalid.into())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }

    /// X25519 agreement with a remote static key. Fails on a low-order key.
    pub fn shared_secret(&self, remote: &[u8; 32]) -> Result<[u8; 32]> {
        let shared = self
            .agreement_secret
            .diffie_hellman(&AgreementPublic::from(*remote));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey("non-contributory X25519 key".into()).into());
        }
        Ok(shared.to_bytes())
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Did")
            .field("identifier", &self.identifier)
            .field("address", &self.address)
            .field("services", &self.services)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

pub fn identifier_for(key: &VerifyingKey) -> String {
    let mut bytes = Vec::with_capacity(ED25519_MULTICODEC.len() + 32);
    bytes.extend_from_slice(&ED25519_MULTICODEC);
    bytes.extend_from_slice(key.as_bytes());
    format!("{DID_KEY_PREFIX}{}", bs58::encode(bytes).into_string())
}

pub fn address_for(key: &VerifyingKey) -> String {
    let digest = Sha3_256::digest(key.as_bytes());
    format!("{ADDRESS_PREFIX}{}", bs58::encode(digest).into_string())
}

/// Parse a detached 64-byte Ed25519 signature.
pub fn parse_signature(bytes: &[u8]) -> Result<Signature> {
    let raw: [u8; SIGNATURE_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptoError::MalformedSignature(bytes.len()))?;
    Ok(Signature::from_bytes(&raw))
}
