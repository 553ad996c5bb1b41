//! DID document.
//!
//! The document is exchanged during the handshake as canonical JSON: the
//! fields serialize in declaration order and the signature covers exactly
//! those bytes, so a document must round-trip through serde unchanged.

use crate::did::identity::identifier_for;
use crate::error::{CryptoError, ProtocolError, Result, VerifyError};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const ED25519_METHOD_TYPE: &str = "Ed25519VerificationKey2018";
pub const X25519_METHOD_TYPE: &str = "X25519KeyAgreementKey2019";

pub const DID_CONTEXTS: [&str; 3] = [
    "https://www.w3.org/ns/did/v1",
    "https://w3id.org/security/suites/ed25519-2018/v1",
    "https://w3id.org/security/suites/x25519-2019/v1",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub method_type: String,
    pub controller: String,
    #[serde(rename = "publicKeyBase58")]
    pub public_key_base58: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DidDocument {
    #[serde(rename = "@context")]
    pub context: Vec<String>,
    pub id: String,
    #[serde(rename = "verificationMethod")]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(rename = "keyAgreement")]
    pub key_agreement: Vec<VerificationMethod>,
    #[serde(default)]
    pub service: Vec<Service>,
    /// RFC 3339 creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    pub version: u32,
}

impl DidDocument {
    /// Canonical JSON bytes, the input to document signatures.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// SHA-256 of the canonical bytes.
    pub fn digest(&self) -> Result<[u8; 32]> {
        Ok(Sha256::digest(self.canonical_bytes()?).into())
    }

    /// The single Ed25519 verification key. The document id must be the
    /// identifier derived from that key.
    pub fn ed25519_key(&self) -> Result<VerifyingKey> {
        let method = single_method(
            &self.verification_method,
            ED25519_METHOD_TYPE,
            "Ed25519 verification method",
        )?;
        let key = VerifyingKey::from_bytes(&decode_key(&method.public_key_base58)?)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        if identifier_for(&key) != self.id {
            return Err(CryptoError::KeyMismatch.into());
        }
        Ok(key)
    }

    /// The single X25519 key-agreement key.
    pub fn x25519_key(&self) -> Result<[u8; 32]> {
        let method = single_method(
            &self.key_agreement,
            X25519_METHOD_TYPE,
            "X25519 key agreement",
        )?;
        decode_key(&method.public_key_base58)
    }

    pub fn created_at(&self) -> std::result::Result<DateTime<Utc>, VerifyError> {
        let created = self.created.as_deref().ok_or(VerifyError::MissingCreatedAt)?;
        DateTime::parse_from_rfc3339(created)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| VerifyError::MalformedTimestamp(created.to_string()))
    }

    /// Controllers named by the verification methods.
    pub fn controllers(&self) -> impl Iterator<Item = &str> {
        self.verification_method
            .iter()
            .map(|m| m.controller.as_str())
    }
}

fn single_method<'a>(
    methods: &'a [VerificationMethod],
    method_type: &str,
    what: &'static str,
) -> Result<&'a VerificationMethod> {
    let mut matching = methods.iter().filter(|m| m.method_type == method_type);
    let method = matching.next().ok_or(CryptoError::MissingKey(what))?;
    if matching.next().is_some() {
        return Err(CryptoError::InvalidKey(format!("more than one {what}")).into());
    }
    Ok(method)
}

fn decode_key(encoded: &str) -> Result<[u8; 32]> {
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    bytes.as_slice().try_into().map_err(|_| {
        ProtocolError::from(CryptoError::InvalidKey(format!(
            "expected 32 key bytes, got {}",
            bytes.len()
        )))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::did::identity::Did;

    fn sample() -> (Did, DidDocument) {
        let did = Did::from_seeds([7u8; 32], [8u8; 32], vec![]);
        let doc = did.document();
        (did, doc)
    }

    #[test]
    fn test_json_field_names() {
        let (_, doc) = sample();
        let json = String::from_utf8(doc.canonical_bytes().unwrap()).unwrap();
        let context = json.find("\"@context\"").unwrap();
        let id = json.find("\"id\"").unwrap();
        let vm = json.find("\"verificationMethod\"").unwrap();
        let ka = json.find("\"keyAgreement\"").unwrap();
        let created = json.find("\"created\"").unwrap();
        assert!(context < id && id < vm && vm < ka && ka < created);
        assert!(json.contains("\"publicKeyBase58\""));
        assert!(json.contains("\"type\":\"Ed25519VerificationKey2018\""));
    }

    #[test]
    fn test_canonical_bytes_survive_round_trip() {
        let (_, doc) = sample();
        let bytes = doc.canonical_bytes().unwrap();
        let parsed: DidDocument = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.canonical_bytes().unwrap(), bytes);
        assert_eq!(parsed.digest().unwrap(), doc.digest().unwrap());
    }

    #[test]
    fn test_key_extraction() {
        let (did, doc) = sample();
        assert_eq!(doc.ed25519_key().unwrap(), did.verifying_key());
        assert_eq!(doc.x25519_key().unwrap(), did.agreement_public());
    }

    #[test]
    fn test_missing_key() {
        let (_, mut doc) = sample();
        doc.verification_method.clear();
        assert!(matches!(
            doc.ed25519_key(),
            Err(ProtocolError::Crypto(CryptoError::MissingKey(_)))
        ));
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let (_, mut doc) = sample();
        let extra = doc.key_agreement[0].clone();
        doc.key_agreement.push(extra);
        assert!(matches!(
            doc.x25519_key(),
            Err(ProtocolError::Crypto(CryptoError::InvalidKey(_)))
        ));
    }

    #[test]
    fn test_foreign_key_under_our_id_rejected() {
        let (_, mut doc) = sample();
        let other = Did::from_seeds([9u8; 32], [9u8; 32], vec![]).document();
        doc.verification_method = other.verification_method;
        assert!(matches!(
            doc.ed25519_key(),
            Err(ProtocolError::Crypto(CryptoError::KeyMismatch))
        ));
    }

    #[test]
    fn test_created_at_parsing() {
        let (_, mut doc) = sample();
        assert!(doc.created_at().is_ok());

        doc.created = Some("yesterday".into());
        assert_eq!(
            doc.created_at().unwrap_err(),
            VerifyError::MalformedTimestamp("yesterday".into())
        );

        doc.created = None;
        assert_eq!(doc.created_at().unwrap_err(), VerifyError::MissingCreatedAt);
    }
}
