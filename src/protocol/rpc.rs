//! Signed RPC envelope.
//!
//! ```text
//! [From(50, zero padded)] [Length(1)] [Payload(Length <= 50)] [Signature(64)]
//! ```
//!
//! The signature is Ed25519 over `from ‖ payload`; the length byte is not
//! signed. An envelope is built once per send and never mutated.

use crate::core::buffer::{AddressField, BoundedBytes, ADDRESS_FIELD_SIZE};
use crate::did::identity::{Did, SIGNATURE_SIZE};
use crate::error::{CryptoError, FrameError, Result};
use crate::protocol::message::MessageContent;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Largest payload an envelope carries.
pub const MAX_RPC_PAYLOAD: usize = 50;
/// Envelope overhead around the payload.
pub const RPC_OVERHEAD: usize = ADDRESS_FIELD_SIZE + 1 + SIGNATURE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rpc {
    from: AddressField,
    payload: BoundedBytes<MAX_RPC_PAYLOAD>,
    signature: [u8; SIGNATURE_SIZE],
}

impl Rpc {
    /// Wrap and sign a message from `sender`.
    pub fn new(message: &MessageContent, sender: &Did) -> Result<Rpc> {
        Self::with_payload(&message.to_bytes(), sender)
    }

    /// Wrap and sign raw payload bytes.
    pub fn with_payload(payload: &[u8], sender: &Did) -> Result<Rpc> {
        let payload = BoundedBytes::from_slice(payload)?;
        let from = AddressField::new(sender.address())?;
        let signature = sender.sign(&signed_data(&from, &payload));
        Ok(Rpc {
            from,
            payload,
            signature,
        })
    }

    /// Check the signature against the sender's verification key.
    pub fn verify(&self, key: &VerifyingKey) -> Result<()> {
        let signature = Signature::from_bytes(&self.signature);
        key.verify(&signed_data(&self.from, &self.payload), &signature)
            .map_err(|_| CryptoError::SignatureInvalid.into())
    }

    pub fn from_address(&self) -> Result<&str> {
        Ok(self.from.as_str()?)
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn signature(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.signature
    }

    /// Parse the payload as message content.
    pub fn message(&self) -> Result<MessageContent> {
        MessageContent::from_bytes(&self.payload)
    }

    pub fn encoded_len(&self) -> usize {
        RPC_OVERHEAD + self.payload.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.extend_from_slice(self.from.as_bytes());
        bytes.push(self.payload.len() as u8);
        bytes.extend_from_slice(&self.payload);
        bytes.extend_from_slice(&self.signature);
        bytes
    }

    /// Parse an envelope that spans exactly `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Rpc> {
        if bytes.len() < ADDRESS_FIELD_SIZE + 1 {
            return Err(FrameError::Truncated {
                needed: RPC_OVERHEAD,
                available: bytes.len(),
            }
            .into());
        }

        let length = bytes[ADDRESS_FIELD_SIZE] as usize;
        if length > MAX_RPC_PAYLOAD {
            return Err(FrameError::PayloadTooLarge {
                size: length,
                max: MAX_RPC_PAYLOAD,
            }
            .into());
        }

        let total = RPC_OVERHEAD + length;
        if bytes.len() < total {
            return Err(FrameError::Truncated {
                needed: total,
                available: bytes.len(),
            }
            .into());
        }
        if bytes.len() > total {
            return Err(FrameError::TrailingBytes(bytes.len() - total).into());
        }

        let mut from = [0u8; ADDRESS_FIELD_SIZE];
        from.copy_from_slice(&bytes[..ADDRESS_FIELD_SIZE]);
        let payload_start = ADDRESS_FIELD_SIZE + 1;
        let payload = BoundedBytes::from_slice(&bytes[payload_start..payload_start + length])?;
        let mut signature = [0u8; SIGNATURE_SIZE];
        signature.copy_from_slice(&bytes[payload_start + length..]);

        Ok(Rpc {
            from: AddressField::from_raw(from),
            payload,
            signature,
        })
    }
}

fn signed_data(from: &AddressField, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(ADDRESS_FIELD_SIZE + payload.len());
    data.extend_from_slice(from.as_bytes());
    data.extend_from_slice(payload);
    data
}
