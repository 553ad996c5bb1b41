//! Message content carried inside an RPC envelope.
//!
//! ```text
//! Public:  [0x00] [payload <= 49]
//! Private: [0x01] [nonce 12] [ciphertext + tag, plaintext <= 21]
//! ```
//!
//! The whole encoding must fit the 50-byte RPC payload.

use crate::core::buffer::BoundedBytes;
use crate::error::{CryptoError, FrameError, Result};
use crate::protocol::rpc::MAX_RPC_PAYLOAD;
use crate::utils::crypto::{self, KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Largest public payload.
pub const MAX_PUBLIC_PAYLOAD: usize = MAX_RPC_PAYLOAD - 1;
/// Largest private plaintext.
pub const MAX_PRIVATE_PLAINTEXT: usize = MAX_RPC_PAYLOAD - 1 - NONCE_SIZE - TAG_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Visibility {
    Public = 0x00,
    Private = 0x01,
}

impl TryFrom<u8> for Visibility {
    type Error = FrameError;

    fn try_from(tag: u8) -> std::result::Result<Self, FrameError> {
        match tag {
            0x00 => Ok(Visibility::Public),
            0x01 => Ok(Visibility::Private),
            other => Err(FrameError::UnknownVisibility(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent {
    visibility: Visibility,
    /// Payload for public messages, `nonce ‖ ciphertext` for private ones
    body: BoundedBytes<MAX_PUBLIC_PAYLOAD>,
}

impl MessageContent {
    pub fn public(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            visibility: Visibility::Public,
            body: BoundedBytes::from_slice(payload)?,
        })
    }

    /// Seal `plaintext` under a 32-byte shared key.
    pub fn private(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> Result<Self> {
        if plaintext.len() > MAX_PRIVATE_PLAINTEXT {
            return Err(FrameError::PayloadTooLarge {
                size: plaintext.len(),
                max: MAX_PRIVATE_PLAINTEXT,
            }
            .into());
        }
        let sealed = crypto::encrypt(plaintext, key)?;
        Ok(Self {
            visibility: Visibility::Private,
            body: BoundedBytes::from_slice(&sealed)?,
        })
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Plaintext of the message. Private messages need the shared key.
    pub fn open(&self, key: Option<&[u8; KEY_SIZE]>) -> Result<Vec<u8>> {
        match self.visibility {
            Visibility::Public => Ok(self.body.to_vec()),
            Visibility::Private => {
                let key = key.ok_or(CryptoError::MissingKey("session key"))?;
                crypto::decrypt(&self.body, key)
            }
        }
    }

    pub fn encoded_len(&self) -> usize {
        1 + self.body.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.push(self.visibility as u8);
        bytes.extend_from_slice(&self.body);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (&tag, body) = bytes.split_first().ok_or(FrameError::Truncated {
            needed: 1,
            available: 0,
        })?;
        let visibility = Visibility::try_from(tag)?;

        if visibility == Visibility::Private && body.len() < NONCE_SIZE + TAG_SIZE {
            return Err(FrameError::Truncated {
                needed: 1 + NONCE_SIZE + TAG_SIZE,
                available: bytes.len(),
            }
            .into());
        }

        Ok(Self {
            visibility,
            body: BoundedBytes::from_slice(body)?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    const KEY: [u8; KEY_SIZE] = [0x42; KEY_SIZE];

    #[test]
    fn test_public_layout() {
        let msg = MessageContent::public(b"hi").unwrap();
        assert_eq!(msg.to_bytes(), vec![0x00, b'h', b'i']);
        assert_eq!(msg.open(None).unwrap(), b"hi");
    }

    #[test]
    fn test_public_size_limit() {
        assert!(MessageContent::public(&[0u8; MAX_PUBLIC_PAYLOAD]).is_ok());
        assert!(matches!(
            MessageContent::public(&[0u8; MAX_PUBLIC_PAYLOAD + 1]),
            Err(ProtocolError::Frame(FrameError::PayloadTooLarge { .. }))
        ));
    }

    #[test]
    fn test_private_layout_and_open() {
        let msg = MessageContent::private(b"secret", &KEY).unwrap();
        let bytes = msg.to_bytes();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes.len(), 1 + NONCE_SIZE + 6 + TAG_SIZE);

        let parsed = MessageContent::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.visibility(), Visibility::Private);
        assert_eq!(parsed.open(Some(&KEY)).unwrap(), b"secret");
    }

    #[test]
    fn test_private_fits_rpc_payload_at_limit() {
        let msg = MessageContent::private(&[7u8; MAX_PRIVATE_PLAINTEXT], &KEY).unwrap();
        assert_eq!(msg.encoded_len(), MAX_RPC_PAYLOAD);
        assert!(MessageContent::private(&[7u8; MAX_PRIVATE_PLAINTEXT + 1], &KEY).is_err());
    }

    #[test]
    fn test_private_needs_key() {
        let msg = MessageContent::private(b"x", &KEY).unwrap();
        assert!(matches!(
            msg.open(None),
            Err(ProtocolError::Crypto(CryptoError::MissingKey(_)))
        ));
        assert!(msg.open(Some(&[0u8; KEY_SIZE])).is_err());
    }

    #[test]
    fn test_from_bytes_rejects_bad_input() {
        assert!(MessageContent::from_bytes(&[]).is_err());
        assert!(matches!(
            MessageContent::from_bytes(&[0x07, 1, 2]),
            Err(ProtocolError::Frame(FrameError::UnknownVisibility(0x07)))
        ));
        assert!(matches!(
            MessageContent::from_bytes(&[0x01; 10]),
            Err(ProtocolError::Frame(FrameError::Truncated { .. }))
        ));
    }
}
