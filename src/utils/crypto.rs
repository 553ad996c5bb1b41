//! Symmetric encryption for private message content.
//!
//! ChaCha20-Poly1305 with a 32-byte key and a 12-byte nonce. [`Crypto`] keeps a
//! keyed cipher for repeated use. [`encrypt`] and [`decrypt`] are the one-shot
//! collaborator primitives: they generate the nonce and prepend it to the
//! sealed bytes.

use crate::error::{CryptoError, Result};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use zeroize::Zeroize;

/// Size of a symmetric key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of a nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the Poly1305 authentication tag.
pub const TAG_SIZE: usize = 16;

pub struct Crypto {
    cipher: ChaCha20Poly1305,
}

impl Crypto {
    pub fn new(key_bytes: &[u8; KEY_SIZE]) -> Self {
        let key = Key::from_slice(key_bytes);
        Self {
            cipher: ChaCha20Poly1305::new(key),
        }
    }

    /// Encrypt `data`; output is ciphertext followed by the 16-byte tag.
    pub fn encrypt(&self, data: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
        self.cipher
            .encrypt(Nonce::from_slice(nonce), data)
            .map_err(|_| CryptoError::EncryptionFailure.into())
    }

    pub fn decrypt(&self, data: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
        self.cipher
            .decrypt(Nonce::from_slice(nonce), data)
            .map_err(|_| CryptoError::DecryptionFailure.into())
    }

    /// Fresh random nonce. Never reuse one under the same key.
    pub fn generate_nonce() -> [u8; NONCE_SIZE] {
        rand::random()
    }
}

/// Seal `plaintext` under `key`, returning `nonce ‖ ciphertext ‖ tag`.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>> {
    let mut nonce = Crypto::generate_nonce();
    let ciphertext = Crypto::new(key).encrypt(plaintext, &nonce)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    nonce.zeroize();
    Ok(sealed)
}

/// Open bytes produced by [`encrypt`].
pub fn decrypt(sealed: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailure.into());
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);
    Crypto::new(key).decrypt(ciphertext, &nonce)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn test_encrypt_decrypt() {
        let key = [7u8; KEY_SIZE];
        let sealed = encrypt(b"hello peer", &key).unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 10 + TAG_SIZE);
        assert_eq!(decrypt(&sealed, &key).unwrap(), b"hello peer");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(b"secret", &[1u8; KEY_SIZE]).unwrap();
        let err = decrypt(&sealed, &[2u8; KEY_SIZE]).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Crypto(CryptoError::DecryptionFailure)
        ));
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(decrypt(&[0u8; NONCE_SIZE + TAG_SIZE - 1], &[0u8; KEY_SIZE]).is_err());
    }

    #[test]
    fn test_nonces_differ() {
        assert_ne!(Crypto::generate_nonce(), Crypto::generate_nonce());
    }
}
