//! At-rest encryption of TOTP secrets.
//!
//! The engine never writes decrypted key material to storage: profiles hold
//! only sealed bytes, and decryption happens transiently inside a call.
//! Key management itself is the caller's concern; implement [`SecretVault`]
//! over your KMS or key file and hand it to the engine.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use rand::RngCore;

use crate::error::{GatekeyError, Result};
use crate::totp::SecretBytes;

/// AES-GCM nonce length in bytes.
const NONCE_LENGTH: usize = 12;

/// Seals and opens TOTP key material for storage.
pub trait SecretVault: Send + Sync {
    /// Encrypt plaintext key material for storage.
    fn seal(&self, secret: &SecretBytes) -> Result<Vec<u8>>;

    /// Decrypt sealed bytes back into key material.
    fn open(&self, sealed: &[u8]) -> Result<SecretBytes>;
}

/// AES-256-GCM vault over a caller-supplied key.
///
/// Output layout is `nonce || ciphertext`, with a fresh random nonce per
/// seal.
pub struct AesGcmVault {
    cipher: Aes256Gcm,
}

impl AesGcmVault {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }
}

impl SecretVault for AesGcmVault {
    fn seal(&self, secret: &SecretBytes) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, secret.as_bytes())
            .map_err(|_| GatekeyError::vault("encryption failed"))?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<SecretBytes> {
        if sealed.len() <= NONCE_LENGTH {
            return Err(GatekeyError::vault("sealed secret too short"));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LENGTH);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| GatekeyError::vault("decryption failed"))?;

        Ok(SecretBytes::from(plaintext))
    }
}
