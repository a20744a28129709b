//! Cryptography for the upstream relay protocol
//!
//! Frames are sealed with ChaCha20-Poly1305 under a 32-byte key derived from
//! a user passphrase. Ciphertext layout: `nonce(12) || ciphertext+tag(16)`.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Wire key length
pub const KEY_LEN: usize = 32;

/// Random nonce prepended to every ciphertext
pub const NONCE_LEN: usize = 12;

/// Poly1305 authentication tag length
pub const TAG_LEN: usize = 16;

/// Fixed ciphertext expansion: nonce + tag
pub const OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Derive a wire key from a passphrase: SHA-256 over the trimmed UTF-8 bytes.
pub fn derive_key(passphrase: &str) -> [u8; KEY_LEN] {
    Sha256::digest(passphrase.trim().as_bytes()).into()
}

/// Authenticated encryption context for one tunnel
pub struct Cipher {
    inner: ChaCha20Poly1305,
}

impl Cipher {
    /// Create a cipher from a derived key
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            inner: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Seal a plaintext under a fresh random nonce.
    /// Output length is `plaintext.len() + OVERHEAD`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let sealed = self
            .inner
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Crypto)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a ciphertext produced by [`Cipher::encrypt`].
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < OVERHEAD {
            return Err(Error::Crypto);
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        self.inner
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| Error::Crypto)
    }
}
