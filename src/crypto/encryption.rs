//! AES-256-GCM payload encryption.
//!
//! The vault header stores the 12-byte IV as its own field, so unlike
//! the usual prepend-the-nonce convention the IV travels separately
//! here: `encrypt` returns `(iv, ciphertext + 16-byte tag)` and
//! `decrypt` takes both back.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::crypto::keys::Dek;
use crate::errors::{Result, VaultError};

/// Size of the AES-256-GCM IV in bytes.
pub const IV_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext` under the DEK with a fresh random IV.
///
/// Returns the IV and the ciphertext (auth tag appended).
pub fn encrypt(dek: &Dek, plaintext: &[u8]) -> Result<([u8; IV_LEN], Vec<u8>)> {
    let cipher = Aes256Gcm::new_from_slice(dek.as_bytes())
        .map_err(|e| VaultError::Crypto(format!("invalid key length: {e}")))?;

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| VaultError::Crypto(format!("encryption failed: {e}")))?;

    Ok((iv, ciphertext))
}

/// Decrypt ciphertext produced by [`encrypt`].
///
/// A tag mismatch means the DEK is wrong or the data was tampered with.
/// With a freshly unwrapped DEK the wrap ICV has already vouched for the
/// key, so the failure is reported as [`VaultError::Integrity`].
pub fn decrypt(dek: &Dek, iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(VaultError::Integrity);
    }

    let cipher = Aes256Gcm::new_from_slice(dek.as_bytes())
        .map_err(|e| VaultError::Crypto(format!("invalid key length: {e}")))?;

    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| VaultError::Integrity)
}
