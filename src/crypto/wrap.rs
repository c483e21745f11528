//! AES-256 key wrapping (RFC 3394).
//!
//! Every key slot stores the shared DEK wrapped under that user's KEK.
//! The wrap is deterministic (no nonce) and carries an 8-byte integrity
//! check value, so the 32-byte DEK becomes a 40-byte blob.
//!
//! The ICV check on unwrap is the **only** wrong-password signal in the
//! whole engine: a wrong password derives a wrong KEK, the unwrap fails
//! its integrity check, and the caller sees `Authentication`.

use aes_kw::KekAes256;
use zeroize::Zeroize;

use crate::crypto::keys::Dek;
use crate::errors::{Result, VaultError};

/// Size of the plaintext DEK in bytes.
pub const DEK_LEN: usize = 32;

/// Size of the wrapped DEK blob: 32-byte key + 8-byte ICV.
pub const WRAPPED_DEK_LEN: usize = 40;

/// Wrap a DEK under a KEK.
///
/// Deterministic: the same KEK and DEK always produce the same blob.
pub fn wrap_dek(kek: &[u8; 32], dek: &Dek) -> Result<[u8; WRAPPED_DEK_LEN]> {
    let cipher = KekAes256::from(*kek);
    let mut wrapped = [0u8; WRAPPED_DEK_LEN];
    cipher
        .wrap(dek.as_bytes(), &mut wrapped)
        .map_err(|e| VaultError::Crypto(format!("key wrap failed: {e}")))?;
    Ok(wrapped)
}

/// Unwrap a DEK blob with a KEK.
///
/// An ICV mismatch means the KEK is wrong (or the blob is corrupt) and
/// maps to [`VaultError::Authentication`].
pub fn unwrap_dek(kek: &[u8; 32], wrapped: &[u8]) -> Result<Dek> {
    if wrapped.len() != WRAPPED_DEK_LEN {
        return Err(VaultError::Format(format!(
            "wrapped key blob is {} bytes, expected {WRAPPED_DEK_LEN}",
            wrapped.len()
        )));
    }

    let cipher = KekAes256::from(*kek);
    let mut dek_bytes = [0u8; DEK_LEN];
    if cipher.unwrap(wrapped, &mut dek_bytes).is_err() {
        dek_bytes.zeroize();
        return Err(VaultError::Authentication);
    }

    let dek = Dek::new(dek_bytes);
    dek_bytes.zeroize();
    Ok(dek)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_unwrap_round_trip() {
        let kek = [0x11u8; 32];
        let dek = Dek::new([0x22u8; 32]);

        let wrapped = wrap_dek(&kek, &dek).unwrap();
        assert_eq!(wrapped.len(), WRAPPED_DEK_LEN);

        let recovered = unwrap_dek(&kek, &wrapped).unwrap();
        assert_eq!(recovered.as_bytes(), dek.as_bytes());
    }

    #[test]
    fn wrap_is_deterministic() {
        let kek = [0x11u8; 32];
        let dek = Dek::new([0x22u8; 32]);
        assert_eq!(wrap_dek(&kek, &dek).unwrap(), wrap_dek(&kek, &dek).unwrap());
    }

    #[test]
    fn wrong_kek_fails_as_authentication() {
        let kek = [0x11u8; 32];
        let dek = Dek::new([0x22u8; 32]);
        let wrapped = wrap_dek(&kek, &dek).unwrap();

        let mut wrong = kek;
        wrong[0] ^= 0x01;
        match unwrap_dek(&wrong, &wrapped) {
            Err(VaultError::Authentication) => {}
            other => panic!("expected Authentication, got {other:?}"),
        }
    }

    #[test]
    fn corrupted_blob_fails_as_authentication() {
        let kek = [0x11u8; 32];
        let dek = Dek::new([0x22u8; 32]);
        let mut wrapped = wrap_dek(&kek, &dek).unwrap();
        wrapped[39] ^= 0xFF;

        assert!(matches!(
            unwrap_dek(&kek, &wrapped),
            Err(VaultError::Authentication)
        ));
    }

    #[test]
    fn bad_blob_length_is_a_format_error() {
        let kek = [0u8; 32];
        assert!(matches!(
            unwrap_dek(&kek, &[0u8; 39]),
            Err(VaultError::Format(_))
        ));
    }
}
