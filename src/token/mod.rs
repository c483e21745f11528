//! Hardware-token challenge/response as a second authentication factor.
//!
//! The vault never stores a token response.  Enrollment records only the
//! random challenge (plus the device serial and a timestamp); at open
//! time the live device must reproduce the response, which is then
//! folded into the password-derived KEK.  Without the physical token the
//! effective KEK is unrecoverable even with the correct password.
//!
//! [`TokenDevice`] is the seam for real hardware drivers.  [`HmacToken`]
//! is the shipped software backend: HMAC-SHA256 over the challenge with
//! a 32-byte secret read from a keyfile.

use std::path::Path;

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::errors::{Result, TokenFailure, VaultError};

type HmacSha256 = Hmac<Sha256>;

/// Size of a per-user token challenge in bytes.
pub const CHALLENGE_LEN: usize = 32;

/// Size of the vault-wide policy challenge in bytes.
pub const POLICY_CHALLENGE_LEN: usize = 64;

/// Minimum acceptable response length for key combination.
pub const MIN_RESPONSE_LEN: usize = 32;

/// Token algorithm identifier stored in the policy (HMAC-SHA256).
pub const TOKEN_ALG_HMAC_SHA256: u8 = 0x02;

/// A challenge/response token device.
pub trait TokenDevice {
    /// Stable device serial, compared against the enrolled serial.
    fn serial(&self) -> &str;

    /// Compute the response to a challenge.
    fn challenge_response(&self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// Software token: HMAC-SHA256 over the challenge with a keyfile secret.
pub struct HmacToken {
    secret: [u8; 32],
    serial: String,
}

impl HmacToken {
    pub fn new(secret: [u8; 32], serial: impl Into<String>) -> Self {
        Self {
            secret,
            serial: serial.into(),
        }
    }

    /// Load the token secret from a keyfile.
    ///
    /// Any file works; the secret is SHA-256 of the file contents so
    /// short or long keyfiles both yield exactly 32 bytes.  The serial
    /// is a short hex prefix of a second-round hash, stable per keyfile.
    pub fn from_keyfile(path: &Path) -> Result<Self> {
        let mut contents = std::fs::read(path).map_err(|e| {
            VaultError::Token(TokenFailure::Device(format!(
                "cannot read keyfile {}: {e}",
                path.display()
            )))
        })?;
        if contents.is_empty() {
            return Err(TokenFailure::Device("keyfile is empty".into()).into());
        }

        let secret: [u8; 32] = Sha256::digest(&contents).into();
        contents.zeroize();

        let serial_digest = Sha256::digest(secret);
        let serial: String = serial_digest[..6]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        Ok(Self { secret, serial })
    }
}

impl TokenDevice for HmacToken {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn challenge_response(&self, challenge: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| TokenFailure::Device(format!("HMAC init failed: {e}")))?;
        mac.update(challenge);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl Drop for HmacToken {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

/// Enrollment data stored in a key slot.
#[derive(Debug, Clone)]
pub struct TokenEnrollment {
    pub challenge: [u8; CHALLENGE_LEN],
    pub serial: String,
    pub enrolled_at: i64,
}

/// Enroll a device: mint a fresh per-user challenge and verify the
/// device answers it before anything is committed to the slot.
pub fn enroll(device: &dyn TokenDevice) -> Result<TokenEnrollment> {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut challenge);

    // A device that cannot answer now will not answer at open time.
    let mut response = device.challenge_response(&challenge)?;
    if response.len() < MIN_RESPONSE_LEN {
        let got = response.len();
        response.zeroize();
        return Err(TokenFailure::ResponseTooShort {
            got,
            need: MIN_RESPONSE_LEN,
        }
        .into());
    }
    response.zeroize();

    Ok(TokenEnrollment {
        challenge,
        serial: device.serial().to_string(),
        enrolled_at: chrono::Utc::now().timestamp(),
    })
}

/// Generate the vault-wide policy challenge written at creation.
pub fn generate_policy_challenge() -> [u8; POLICY_CHALLENGE_LEN] {
    let mut challenge = [0u8; POLICY_CHALLENGE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut challenge);
    challenge
}

/// Obtain a response from an enrolled device, enforcing the serial match.
pub fn respond(
    device: &dyn TokenDevice,
    enrolled_serial: &str,
    challenge: &[u8],
) -> Result<Vec<u8>> {
    if device.serial() != enrolled_serial {
        return Err(TokenFailure::Unauthorized.into());
    }
    device.challenge_response(challenge)
}

/// Fold a token response into a password-derived KEK.
///
/// Responses shorter than 32 bytes are rejected outright — padding them
/// would leave the padded tail of the KEK untouched by the token factor.
/// Longer responses are compressed to 32 bytes with SHA-256, then XORed
/// into the KEK byte-for-byte.
pub fn combine_with_token(kek: &[u8; 32], response: &[u8]) -> Result<[u8; 32]> {
    if response.len() < MIN_RESPONSE_LEN {
        return Err(TokenFailure::ResponseTooShort {
            got: response.len(),
            need: MIN_RESPONSE_LEN,
        }
        .into());
    }

    let material: [u8; 32] = if response.len() == 32 {
        let mut m = [0u8; 32];
        m.copy_from_slice(response);
        m
    } else {
        Sha256::digest(response).into()
    };

    let mut combined = [0u8; 32];
    for (i, byte) in combined.iter_mut().enumerate() {
        *byte = kek[i] ^ material[i];
    }
    Ok(combined)
}
