//! Password-based key derivation and one-way username digesting.
//!
//! Two distinct jobs live here:
//!
//! - Deriving the 32-byte **KEK** (key-encryption key) from a user's
//!   password.  Only slow, tunable KDFs are acceptable: Argon2id or
//!   PBKDF2-HMAC-SHA256.
//! - Digesting usernames for key-slot lookup.  Fast SHA-3 hashes are
//!   fine here because usernames are identifiers, not secrets of the
//!   same grade as passwords.
//!
//! A SHA-3 family selection is **never** honored on the KEK path — a raw
//! fast hash is computable fast enough to make offline password guessing
//! cheap, so the module silently substitutes PBKDF2.  FIPS-restricted
//! mode additionally downgrades Argon2id to PBKDF2.

use argon2::{Algorithm, Argon2, Params, Version};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use sha3::{Digest, Sha3_256, Sha3_384, Sha3_512};

use crate::errors::{Result, VaultError};

/// Length of a per-user KEK salt in bytes (256 bits).
pub const SALT_LEN: usize = 32;

/// Length of a username-digest salt in bytes.
pub const USERNAME_SALT_LEN: usize = 16;

/// Length of the derived KEK in bytes (256 bits, for AES-256).
pub const KEK_LEN: usize = 32;

/// Maximum username digest size (SHA3-512 output).
pub const MAX_DIGEST_LEN: usize = 64;

/// Hard floor for PBKDF2 rounds.  Re-imposed on every load: the file's
/// own claim of safety is never trusted.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

/// Minimum Argon2id memory cost in KiB (8 MB).
pub const MIN_ARGON2_MEMORY_KIB: u32 = 8_192;

/// Closed set of supported algorithms.
///
/// The set is fixed by policy and compliance requirements, not
/// extensible at runtime, so this is an enum rather than a trait object.
/// Wire values match the on-disk policy byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KdfAlgorithm {
    Sha3_256 = 0x01,
    Sha3_384 = 0x02,
    Sha3_512 = 0x03,
    Pbkdf2Sha256 = 0x04,
    Argon2id = 0x05,
}

impl KdfAlgorithm {
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Sha3_256),
            0x02 => Some(Self::Sha3_384),
            0x03 => Some(Self::Sha3_512),
            0x04 => Some(Self::Pbkdf2Sha256),
            0x05 => Some(Self::Argon2id),
            _ => None,
        }
    }

    /// True for the fast-hash family — suitable for username digesting,
    /// never for a password KEK.
    pub fn is_fast_hash(self) -> bool {
        matches!(self, Self::Sha3_256 | Self::Sha3_384 | Self::Sha3_512)
    }

    /// Output size of the username digest for this algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Sha3_256 | Self::Pbkdf2Sha256 | Self::Argon2id => 32,
            Self::Sha3_384 => 48,
            Self::Sha3_512 => 64,
        }
    }
}

/// Cost parameters shared by both KDF families.
#[derive(Debug, Clone, Copy)]
pub struct KdfParams {
    /// PBKDF2-HMAC-SHA256 rounds.
    pub pbkdf2_iterations: u32,
    /// Argon2id memory cost in KiB.
    pub argon2_memory_kib: u32,
    /// Argon2id time cost.
    pub argon2_iterations: u32,
    /// Argon2id parallelism lanes.
    pub argon2_parallelism: u8,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: 600_000,
            argon2_memory_kib: 65_536,
            argon2_iterations: 3,
            argon2_parallelism: 4,
        }
    }
}

/// Resolve the algorithm actually used on the KEK path.
///
/// SHA-3 selections fall back to PBKDF2 (fast hashes are not KDFs), and
/// FIPS mode disallows Argon2id entirely.
pub fn effective_kek_algorithm(selected: KdfAlgorithm, fips_mode: bool) -> KdfAlgorithm {
    if selected.is_fast_hash() {
        return KdfAlgorithm::Pbkdf2Sha256;
    }
    if fips_mode && selected == KdfAlgorithm::Argon2id {
        return KdfAlgorithm::Pbkdf2Sha256;
    }
    selected
}

/// Derive a 32-byte KEK from a password and salt.
///
/// Always produces *a* key for any non-degenerate input — a wrong
/// password yields a wrong key, and the wrap integrity check downstream
/// is the only wrong-password signal.
pub fn derive_kek(
    password: &[u8],
    salt: &[u8],
    algorithm: KdfAlgorithm,
    params: &KdfParams,
    fips_mode: bool,
) -> Result<[u8; KEK_LEN]> {
    if salt.len() < USERNAME_SALT_LEN {
        return Err(VaultError::Crypto(format!(
            "salt too short: {} bytes, minimum {USERNAME_SALT_LEN}",
            salt.len()
        )));
    }

    match effective_kek_algorithm(algorithm, fips_mode) {
        KdfAlgorithm::Argon2id => derive_kek_argon2id(password, salt, params),
        _ => Ok(derive_kek_pbkdf2(password, salt, params.pbkdf2_iterations)),
    }
}

/// PBKDF2-HMAC-SHA256 KEK derivation, with the iteration floor enforced.
fn derive_kek_pbkdf2(password: &[u8], salt: &[u8], iterations: u32) -> [u8; KEK_LEN] {
    let rounds = iterations.max(MIN_PBKDF2_ITERATIONS);
    let mut kek = [0u8; KEK_LEN];
    pbkdf2_hmac::<Sha256>(password, salt, rounds, &mut kek);
    kek
}

/// Argon2id KEK derivation with the policy's cost parameters.
fn derive_kek_argon2id(
    password: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<[u8; KEK_LEN]> {
    let memory = params.argon2_memory_kib.max(MIN_ARGON2_MEMORY_KIB);
    let a2_params = Params::new(
        memory,
        params.argon2_iterations.max(1),
        u32::from(params.argon2_parallelism.max(1)),
        Some(KEK_LEN),
    )
    .map_err(|e| VaultError::Crypto(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, a2_params);

    let mut kek = [0u8; KEK_LEN];
    argon2
        .hash_password_into(password, salt, &mut kek)
        .map_err(|e| VaultError::Crypto(format!("Argon2id hashing failed: {e}")))?;
    Ok(kek)
}

/// A salted, one-way username digest.
///
/// Only the first `len` bytes of `bytes` are meaningful; the rest is
/// zero padding so the digest fits a fixed slot field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsernameDigest {
    pub bytes: [u8; MAX_DIGEST_LEN],
    pub len: u8,
}

impl UsernameDigest {
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Digest a username for slot lookup.  One-way: no plaintext username is
/// ever written to a slot.
///
/// SHA-3 variants absorb `salt || username`; the KDF variants use the
/// salt natively.  FIPS mode does not restrict this path — all five
/// algorithms are acceptable for identifiers.
pub fn digest_username(
    username: &str,
    salt: &[u8; USERNAME_SALT_LEN],
    algorithm: KdfAlgorithm,
    params: &KdfParams,
) -> Result<UsernameDigest> {
    let mut out = [0u8; MAX_DIGEST_LEN];
    let len = algorithm.digest_len();

    match algorithm {
        KdfAlgorithm::Sha3_256 => {
            let mut h = Sha3_256::new();
            h.update(salt);
            h.update(username.as_bytes());
            out[..len].copy_from_slice(&h.finalize());
        }
        KdfAlgorithm::Sha3_384 => {
            let mut h = Sha3_384::new();
            h.update(salt);
            h.update(username.as_bytes());
            out[..len].copy_from_slice(&h.finalize());
        }
        KdfAlgorithm::Sha3_512 => {
            let mut h = Sha3_512::new();
            h.update(salt);
            h.update(username.as_bytes());
            out[..len].copy_from_slice(&h.finalize());
        }
        KdfAlgorithm::Pbkdf2Sha256 => {
            // Identifier hashing, not authentication: a reduced round
            // count keeps lookup latency proportionate.
            let rounds = (params.pbkdf2_iterations / 10).max(10_000);
            pbkdf2_hmac::<Sha256>(username.as_bytes(), salt, rounds, &mut out[..len]);
        }
        KdfAlgorithm::Argon2id => {
            let a2_params = Params::new(
                params.argon2_memory_kib.max(MIN_ARGON2_MEMORY_KIB),
                params.argon2_iterations.max(1),
                u32::from(params.argon2_parallelism.max(1)),
                Some(len),
            )
            .map_err(|e| VaultError::Crypto(format!("invalid Argon2 params: {e}")))?;
            Argon2::new(Algorithm::Argon2id, Version::V0x13, a2_params)
                .hash_password_into(username.as_bytes(), salt, &mut out[..len])
                .map_err(|e| VaultError::Crypto(format!("Argon2id digest failed: {e}")))?;
        }
    }

    Ok(UsernameDigest {
        bytes: out,
        len: len as u8,
    })
}

/// Generate a cryptographically random 32-byte KEK salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Generate a random 16-byte username-digest salt.
pub fn generate_username_salt() -> [u8; USERNAME_SALT_LEN] {
    let mut salt = [0u8; USERNAME_SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
