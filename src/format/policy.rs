//! Vault-wide security policy, serialized as a fixed 132-byte record.
//!
//! The record size is constant so the slot list offset in the header is
//! computable without parsing.  All multi-byte fields are big-endian.
//!
//! Wire layout:
//!   [ require_token:1 | token_algorithm:1 | min_password_length:4
//!   | kdf_iterations:4 | password_history_depth:4
//!   | username_hash_algorithm:1 | argon2_memory_kib:4
//!   | argon2_iterations:4 | argon2_parallelism:1 | fips_mode:1
//!   | policy_challenge:64 | reserved:43 ]

use crate::crypto::kdf::{KdfAlgorithm, KdfParams, MIN_PBKDF2_ITERATIONS};
use crate::errors::{PolicyViolation, Result, VaultError};
use crate::history::MAX_HISTORY_DEPTH;
use crate::token::{POLICY_CHALLENGE_LEN, TOKEN_ALG_HMAC_SHA256};

/// Serialized policy size in bytes.
pub const POLICY_LEN: usize = 132;

/// Bounds for the configurable fields.
pub const MIN_PASSWORD_LENGTH_RANGE: (u32, u32) = (8, 128);
pub const ARGON2_MEMORY_RANGE: (u32, u32) = (8_192, 1_048_576);
pub const ARGON2_ITERATIONS_RANGE: (u32, u32) = (1, 10);
pub const ARGON2_PARALLELISM_RANGE: (u8, u8) = (1, 16);

/// The vault-wide security policy.  One per vault, admin-mutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityPolicy {
    pub require_token: bool,
    pub token_algorithm: u8,
    pub min_password_length: u32,
    pub kdf_iterations: u32,
    pub password_history_depth: u32,
    pub username_hash_algorithm: KdfAlgorithm,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u8,
    pub fips_mode: bool,
    pub policy_challenge: [u8; POLICY_CHALLENGE_LEN],
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            require_token: false,
            token_algorithm: TOKEN_ALG_HMAC_SHA256,
            min_password_length: 12,
            kdf_iterations: 600_000,
            password_history_depth: 5,
            username_hash_algorithm: KdfAlgorithm::Sha3_256,
            argon2_memory_kib: 65_536,
            argon2_iterations: 3,
            argon2_parallelism: 4,
            fips_mode: false,
            policy_challenge: [0u8; POLICY_CHALLENGE_LEN],
        }
    }
}

impl SecurityPolicy {
    /// The KDF cost parameters this policy configures.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            pbkdf2_iterations: self.kdf_iterations,
            argon2_memory_kib: self.argon2_memory_kib,
            argon2_iterations: self.argon2_iterations,
            argon2_parallelism: self.argon2_parallelism,
        }
    }

    /// Validate every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        let (min_pw, max_pw) = MIN_PASSWORD_LENGTH_RANGE;
        if !(min_pw..=max_pw).contains(&self.min_password_length) {
            return Err(PolicyViolation::InvalidPolicy(format!(
                "min_password_length {} out of range {min_pw}-{max_pw}",
                self.min_password_length
            ))
            .into());
        }
        if self.kdf_iterations < MIN_PBKDF2_ITERATIONS {
            return Err(PolicyViolation::InvalidPolicy(format!(
                "kdf_iterations {} below the {MIN_PBKDF2_ITERATIONS} floor",
                self.kdf_iterations
            ))
            .into());
        }
        if self.password_history_depth > MAX_HISTORY_DEPTH {
            return Err(PolicyViolation::InvalidPolicy(format!(
                "password_history_depth {} exceeds maximum {MAX_HISTORY_DEPTH}",
                self.password_history_depth
            ))
            .into());
        }
        let (min_m, max_m) = ARGON2_MEMORY_RANGE;
        if !(min_m..=max_m).contains(&self.argon2_memory_kib) {
            return Err(PolicyViolation::InvalidPolicy(format!(
                "argon2_memory_kib {} out of range {min_m}-{max_m}",
                self.argon2_memory_kib
            ))
            .into());
        }
        let (min_t, max_t) = ARGON2_ITERATIONS_RANGE;
        if !(min_t..=max_t).contains(&self.argon2_iterations) {
            return Err(PolicyViolation::InvalidPolicy(format!(
                "argon2_iterations {} out of range {min_t}-{max_t}",
                self.argon2_iterations
            ))
            .into());
        }
        let (min_p, max_p) = ARGON2_PARALLELISM_RANGE;
        if !(min_p..=max_p).contains(&self.argon2_parallelism) {
            return Err(PolicyViolation::InvalidPolicy(format!(
                "argon2_parallelism {} out of range {min_p}-{max_p}",
                self.argon2_parallelism
            ))
            .into());
        }
        if self.require_token && self.token_algorithm != TOKEN_ALG_HMAC_SHA256 {
            return Err(PolicyViolation::InvalidPolicy(format!(
                "unsupported token algorithm 0x{:02x}",
                self.token_algorithm
            ))
            .into());
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; POLICY_LEN] {
        let mut out = [0u8; POLICY_LEN];
        out[0] = self.require_token as u8;
        out[1] = self.token_algorithm;
        out[2..6].copy_from_slice(&self.min_password_length.to_be_bytes());
        out[6..10].copy_from_slice(&self.kdf_iterations.to_be_bytes());
        out[10..14].copy_from_slice(&self.password_history_depth.to_be_bytes());
        out[14] = self.username_hash_algorithm as u8;
        out[15..19].copy_from_slice(&self.argon2_memory_kib.to_be_bytes());
        out[19..23].copy_from_slice(&self.argon2_iterations.to_be_bytes());
        out[23] = self.argon2_parallelism;
        out[24] = self.fips_mode as u8;
        out[25..25 + POLICY_CHALLENGE_LEN].copy_from_slice(&self.policy_challenge);
        // Remaining bytes stay zero: reserved for format evolution.
        out
    }

    /// Parse a policy record.
    ///
    /// The KDF iteration floor is re-imposed here: a stored value below
    /// 100,000 is clamped up rather than trusted.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < POLICY_LEN {
            return Err(VaultError::Format(format!(
                "policy record is {} bytes, expected {POLICY_LEN}",
                bytes.len()
            )));
        }

        let username_hash_algorithm = KdfAlgorithm::from_wire(bytes[14]).ok_or_else(|| {
            VaultError::Format(format!("unknown username hash algorithm 0x{:02x}", bytes[14]))
        })?;

        let mut policy_challenge = [0u8; POLICY_CHALLENGE_LEN];
        policy_challenge.copy_from_slice(&bytes[25..25 + POLICY_CHALLENGE_LEN]);

        let policy = Self {
            require_token: bytes[0] != 0,
            token_algorithm: bytes[1],
            min_password_length: read_u32(&bytes[2..6]),
            kdf_iterations: read_u32(&bytes[6..10]).max(MIN_PBKDF2_ITERATIONS),
            password_history_depth: read_u32(&bytes[10..14]),
            username_hash_algorithm,
            argon2_memory_kib: read_u32(&bytes[15..19]),
            argon2_iterations: read_u32(&bytes[19..23]),
            argon2_parallelism: bytes[23],
            fips_mode: bytes[24] != 0,
            policy_challenge,
        };

        policy.validate()?;
        Ok(policy)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(bytes);
    u32::from_be_bytes(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_exactly_132_bytes() {
        let reserved = 43;
        assert_eq!(
            1 + 1 + 4 + 4 + 4 + 1 + 4 + 4 + 1 + 1 + POLICY_CHALLENGE_LEN + reserved,
            POLICY_LEN
        );
    }

    #[test]
    fn default_policy_round_trips() {
        let policy = SecurityPolicy::default();
        let parsed = SecurityPolicy::from_bytes(&policy.to_bytes()).unwrap();
        assert_eq!(parsed, policy);
    }

    #[test]
    fn custom_policy_round_trips() {
        let mut policy = SecurityPolicy {
            require_token: true,
            min_password_length: 16,
            kdf_iterations: 750_000,
            password_history_depth: 10,
            username_hash_algorithm: KdfAlgorithm::Argon2id,
            fips_mode: true,
            ..Default::default()
        };
        policy.policy_challenge = [0xD7u8; POLICY_CHALLENGE_LEN];

        let parsed = SecurityPolicy::from_bytes(&policy.to_bytes()).unwrap();
        assert_eq!(parsed, policy);
    }

    #[test]
    fn stored_iteration_count_below_floor_is_clamped() {
        let mut bytes = SecurityPolicy::default().to_bytes();
        bytes[6..10].copy_from_slice(&50_000u32.to_be_bytes());

        let parsed = SecurityPolicy::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.kdf_iterations, MIN_PBKDF2_ITERATIONS);
    }

    #[test]
    fn out_of_range_fields_are_rejected() {
        let too_short = SecurityPolicy {
            min_password_length: 4,
            ..Default::default()
        };
        assert!(too_short.validate().is_err());

        let deep_history = SecurityPolicy {
            password_history_depth: 99,
            ..Default::default()
        };
        assert!(deep_history.validate().is_err());

        let wild_argon = SecurityPolicy {
            argon2_parallelism: 64,
            ..Default::default()
        };
        assert!(wild_argon.validate().is_err());
    }

    #[test]
    fn unknown_hash_algorithm_is_a_format_error() {
        let mut bytes = SecurityPolicy::default().to_bytes();
        bytes[14] = 0x7F;
        assert!(matches!(
            SecurityPolicy::from_bytes(&bytes),
            Err(VaultError::Format(_))
        ));
    }

    #[test]
    fn short_record_is_a_format_error() {
        assert!(matches!(
            SecurityPolicy::from_bytes(&[0u8; POLICY_LEN - 1]),
            Err(VaultError::Format(_))
        ));
    }
}
