//! Password-history digests for the reuse check.
//!
//! Each slot keeps up to 24 salted digests of the user's previous
//! passwords.  History hashing is deliberately a different construction
//! than the KEK path (PBKDF2-HMAC-SHA512, 48-byte output), so a history
//! entry can never double as material for attacking a wrapped key.
//!
//! The reuse check recomputes the candidate against **every** entry and
//! compares in constant time, without an early exit on match, so timing
//! reveals neither a hit nor its position.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;
use subtle::ConstantTimeEq;

use crate::errors::{PolicyViolation, Result, VaultError};

/// Per-entry salt size in bytes.
pub const HISTORY_SALT_LEN: usize = 32;

/// Digest size in bytes (truncated SHA-512 output).
pub const HISTORY_DIGEST_LEN: usize = 48;

/// Serialized entry size: 8-byte timestamp + salt + digest.
pub const HISTORY_ENTRY_LEN: usize = 8 + HISTORY_SALT_LEN + HISTORY_DIGEST_LEN;

/// Maximum history depth a policy may configure.
pub const MAX_HISTORY_DEPTH: u32 = 24;

/// Default PBKDF2 rounds for history digests.
pub const DEFAULT_HISTORY_ITERATIONS: u32 = 600_000;

/// One remembered password: when it was set, and its salted digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub timestamp: i64,
    pub salt: [u8; HISTORY_SALT_LEN],
    pub digest: [u8; HISTORY_DIGEST_LEN],
}

impl HistoryEntry {
    /// Serialize to the fixed 88-byte wire form.
    pub fn to_bytes(&self) -> [u8; HISTORY_ENTRY_LEN] {
        let mut out = [0u8; HISTORY_ENTRY_LEN];
        out[..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..8 + HISTORY_SALT_LEN].copy_from_slice(&self.salt);
        out[8 + HISTORY_SALT_LEN..].copy_from_slice(&self.digest);
        out
    }

    /// Parse the fixed wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HISTORY_ENTRY_LEN {
            return Err(VaultError::Format(format!(
                "history entry is {} bytes, expected {HISTORY_ENTRY_LEN}",
                bytes.len()
            )));
        }
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&bytes[..8]);
        let mut salt = [0u8; HISTORY_SALT_LEN];
        salt.copy_from_slice(&bytes[8..8 + HISTORY_SALT_LEN]);
        let mut digest = [0u8; HISTORY_DIGEST_LEN];
        digest.copy_from_slice(&bytes[8 + HISTORY_SALT_LEN..]);
        Ok(Self {
            timestamp: i64::from_be_bytes(ts),
            salt,
            digest,
        })
    }
}

/// Digest a password into a new history entry with a fresh salt.
pub fn hash_password(password: &str, iterations: u32) -> HistoryEntry {
    use rand::RngCore;
    let mut salt = [0u8; HISTORY_SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    HistoryEntry {
        timestamp: chrono::Utc::now().timestamp(),
        salt,
        digest: digest_with_salt(password, &salt, iterations),
    }
}

fn digest_with_salt(
    password: &str,
    salt: &[u8; HISTORY_SALT_LEN],
    iterations: u32,
) -> [u8; HISTORY_DIGEST_LEN] {
    let mut digest = [0u8; HISTORY_DIGEST_LEN];
    pbkdf2_hmac::<Sha512>(
        password.as_bytes(),
        salt,
        iterations.max(1),
        &mut digest,
    );
    digest
}

/// Check a candidate password against the whole history.
///
/// Every entry is recomputed and compared; the match flag is accumulated
/// so the scan cost is identical whether or not anything matches.
pub fn is_password_reused(password: &str, history: &[HistoryEntry], iterations: u32) -> bool {
    let mut reused = subtle::Choice::from(0u8);
    for entry in history {
        let candidate = digest_with_salt(password, &entry.salt, iterations);
        reused |= candidate.ct_eq(&entry.digest);
    }
    reused.into()
}

/// Append an entry and trim the oldest beyond `depth`.
///
/// Depth 0 disables history entirely: the list is cleared and the new
/// entry is not kept.
pub fn add_to_history(history: &mut Vec<HistoryEntry>, entry: HistoryEntry, depth: u32) {
    if depth == 0 {
        history.clear();
        return;
    }
    history.push(entry);
    let depth = depth.min(MAX_HISTORY_DEPTH) as usize;
    while history.len() > depth {
        history.remove(0);
    }
}

/// Validate a configured depth against the policy range.
pub fn validate_depth(depth: u32) -> Result<()> {
    if depth > MAX_HISTORY_DEPTH {
        return Err(PolicyViolation::InvalidPolicy(format!(
            "password history depth {depth} exceeds maximum {MAX_HISTORY_DEPTH}"
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Fast rounds for tests; production default is 600k.
    const ROUNDS: u32 = 1_000;

    #[test]
    fn entry_round_trips_through_wire_form() {
        let entry = hash_password("hunter2hunter2", ROUNDS);
        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), 88);
        assert_eq!(HistoryEntry::from_bytes(&bytes).unwrap(), entry);
    }

    #[test]
    fn reuse_is_detected_across_salts() {
        let mut history = Vec::new();
        add_to_history(&mut history, hash_password("first-pass-1", ROUNDS), 5);
        add_to_history(&mut history, hash_password("second-pass-2", ROUNDS), 5);

        assert!(is_password_reused("first-pass-1", &history, ROUNDS));
        assert!(is_password_reused("second-pass-2", &history, ROUNDS));
        assert!(!is_password_reused("never-used-3", &history, ROUNDS));
    }

    #[test]
    fn fresh_salts_give_distinct_digests_for_same_password() {
        let a = hash_password("same", ROUNDS);
        let b = hash_password("same", ROUNDS);
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn history_trims_oldest_beyond_depth() {
        let mut history = Vec::new();
        for i in 0..6 {
            add_to_history(&mut history, hash_password(&format!("pw-{i}"), ROUNDS), 3);
        }
        assert_eq!(history.len(), 3);
        // Oldest expired out: pw-0..=pw-2 no longer count as reused.
        assert!(!is_password_reused("pw-2", &history, ROUNDS));
        assert!(is_password_reused("pw-3", &history, ROUNDS));
        assert!(is_password_reused("pw-5", &history, ROUNDS));
    }

    #[test]
    fn depth_zero_disables_history() {
        let mut history = vec![hash_password("old", ROUNDS)];
        add_to_history(&mut history, hash_password("new", ROUNDS), 0);
        assert!(history.is_empty());
        assert!(!is_password_reused("old", &history, ROUNDS));
    }

    #[test]
    fn depth_range_is_validated() {
        assert!(validate_depth(0).is_ok());
        assert!(validate_depth(24).is_ok());
        assert!(matches!(
            validate_depth(25),
            Err(VaultError::Policy(PolicyViolation::InvalidPolicy(_)))
        ));
    }
}
