//! Key slots: one per enrolled user.
//!
//! A slot holds everything needed to turn that user's password (and
//! token, if enrolled) back into the shared DEK: the salted username
//! digest for lookup, the KEK salt and algorithm, and the wrapped DEK.
//! No plaintext username is ever stored.
//!
//! Wire layout (big-endian, variable length):
//!   [ active:1 | digest_len:1 | digest:64 | username_salt:16
//!   | kek_algorithm:1 | salt:32 | wrapped_dek:40 | role:1
//!   | must_change:1 | password_changed_at:8 | last_login_at:8
//!   | token_enrolled:1 | token_challenge:32 | serial_len:1
//!   | serial:N | token_enrolled_at:8 | history_count:1
//!   | history entries: count * 88 ]

use subtle::ConstantTimeEq;

use crate::crypto::kdf::{KdfAlgorithm, MAX_DIGEST_LEN, SALT_LEN, USERNAME_SALT_LEN};
use crate::crypto::wrap::WRAPPED_DEK_LEN;
use crate::errors::{Result, VaultError};
use crate::format::ByteReader;
use crate::history::{HistoryEntry, HISTORY_ENTRY_LEN, MAX_HISTORY_DEPTH};
use crate::token::CHALLENGE_LEN;

/// Hard cap on slots per vault.
pub const MAX_KEY_SLOTS: usize = 32;

/// User role stored in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    Standard = 0,
    Administrator = 1,
}

impl Role {
    pub fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Standard),
            1 => Some(Self::Administrator),
            _ => None,
        }
    }
}

/// One user's key slot.
#[derive(Debug, Clone)]
pub struct KeySlot {
    pub active: bool,
    pub username_digest: [u8; MAX_DIGEST_LEN],
    pub username_digest_len: u8,
    pub username_salt: [u8; USERNAME_SALT_LEN],
    pub kek_algorithm: KdfAlgorithm,
    pub salt: [u8; SALT_LEN],
    pub wrapped_dek: [u8; WRAPPED_DEK_LEN],
    pub role: Role,
    pub must_change_password: bool,
    pub password_changed_at: i64,
    pub last_login_at: i64,
    pub token_enrolled: bool,
    pub token_challenge: [u8; CHALLENGE_LEN],
    pub token_serial: String,
    pub token_enrolled_at: i64,
    pub password_history: Vec<HistoryEntry>,
}

impl KeySlot {
    /// Constant-time comparison of a candidate username digest against
    /// this slot's stored digest.
    pub fn matches_digest(&self, digest: &[u8]) -> bool {
        if digest.len() != self.username_digest_len as usize {
            return false;
        }
        let stored = &self.username_digest[..self.username_digest_len as usize];
        stored.ct_eq(digest).into()
    }

    pub fn is_administrator(&self) -> bool {
        self.role == Role::Administrator
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.token_serial.len() > u8::MAX as usize {
            return Err(VaultError::Format(format!(
                "token serial is {} bytes, maximum {}",
                self.token_serial.len(),
                u8::MAX
            )));
        }
        if self.password_history.len() > MAX_HISTORY_DEPTH as usize {
            return Err(VaultError::Format(format!(
                "history has {} entries, maximum {MAX_HISTORY_DEPTH}",
                self.password_history.len()
            )));
        }

        let mut out = Vec::with_capacity(
            216 + self.token_serial.len() + self.password_history.len() * HISTORY_ENTRY_LEN,
        );
        out.push(self.active as u8);
        out.push(self.username_digest_len);
        out.extend_from_slice(&self.username_digest);
        out.extend_from_slice(&self.username_salt);
        out.push(self.kek_algorithm as u8);
        out.extend_from_slice(&self.salt);
        out.extend_from_slice(&self.wrapped_dek);
        out.push(self.role as u8);
        out.push(self.must_change_password as u8);
        out.extend_from_slice(&self.password_changed_at.to_be_bytes());
        out.extend_from_slice(&self.last_login_at.to_be_bytes());
        out.push(self.token_enrolled as u8);
        out.extend_from_slice(&self.token_challenge);
        out.push(self.token_serial.len() as u8);
        out.extend_from_slice(self.token_serial.as_bytes());
        out.extend_from_slice(&self.token_enrolled_at.to_be_bytes());
        out.push(self.password_history.len() as u8);
        for entry in &self.password_history {
            out.extend_from_slice(&entry.to_bytes());
        }
        Ok(out)
    }

    /// Parse one slot from the reader, leaving it positioned at the
    /// next slot.
    pub(crate) fn read_from(reader: &mut ByteReader<'_>) -> Result<Self> {
        let active = reader.take_u8("slot active flag")? != 0;

        let username_digest_len = reader.take_u8("username digest length")?;
        if username_digest_len as usize > MAX_DIGEST_LEN {
            return Err(VaultError::Format(format!(
                "username digest length {username_digest_len} exceeds {MAX_DIGEST_LEN}"
            )));
        }
        let mut username_digest = [0u8; MAX_DIGEST_LEN];
        username_digest.copy_from_slice(reader.take(MAX_DIGEST_LEN, "username digest")?);

        let mut username_salt = [0u8; USERNAME_SALT_LEN];
        username_salt.copy_from_slice(reader.take(USERNAME_SALT_LEN, "username salt")?);

        let alg_byte = reader.take_u8("KEK algorithm")?;
        let kek_algorithm = KdfAlgorithm::from_wire(alg_byte)
            .ok_or_else(|| VaultError::Format(format!("unknown KEK algorithm 0x{alg_byte:02x}")))?;
        // A fast hash stored as the KEK algorithm means the file was
        // written by something that skipped the substitution rule.
        if kek_algorithm.is_fast_hash() {
            return Err(VaultError::Format(format!(
                "slot stores fast hash 0x{alg_byte:02x} as its KEK algorithm"
            )));
        }

        let mut salt = [0u8; SALT_LEN];
        salt.copy_from_slice(reader.take(SALT_LEN, "KEK salt")?);

        let mut wrapped_dek = [0u8; WRAPPED_DEK_LEN];
        wrapped_dek.copy_from_slice(reader.take(WRAPPED_DEK_LEN, "wrapped DEK")?);

        let role_byte = reader.take_u8("role")?;
        let role = Role::from_wire(role_byte)
            .ok_or_else(|| VaultError::Format(format!("unknown role {role_byte}")))?;

        let must_change_password = reader.take_u8("must-change flag")? != 0;
        let password_changed_at = reader.take_i64_be("password changed timestamp")?;
        let last_login_at = reader.take_i64_be("last login timestamp")?;

        let token_enrolled = reader.take_u8("token enrolled flag")? != 0;
        let mut token_challenge = [0u8; CHALLENGE_LEN];
        token_challenge.copy_from_slice(reader.take(CHALLENGE_LEN, "token challenge")?);

        let serial_len = reader.take_u8("token serial length")? as usize;
        let token_serial = std::str::from_utf8(reader.take(serial_len, "token serial")?)
            .map_err(|_| VaultError::Format("token serial is not valid UTF-8".into()))?
            .to_string();
        let token_enrolled_at = reader.take_i64_be("token enrollment timestamp")?;

        let history_count = reader.take_u8("history count")?;
        if u32::from(history_count) > MAX_HISTORY_DEPTH {
            return Err(VaultError::Format(format!(
                "history count {history_count} exceeds maximum {MAX_HISTORY_DEPTH}"
            )));
        }
        let mut password_history = Vec::with_capacity(history_count as usize);
        for _ in 0..history_count {
            let bytes = reader.take(HISTORY_ENTRY_LEN, "history entry")?;
            password_history.push(HistoryEntry::from_bytes(bytes)?);
        }

        Ok(Self {
            active,
            username_digest,
            username_digest_len,
            username_salt,
            kek_algorithm,
            salt,
            wrapped_dek,
            role,
            must_change_password,
            password_changed_at,
            last_login_at,
            token_enrolled,
            token_challenge,
            token_serial,
            token_enrolled_at,
            password_history,
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        Self::read_from(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::hash_password;

    fn sample_slot() -> KeySlot {
        let mut digest = [0u8; MAX_DIGEST_LEN];
        digest[..32].copy_from_slice(&[0xAB; 32]);
        KeySlot {
            active: true,
            username_digest: digest,
            username_digest_len: 32,
            username_salt: [0x01; USERNAME_SALT_LEN],
            kek_algorithm: KdfAlgorithm::Argon2id,
            salt: [0x02; SALT_LEN],
            wrapped_dek: [0x03; WRAPPED_DEK_LEN],
            role: Role::Administrator,
            must_change_password: false,
            password_changed_at: 1_700_000_000,
            last_login_at: 1_700_000_100,
            token_enrolled: true,
            token_challenge: [0x04; CHALLENGE_LEN],
            token_serial: "tok-42".into(),
            token_enrolled_at: 1_700_000_200,
            password_history: vec![hash_password("old-password", 1_000)],
        }
    }

    #[test]
    fn slot_round_trips() {
        let slot = sample_slot();
        let bytes = slot.to_bytes().unwrap();
        let parsed = KeySlot::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.active, slot.active);
        assert_eq!(parsed.username_digest, slot.username_digest);
        assert_eq!(parsed.kek_algorithm, slot.kek_algorithm);
        assert_eq!(parsed.wrapped_dek, slot.wrapped_dek);
        assert_eq!(parsed.role, slot.role);
        assert_eq!(parsed.token_serial, slot.token_serial);
        assert_eq!(parsed.password_history, slot.password_history);
    }

    #[test]
    fn digest_matching_respects_length() {
        let slot = sample_slot();
        assert!(slot.matches_digest(&[0xAB; 32]));
        assert!(!slot.matches_digest(&[0xAB; 31]));
        assert!(!slot.matches_digest(&[0xAC; 32]));
    }

    #[test]
    fn fast_hash_kek_algorithm_is_rejected() {
        let slot = sample_slot();
        let mut bytes = slot.to_bytes().unwrap();
        // KEK algorithm byte sits after active + digest_len + digest + salt.
        let offset = 1 + 1 + MAX_DIGEST_LEN + USERNAME_SALT_LEN;
        bytes[offset] = KdfAlgorithm::Sha3_256 as u8;

        assert!(matches!(
            KeySlot::from_bytes(&bytes),
            Err(VaultError::Format(_))
        ));
    }

    #[test]
    fn truncated_slot_is_a_format_error() {
        let bytes = sample_slot().to_bytes().unwrap();
        assert!(matches!(
            KeySlot::from_bytes(&bytes[..bytes.len() - 10]),
            Err(VaultError::Format(_))
        ));
    }

    #[test]
    fn oversized_history_count_is_rejected() {
        let mut slot = sample_slot();
        slot.password_history = (0..30).map(|i| hash_password(&format!("p{i}"), 10)).collect();
        assert!(slot.to_bytes().is_err());
    }
}
