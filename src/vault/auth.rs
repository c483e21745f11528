//! The authentication state machine.
//!
//! Opening a vault walks a fixed sequence; no step can be skipped and
//! any failure drops straight back to `Closed` with every intermediate
//! key zeroized:
//!
//!   Closed -> FileRead -> FormatParsed -> KeyDerived
//!          -> [TokenVerified] -> DekUnwrapped -> DataDecrypted -> Open
//!
//! `TokenVerified` only occurs for slots with a token enrolled.  Token
//! failures, unknown usernames, and wrong passwords all surface as the
//! same generic `Authentication` error so an attacker learns nothing
//! about which factor was wrong.

use std::path::Path;

use zeroize::Zeroize;

use crate::crypto::{encryption, kdf, wrap};
use crate::crypto::keys::Dek;
use crate::errors::{Result, VaultError};
use crate::format::header::{self, VaultHeader, VERSION_V1, VERSION_V2};
use crate::io;
use crate::token::{self, TokenDevice};
use crate::vault::session::UserSession;

/// Where the machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Closed,
    FileRead,
    FormatParsed,
    KeyDerived,
    TokenVerified,
    DekUnwrapped,
    DataDecrypted,
    Open,
}

/// Everything a successful authentication yields.
#[derive(Debug)]
pub struct AuthOutcome {
    pub header: VaultHeader,
    pub slot_index: usize,
    pub dek: Dek,
    pub payload: Vec<u8>,
    pub session: UserSession,
    pub fec_redundancy: Option<u8>,
}

/// Drives one authentication attempt from `Closed` to `Open`.
pub struct Authenticator {
    state: AuthState,
}

impl Authenticator {
    pub fn new() -> Self {
        Self {
            state: AuthState::Closed,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Run the full sequence.  On any error the machine is back in
    /// `Closed` and no key material survives.
    pub fn run(
        &mut self,
        path: &Path,
        username: &str,
        password: &str,
        device: Option<&dyn TokenDevice>,
    ) -> Result<AuthOutcome> {
        let outcome = self.run_inner(path, username, password, device);
        if outcome.is_err() {
            self.state = AuthState::Closed;
        }
        outcome
    }

    fn run_inner(
        &mut self,
        path: &Path,
        username: &str,
        password: &str,
        device: Option<&dyn TokenDevice>,
    ) -> Result<AuthOutcome> {
        // 1. Read the file.
        let bytes = io::read_vault_file(path)?;
        self.state = AuthState::FileRead;

        // 2. Parse the format (FEC repair happens inside the parser).
        if header::detect_version(&bytes)? != VERSION_V2 {
            return Err(VaultError::Format(
                "legacy vault: open it with the migration path".into(),
            ));
        }
        let parsed = header::parse_file_v2(&bytes)?;
        self.state = AuthState::FormatParsed;

        // 3. Locate the slot and derive the KEK.
        let policy = &parsed.header.policy;
        let params = policy.kdf_params();

        let slot_index = find_slot(&parsed.header, username)?;
        let slot = &parsed.header.slots[slot_index];

        // The slot's algorithm is already the effective one chosen at
        // wrap time; FIPS gating applies to new wraps, not here.
        let mut kek = kdf::derive_kek(
            password.as_bytes(),
            &slot.salt,
            slot.kek_algorithm,
            &params,
            false,
        )?;
        self.state = AuthState::KeyDerived;

        // 4. Fold in the token factor where one is enrolled.
        if slot.token_enrolled {
            let combined = verify_token(&kek, slot, device);
            kek.zeroize();
            // Generic failure: wrong token and wrong password must be
            // indistinguishable.
            kek = combined.map_err(|_| VaultError::Authentication)?;
            self.state = AuthState::TokenVerified;
        }

        // 5. Unwrap the DEK.  This is the wrong-password check.
        let dek = wrap::unwrap_dek(&kek, &slot.wrapped_dek);
        kek.zeroize();
        let dek = dek?;
        self.state = AuthState::DekUnwrapped;

        // 6. Decrypt the payload.
        let payload = encryption::decrypt(&dek, &parsed.iv, &parsed.ciphertext)?;
        self.state = AuthState::DataDecrypted;

        // 7. Open, with any pending gates recorded on the session.
        let token_enrollment_required = policy.require_token && !slot.token_enrolled;
        let session = UserSession::new(
            username,
            slot.role,
            slot.must_change_password,
            token_enrollment_required,
        );
        self.state = AuthState::Open;

        Ok(AuthOutcome {
            slot_index,
            dek,
            payload,
            session,
            fec_redundancy: parsed.fec_redundancy,
            header: parsed.header,
        })
    }
}

impl Default for Authenticator {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the active slot whose stored digest matches the username.
///
/// Every active slot is checked with its own salt; the comparison is
/// constant-time per slot.  No match is an `Authentication` error, not
/// a user-enumeration hint.
fn find_slot(header: &VaultHeader, username: &str) -> Result<usize> {
    let params = header.policy.kdf_params();
    let mut found = None;
    for (i, slot) in header.slots.iter().enumerate() {
        if !slot.active {
            continue;
        }
        let digest = kdf::digest_username(
            username,
            &slot.username_salt,
            header.policy.username_hash_algorithm,
            &params,
        )?;
        if slot.matches_digest(digest.as_slice()) && found.is_none() {
            found = Some(i);
        }
    }
    found.ok_or(VaultError::Authentication)
}

fn verify_token(
    kek: &[u8; 32],
    slot: &crate::format::slot::KeySlot,
    device: Option<&dyn TokenDevice>,
) -> Result<[u8; 32]> {
    let device = device.ok_or(VaultError::Token(crate::errors::TokenFailure::NotPresent))?;
    let mut response = token::respond(device, &slot.token_serial, &slot.token_challenge)?;
    let combined = token::combine_with_token(kek, &response);
    response.zeroize();
    combined
}

/// Decrypt a legacy v1 single-user vault.
///
/// v1 stored no iteration count, so derivation uses the fixed round
/// count legacy writers used.  Returns the payload only; v1 vaults are
/// opened read-only pending migration.
pub fn open_legacy(path: &Path, password: &str) -> Result<Vec<u8>> {
    const LEGACY_ITERATIONS: u32 = 600_000;

    let bytes = io::read_vault_file(path)?;
    if header::detect_version(&bytes)? != VERSION_V1 {
        return Err(VaultError::Format("not a legacy v1 vault".into()));
    }
    let parsed = header::parse_file_v1(&bytes)?;

    let mut key = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(
        password.as_bytes(),
        &parsed.salt,
        LEGACY_ITERATIONS,
        &mut key,
    );

    let dek = Dek::new(key);
    key.zeroize();

    // Legacy files used the password-derived key directly; a tag
    // failure here means a wrong password, not corruption.
    encryption::decrypt(&dek, &parsed.iv, &parsed.ciphertext)
        .map_err(|_| VaultError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_starts_closed() {
        let auth = Authenticator::new();
        assert_eq!(auth.state(), AuthState::Closed);
    }

    #[test]
    fn missing_file_returns_to_closed() {
        let mut auth = Authenticator::new();
        let err = auth
            .run(Path::new("/nonexistent/path.vault"), "admin", "pw", None)
            .unwrap_err();
        assert!(matches!(err, VaultError::VaultNotFound(_)));
        assert_eq!(auth.state(), AuthState::Closed);
    }
}
