//! The open-vault handle.
//!
//! A [`Vault`] is the result of a successful create or open.  It owns
//! the parsed header, the unwrapped DEK, the decrypted payload, and the
//! session of whoever authenticated.  All mutation goes through it, and
//! every mutating operation persists the new image atomically before
//! returning.
//!
//! The engine treats the payload as an opaque byte blob; whatever
//! structured codec sits on top is a separate concern.

use std::path::{Path, PathBuf};

use zeroize::Zeroize;

use crate::crypto::{encryption, kdf, wrap};
use crate::crypto::keys::Dek;
use crate::errors::{PolicyViolation, Result, VaultError};
use crate::format::header::{self, VaultHeader};
use crate::format::policy::SecurityPolicy;
use crate::format::slot::{KeySlot, Role, MAX_KEY_SLOTS};
use crate::history;
use crate::io;
use crate::token::{self, TokenDevice};
use crate::vault::auth::{AuthOutcome, Authenticator};
use crate::vault::create::{self, CreateParams, ProgressFn};
use crate::vault::session::UserSession;

/// A row from [`Vault::list_users`].  Usernames are digests on disk, so
/// listing shows a short digest prefix instead of a name.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub digest_prefix: String,
    pub role: Role,
    pub must_change_password: bool,
    pub token_enrolled: bool,
    pub password_changed_at: i64,
    pub last_login_at: i64,
}

/// An open vault.
pub struct Vault {
    path: PathBuf,
    header: VaultHeader,
    dek: Dek,
    payload: Vec<u8>,
    session: UserSession,
    slot_index: usize,
    fec_redundancy: Option<u8>,
}

impl Vault {
    /// Create a new vault file and return it opened as the founding
    /// administrator.
    pub fn create(
        params: CreateParams<'_>,
        device: Option<&dyn TokenDevice>,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<Self> {
        let path = params.path.to_path_buf();
        let outcome = create::run(params, device, progress)?;
        Ok(Self::from_outcome(path, outcome))
    }

    /// Open an existing vault by authenticating against it.
    pub fn open(
        path: &Path,
        username: &str,
        password: &str,
        device: Option<&dyn TokenDevice>,
    ) -> Result<Self> {
        let mut auth = Authenticator::new();
        let outcome = auth.run(path, username, password, device)?;
        let mut vault = Self::from_outcome(path.to_path_buf(), outcome);
        // Recorded in memory now, persisted with the next save.
        vault.header.slots[vault.slot_index].last_login_at = chrono::Utc::now().timestamp();
        Ok(vault)
    }

    fn from_outcome(path: PathBuf, outcome: AuthOutcome) -> Self {
        Self {
            path,
            header: outcome.header,
            dek: outcome.dek,
            payload: outcome.payload,
            session: outcome.session,
            slot_index: outcome.slot_index,
            fec_redundancy: outcome.fec_redundancy,
        }
    }

    pub fn session(&self) -> &UserSession {
        &self.session
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.header.policy
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The decrypted payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload.  Blocked while a forced password change or
    /// token enrollment is pending.
    pub fn set_payload(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.require_vault_access()?;
        self.payload = bytes;
        Ok(())
    }

    /// Re-encrypt and atomically rewrite the vault file.
    pub fn save(&mut self) -> Result<()> {
        self.require_vault_access()?;
        self.save_internal()
    }

    /// Close the vault.  The DEK is zeroized by drop.
    pub fn close(self) {}

    // --- Credential management -----------------------------------

    /// Change the calling user's password.
    ///
    /// The old password is verified by unwrapping the slot's DEK blob;
    /// the new one must satisfy the policy and must not appear in the
    /// slot's history.
    pub fn change_password(
        &mut self,
        old_password: &str,
        new_password: &str,
        device: Option<&dyn TokenDevice>,
    ) -> Result<()> {
        let policy = self.header.policy.clone();

        if (new_password.chars().count() as u32) < policy.min_password_length {
            return Err(PolicyViolation::TooShort {
                min: policy.min_password_length,
                actual: new_password.chars().count(),
            }
            .into());
        }

        // Verify the old password against this slot.
        let verified = self.unwrap_own_slot(old_password, device)?;
        drop(verified);

        let slot = &self.header.slots[self.slot_index];
        if history::is_password_reused(
            new_password,
            &slot.password_history,
            history::DEFAULT_HISTORY_ITERATIONS,
        ) {
            return Err(PolicyViolation::Reused.into());
        }

        // Fresh salt, fresh KEK, re-wrap the shared DEK.
        let kek_algorithm =
            kdf::effective_kek_algorithm(policy.username_hash_algorithm, policy.fips_mode);
        let salt = kdf::generate_salt();
        let mut kek = kdf::derive_kek(
            new_password.as_bytes(),
            &salt,
            kek_algorithm,
            &policy.kdf_params(),
            policy.fips_mode,
        )?;
        if self.header.slots[self.slot_index].token_enrolled {
            kek = self.combine_own_token(kek, device)?;
        }
        let wrapped = wrap::wrap_dek(&kek, &self.dek);
        kek.zeroize();
        let wrapped = wrapped?;

        let slot = &mut self.header.slots[self.slot_index];
        slot.salt = salt;
        slot.kek_algorithm = kek_algorithm;
        slot.wrapped_dek = wrapped;
        slot.password_changed_at = chrono::Utc::now().timestamp();
        slot.must_change_password = false;
        if policy.password_history_depth > 0 {
            history::add_to_history(
                &mut slot.password_history,
                history::hash_password(new_password, history::DEFAULT_HISTORY_ITERATIONS),
                policy.password_history_depth,
            );
        } else {
            slot.password_history.clear();
        }

        self.session.password_change_required = false;
        self.save_internal()
    }

    /// Enroll a token on the calling user's slot.
    ///
    /// Needed at first login when the policy demands a token the slot
    /// does not have yet.  The password proves the caller owns the slot
    /// before its key material is re-wrapped.
    pub fn enroll_token(&mut self, password: &str, device: &dyn TokenDevice) -> Result<()> {
        // Current factor set must verify first.
        let verified = self.unwrap_own_slot(password, Some(device))?;
        drop(verified);

        let enrollment = token::enroll(device)?;

        let policy = &self.header.policy;
        let slot = &self.header.slots[self.slot_index];
        let mut kek = kdf::derive_kek(
            password.as_bytes(),
            &slot.salt,
            slot.kek_algorithm,
            &policy.kdf_params(),
            false,
        )?;
        let mut response = match token::respond(device, &enrollment.serial, &enrollment.challenge)
        {
            Ok(r) => r,
            Err(e) => {
                kek.zeroize();
                return Err(e);
            }
        };
        let combined = token::combine_with_token(&kek, &response);
        response.zeroize();
        kek.zeroize();
        let mut combined = combined?;

        let wrapped = wrap::wrap_dek(&combined, &self.dek);
        combined.zeroize();
        let wrapped = wrapped?;

        let slot = &mut self.header.slots[self.slot_index];
        slot.wrapped_dek = wrapped;
        slot.token_enrolled = true;
        slot.token_challenge = enrollment.challenge;
        slot.token_serial = enrollment.serial;
        slot.token_enrolled_at = enrollment.enrolled_at;

        self.session.token_enrollment_required = false;
        self.save_internal()
    }

    // --- User management (administrator) --------------------------

    /// Add a user with a temporary password.  Administrator only.
    pub fn add_user(
        &mut self,
        username: &str,
        temporary_password: &str,
        role: Role,
        must_change_password: bool,
    ) -> Result<()> {
        self.require_administrator()?;

        if username.trim().is_empty() {
            return Err(PolicyViolation::InvalidPolicy("username is empty".into()).into());
        }
        let policy = self.header.policy.clone();
        if (temporary_password.chars().count() as u32) < policy.min_password_length {
            return Err(PolicyViolation::TooShort {
                min: policy.min_password_length,
                actual: temporary_password.chars().count(),
            }
            .into());
        }
        if self.find_active_slot(username)?.is_some() {
            return Err(VaultError::UserAlreadyExists);
        }

        let params = policy.kdf_params();
        let kek_algorithm =
            kdf::effective_kek_algorithm(policy.username_hash_algorithm, policy.fips_mode);

        let username_salt = kdf::generate_username_salt();
        let digest = kdf::digest_username(
            username,
            &username_salt,
            policy.username_hash_algorithm,
            &params,
        )?;

        let salt = kdf::generate_salt();
        let mut kek = kdf::derive_kek(
            temporary_password.as_bytes(),
            &salt,
            kek_algorithm,
            &params,
            policy.fips_mode,
        )?;
        let wrapped = wrap::wrap_dek(&kek, &self.dek);
        kek.zeroize();
        let wrapped = wrapped?;

        let now = chrono::Utc::now().timestamp();
        let mut password_history = Vec::new();
        if policy.password_history_depth > 0 {
            history::add_to_history(
                &mut password_history,
                history::hash_password(temporary_password, history::DEFAULT_HISTORY_ITERATIONS),
                policy.password_history_depth,
            );
        }

        let slot = KeySlot {
            active: true,
            username_digest: digest.bytes,
            username_digest_len: digest.len,
            username_salt,
            kek_algorithm,
            salt,
            wrapped_dek: wrapped,
            role,
            must_change_password,
            password_changed_at: now,
            last_login_at: 0,
            token_enrolled: false,
            token_challenge: [0u8; token::CHALLENGE_LEN],
            token_serial: String::new(),
            token_enrolled_at: 0,
            password_history,
        };

        // Recycle a deactivated slot before growing the list.
        if let Some(i) = self.header.slots.iter().position(|s| !s.active) {
            self.header.slots[i] = slot;
        } else if self.header.slots.len() < MAX_KEY_SLOTS {
            self.header.slots.push(slot);
        } else {
            return Err(VaultError::MaxUsers(MAX_KEY_SLOTS));
        }

        self.save_internal()
    }

    /// Deactivate a user's slot.  Administrator only; self-removal and
    /// removing the last administrator are both rejected.
    pub fn remove_user(&mut self, username: &str) -> Result<()> {
        self.require_administrator()?;

        let index = self
            .find_active_slot(username)?
            .ok_or(VaultError::UserNotFound)?;
        if index == self.slot_index {
            return Err(VaultError::SelfRemoval);
        }
        if self.header.slots[index].is_administrator() && self.header.active_admin_count() <= 1 {
            return Err(VaultError::LastAdministrator);
        }

        let slot = &mut self.header.slots[index];
        slot.active = false;
        // Scrub everything that could still unwrap the DEK.
        slot.wrapped_dek.zeroize();
        slot.salt.zeroize();
        slot.username_digest.zeroize();
        slot.username_digest_len = 0;
        slot.token_enrolled = false;
        slot.token_challenge.zeroize();
        slot.token_serial.clear();
        slot.password_history.clear();

        self.save_internal()
    }

    /// Replace the mutable parts of the security policy.
    ///
    /// `require_token` and `username_hash_algorithm` are fixed at
    /// creation.  The KDF cost parameters are fixed too: every slot's
    /// wrapped key was derived under them, and changing them would
    /// orphan every user but the caller.
    pub fn rotate_policy(&mut self, new_policy: SecurityPolicy) -> Result<()> {
        self.require_administrator()?;
        new_policy.validate()?;

        let current = &self.header.policy;
        let frozen: [(&str, bool); 7] = [
            ("require_token", new_policy.require_token != current.require_token),
            (
                "username_hash_algorithm",
                new_policy.username_hash_algorithm != current.username_hash_algorithm,
            ),
            ("token_algorithm", new_policy.token_algorithm != current.token_algorithm),
            ("kdf_iterations", new_policy.kdf_iterations != current.kdf_iterations),
            (
                "argon2_memory_kib",
                new_policy.argon2_memory_kib != current.argon2_memory_kib,
            ),
            (
                "argon2_iterations",
                new_policy.argon2_iterations != current.argon2_iterations,
            ),
            (
                "argon2_parallelism",
                new_policy.argon2_parallelism != current.argon2_parallelism,
            ),
        ];
        for (field, changed) in frozen {
            if changed {
                return Err(PolicyViolation::InvalidPolicy(format!(
                    "{field} is immutable after vault creation"
                ))
                .into());
            }
        }

        let challenge = current.policy_challenge;
        self.header.policy = SecurityPolicy {
            policy_challenge: challenge,
            ..new_policy
        };
        self.save_internal()
    }

    /// Wipe a user's password history.  Users may clear their own;
    /// administrators may clear anyone's.
    pub fn clear_password_history(&mut self, username: &str) -> Result<()> {
        let index = self
            .find_active_slot(username)?
            .ok_or(VaultError::UserNotFound)?;
        if index != self.slot_index && !self.session.is_administrator() {
            return Err(VaultError::PermissionDenied);
        }

        self.header.slots[index].password_history.clear();
        self.save_internal()
    }

    /// Summaries of every active slot.
    pub fn list_users(&self) -> Vec<UserInfo> {
        self.header
            .slots
            .iter()
            .filter(|s| s.active)
            .map(|s| UserInfo {
                digest_prefix: s.username_digest[..8.min(s.username_digest_len as usize)]
                    .iter()
                    .map(|b| format!("{b:02x}"))
                    .collect(),
                role: s.role,
                must_change_password: s.must_change_password,
                token_enrolled: s.token_enrolled,
                password_changed_at: s.password_changed_at,
                last_login_at: s.last_login_at,
            })
            .collect()
    }

    // --- Internals -------------------------------------------------

    fn require_administrator(&self) -> Result<()> {
        if !self.session.is_administrator() {
            return Err(VaultError::PermissionDenied);
        }
        Ok(())
    }

    fn require_vault_access(&self) -> Result<()> {
        if self.session.password_change_required {
            return Err(VaultError::PasswordChangeRequired);
        }
        if !self.session.can_access_vault() {
            return Err(VaultError::PermissionDenied);
        }
        Ok(())
    }

    /// Digest `username` against each active slot's salt and return the
    /// matching index, if any.
    fn find_active_slot(&self, username: &str) -> Result<Option<usize>> {
        let params = self.header.policy.kdf_params();
        for (i, slot) in self.header.slots.iter().enumerate() {
            if !slot.active {
                continue;
            }
            let digest = kdf::digest_username(
                username,
                &slot.username_salt,
                self.header.policy.username_hash_algorithm,
                &params,
            )?;
            if slot.matches_digest(digest.as_slice()) {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    /// Verify a password (and token, when enrolled) against the calling
    /// user's own slot by unwrapping its DEK blob.
    fn unwrap_own_slot(
        &self,
        password: &str,
        device: Option<&dyn TokenDevice>,
    ) -> Result<Dek> {
        let slot = &self.header.slots[self.slot_index];
        let mut kek = kdf::derive_kek(
            password.as_bytes(),
            &slot.salt,
            slot.kek_algorithm,
            &self.header.policy.kdf_params(),
            false,
        )?;
        if slot.token_enrolled {
            kek = match self.combine_own_token(kek, device) {
                Ok(k) => k,
                Err(_) => return Err(VaultError::Authentication),
            };
        }
        let dek = wrap::unwrap_dek(&kek, &slot.wrapped_dek);
        kek.zeroize();
        dek
    }

    /// XOR the enrolled token's response into `kek`, consuming and
    /// zeroizing the input KEK.
    fn combine_own_token(
        &self,
        mut kek: [u8; 32],
        device: Option<&dyn TokenDevice>,
    ) -> Result<[u8; 32]> {
        let slot = &self.header.slots[self.slot_index];
        let device = match device {
            Some(d) => d,
            None => {
                kek.zeroize();
                return Err(crate::errors::TokenFailure::NotPresent.into());
            }
        };
        let mut response = match token::respond(device, &slot.token_serial, &slot.token_challenge)
        {
            Ok(r) => r,
            Err(e) => {
                kek.zeroize();
                return Err(e);
            }
        };
        let combined = token::combine_with_token(&kek, &response);
        response.zeroize();
        kek.zeroize();
        combined
    }

    /// Serialize the current state and rewrite the file atomically.
    fn save_internal(&mut self) -> Result<()> {
        let (iv, ciphertext) = encryption::encrypt(&self.dek, &self.payload)?;
        let file = header::write_file_v2(&self.header, &iv, &ciphertext, self.fec_redundancy)?;
        io::write_atomic(&self.path, &file)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("path", &self.path)
            .field("slots", &self.header.slots.len())
            .field("user", &self.session.username)
            .finish()
    }
}
