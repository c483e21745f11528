//! Stepwise vault creation.
//!
//! Creation is long enough (Argon2id alone can take a second) that the
//! caller gets a progress callback before each step.  Any failure
//! aborts the whole sequence: no partial file is left behind and an
//! existing file at the path is never touched.

use std::path::Path;

use zeroize::Zeroize;

use crate::crypto::{encryption, kdf, wrap};
use crate::crypto::keys::Dek;
use crate::errors::{PolicyViolation, Result, TokenFailure, VaultError};
use crate::format::header::{self, VaultHeader};
use crate::format::policy::SecurityPolicy;
use crate::format::slot::{KeySlot, Role};
use crate::history;
use crate::io;
use crate::token::{self, TokenDevice};
use crate::vault::auth::AuthOutcome;
use crate::vault::session::UserSession;

/// The creation sequence, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    Validate,
    GenerateDek,
    DeriveAdminKek,
    EnrollToken,
    BuildAdminSlot,
    BuildHeader,
    EncryptPayload,
    WriteFile,
}

impl CreateStep {
    pub const ALL: [CreateStep; 8] = [
        CreateStep::Validate,
        CreateStep::GenerateDek,
        CreateStep::DeriveAdminKek,
        CreateStep::EnrollToken,
        CreateStep::BuildAdminSlot,
        CreateStep::BuildHeader,
        CreateStep::EncryptPayload,
        CreateStep::WriteFile,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CreateStep::Validate => "validating parameters",
            CreateStep::GenerateDek => "generating data encryption key",
            CreateStep::DeriveAdminKek => "deriving administrator key",
            CreateStep::EnrollToken => "enrolling hardware token",
            CreateStep::BuildAdminSlot => "building administrator key slot",
            CreateStep::BuildHeader => "assembling vault header",
            CreateStep::EncryptPayload => "encrypting payload",
            CreateStep::WriteFile => "writing vault file",
        }
    }
}

/// Called before each step with (index, total, step).
pub type ProgressFn<'a> = &'a mut dyn FnMut(usize, usize, CreateStep);

/// Inputs to vault creation.
pub struct CreateParams<'a> {
    pub path: &'a Path,
    pub username: &'a str,
    pub password: &'a str,
    pub policy: SecurityPolicy,
    /// FEC redundancy percentage; `None` disables FEC.
    pub fec_redundancy: Option<u8>,
    pub initial_payload: &'a [u8],
}

/// Run the full creation sequence and return the open vault state.
pub(crate) fn run(
    params: CreateParams<'_>,
    device: Option<&dyn TokenDevice>,
    mut progress: Option<ProgressFn<'_>>,
) -> Result<AuthOutcome> {
    let total = CreateStep::ALL.len();
    let mut report = |index: usize, step: CreateStep| {
        if let Some(cb) = progress.as_mut() {
            cb(index, total, step);
        }
    };

    // 1. Validate.
    report(0, CreateStep::Validate);
    let mut policy = params.policy;
    policy.validate()?;
    if let Some(r) = params.fec_redundancy {
        crate::fec::FecEncoder::new(r)?;
    }
    if params.username.trim().is_empty() {
        return Err(PolicyViolation::InvalidPolicy("username is empty".into()).into());
    }
    if (params.password.chars().count() as u32) < policy.min_password_length {
        return Err(PolicyViolation::TooShort {
            min: policy.min_password_length,
            actual: params.password.chars().count(),
        }
        .into());
    }
    if params.path.exists() {
        return Err(VaultError::VaultAlreadyExists(params.path.to_path_buf()));
    }
    if policy.require_token && device.is_none() {
        return Err(TokenFailure::NotPresent.into());
    }

    // 2. Generate the shared DEK.
    report(1, CreateStep::GenerateDek);
    let dek = Dek::generate();

    // 3. Derive the administrator KEK.
    report(2, CreateStep::DeriveAdminKek);
    let kdf_params = policy.kdf_params();
    let kek_algorithm = kdf::effective_kek_algorithm(policy.username_hash_algorithm, policy.fips_mode);
    let salt = kdf::generate_salt();
    let mut kek = kdf::derive_kek(
        params.password.as_bytes(),
        &salt,
        kek_algorithm,
        &kdf_params,
        policy.fips_mode,
    )?;

    // 4. Enroll the token (skipped when not required).
    report(3, CreateStep::EnrollToken);
    let mut enrollment = None;
    if policy.require_token {
        let device = device.ok_or(VaultError::Token(TokenFailure::NotPresent))?;
        // Recorded at creation for vault-level attestation; only the
        // per-slot challenge takes part in authentication.
        policy.policy_challenge = token::generate_policy_challenge();

        let enrolled = match token::enroll(device) {
            Ok(e) => e,
            Err(e) => {
                kek.zeroize();
                return Err(e);
            }
        };
        let mut response = match token::respond(device, &enrolled.serial, &enrolled.challenge) {
            Ok(r) => r,
            Err(e) => {
                kek.zeroize();
                return Err(e);
            }
        };
        let combined = token::combine_with_token(&kek, &response);
        response.zeroize();
        kek.zeroize();
        kek = match combined {
            Ok(k) => k,
            Err(e) => return Err(e),
        };
        enrollment = Some(enrolled);
    }

    // 5. Build the administrator slot.
    report(4, CreateStep::BuildAdminSlot);
    let username_salt = kdf::generate_username_salt();
    let digest = kdf::digest_username(
        params.username,
        &username_salt,
        policy.username_hash_algorithm,
        &kdf_params,
    )?;
    let wrapped = wrap::wrap_dek(&kek, &dek);
    kek.zeroize();
    let wrapped = wrapped?;

    let now = chrono::Utc::now().timestamp();
    let mut password_history = Vec::new();
    if policy.password_history_depth > 0 {
        history::add_to_history(
            &mut password_history,
            history::hash_password(params.password, history::DEFAULT_HISTORY_ITERATIONS),
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
        role: Role::Administrator,
        must_change_password: false,
        password_changed_at: now,
        last_login_at: now,
        token_enrolled: enrollment.is_some(),
        token_challenge: enrollment
            .as_ref()
            .map(|e| e.challenge)
            .unwrap_or([0u8; token::CHALLENGE_LEN]),
        token_serial: enrollment
            .as_ref()
            .map(|e| e.serial.clone())
            .unwrap_or_default(),
        token_enrolled_at: enrollment.as_ref().map(|e| e.enrolled_at).unwrap_or(0),
        password_history,
    };

    // 6. Assemble the header.
    report(5, CreateStep::BuildHeader);
    let mut header = VaultHeader::new(policy);
    header.slots.push(slot);

    // 7. Encrypt the payload.
    report(6, CreateStep::EncryptPayload);
    let (iv, ciphertext) = encryption::encrypt(&dek, params.initial_payload)?;

    // 8. Serialize and write atomically.
    report(7, CreateStep::WriteFile);
    let file = header::write_file_v2(&header, &iv, &ciphertext, params.fec_redundancy)?;
    io::write_atomic(params.path, &file)?;

    let session = UserSession::new(params.username, Role::Administrator, false, false);
    Ok(AuthOutcome {
        header,
        slot_index: 0,
        dek,
        payload: params.initial_payload.to_vec(),
        session,
        fec_redundancy: params.fec_redundancy,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fast_policy() -> SecurityPolicy {
        SecurityPolicy {
            kdf_iterations: 100_000,
            argon2_memory_kib: 8_192,
            argon2_iterations: 1,
            argon2_parallelism: 1,
            ..Default::default()
        }
    }

    #[test]
    fn progress_reports_every_step_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.vault");
        let mut seen = Vec::new();
        let mut cb = |i: usize, total: usize, step: CreateStep| {
            assert_eq!(total, 8);
            seen.push((i, step));
        };

        run(
            CreateParams {
                path: &path,
                username: "admin",
                password: "a strong password",
                policy: fast_policy(),
                fec_redundancy: None,
                initial_payload: b"hello",
            },
            None,
            Some(&mut cb),
        )
        .unwrap();

        let expected: Vec<(usize, CreateStep)> =
            CreateStep::ALL.iter().copied().enumerate().collect();
        assert_eq!(seen, expected);
        assert!(path.exists());
    }

    #[test]
    fn short_password_leaves_no_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.vault");

        let err = run(
            CreateParams {
                path: &path,
                username: "admin",
                password: "short",
                policy: fast_policy(),
                fec_redundancy: None,
                initial_payload: b"",
            },
            None,
            None,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            VaultError::Policy(PolicyViolation::TooShort { min: 12, actual: 5 })
        ));
        assert!(!path.exists());
    }

    #[test]
    fn existing_file_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("present.vault");
        std::fs::write(&path, b"precious").unwrap();

        let err = run(
            CreateParams {
                path: &path,
                username: "admin",
                password: "a strong password",
                policy: fast_policy(),
                fec_redundancy: None,
                initial_payload: b"",
            },
            None,
            None,
        )
        .unwrap_err();

        assert!(matches!(err, VaultError::VaultAlreadyExists(_)));
        assert_eq!(std::fs::read(&path).unwrap(), b"precious");
    }

    #[test]
    fn token_required_without_device_fails_early() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.vault");
        let policy = SecurityPolicy {
            require_token: true,
            ..fast_policy()
        };

        let err = run(
            CreateParams {
                path: &path,
                username: "admin",
                password: "a strong password",
                policy,
                fec_redundancy: None,
                initial_payload: b"",
            },
            None,
            None,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            VaultError::Token(TokenFailure::NotPresent)
        ));
        assert!(!path.exists());
    }
}
