//! Legacy v1 vault opening.
//!
//! v1 files are single-user: a PBKDF2 key derived straight from the
//! password decrypts the payload, with no key slots.  The engine opens
//! them read-only for migration.

use multivault::crypto::encryption;
use multivault::crypto::keys::Dek;
use multivault::errors::VaultError;
use multivault::vault::open_legacy;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use tempfile::TempDir;

const LEGACY_ITERATIONS: u32 = 600_000;

/// Build a v1 file the way legacy writers did.
fn write_legacy_vault(path: &std::path::Path, password: &str, payload: &[u8]) {
    let salt = [0x5Au8; 32];
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt, LEGACY_ITERATIONS, &mut key);

    let dek = Dek::new(key);
    let (iv, ciphertext) = encryption::encrypt(&dek, payload).unwrap();

    let mut file = Vec::new();
    file.extend_from_slice(b"MUVT");
    file.extend_from_slice(&1u16.to_le_bytes());
    file.extend_from_slice(&salt);
    file.extend_from_slice(&iv);
    file.push(0); // no FEC
    file.extend_from_slice(&ciphertext);
    std::fs::write(path, &file).unwrap();
}

#[test]
fn legacy_vault_opens_with_the_right_password() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.vault");
    write_legacy_vault(&path, "the old master password", b"legacy secrets");

    let payload = open_legacy(&path, "the old master password").unwrap();
    assert_eq!(payload, b"legacy secrets");
}

#[test]
fn legacy_vault_rejects_a_wrong_password() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("old.vault");
    write_legacy_vault(&path, "the old master password", b"legacy secrets");

    assert!(matches!(
        open_legacy(&path, "not that password"),
        Err(VaultError::Authentication)
    ));
}

#[test]
fn v2_file_is_rejected_by_the_legacy_path() {
    use multivault::format::policy::SecurityPolicy;
    use multivault::vault::{CreateParams, Vault};

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("new.vault");
    Vault::create(
        CreateParams {
            path: &path,
            username: "admin",
            password: "correct horse battery",
            policy: SecurityPolicy {
                kdf_iterations: 100_000,
                ..Default::default()
            },
            fec_redundancy: None,
            initial_payload: b"",
        },
        None,
        None,
    )
    .unwrap()
    .close();

    assert!(matches!(
        open_legacy(&path, "correct horse battery"),
        Err(VaultError::Format(_))
    ));
}
