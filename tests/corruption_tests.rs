//! Integration tests for integrity detection and forward error
//! correction on the vault file itself.

use tempfile::TempDir;

use multivault::errors::VaultError;
use multivault::format::policy::SecurityPolicy;
use multivault::vault::{CreateParams, Vault};

fn fast_policy() -> SecurityPolicy {
    SecurityPolicy {
        kdf_iterations: 100_000,
        argon2_memory_kib: 8_192,
        argon2_iterations: 1,
        argon2_parallelism: 1,
        password_history_depth: 0,
        ..Default::default()
    }
}

fn create_on_disk(dir: &TempDir, fec: Option<u8>, payload: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join("store.vault");
    Vault::create(
        CreateParams {
            path: &path,
            username: "admin",
            password: "correct horse battery",
            policy: fast_policy(),
            fec_redundancy: fec,
            initial_payload: payload,
        },
        None,
        None,
    )
    .unwrap()
    .close();
    path
}

// ---------------------------------------------------------------------------
// Without FEC: any flip is fatal and detected
// ---------------------------------------------------------------------------

#[test]
fn single_byte_flip_without_fec_is_detected() {
    let dir = TempDir::new().unwrap();
    let path = create_on_disk(&dir, None, b"important bytes");

    let mut image = std::fs::read(&path).unwrap();
    // Flip one byte near the end, inside the ciphertext.
    let i = image.len() - 3;
    image[i] ^= 0x01;
    std::fs::write(&path, &image).unwrap();

    let err = Vault::open(&path, "admin", "correct horse battery", None).unwrap_err();
    assert!(
        matches!(err, VaultError::Integrity),
        "a flipped ciphertext byte must surface as Integrity, got {err:?}"
    );
}

#[test]
fn header_corruption_without_fec_is_detected() {
    let dir = TempDir::new().unwrap();
    let path = create_on_disk(&dir, None, b"payload");

    let mut image = std::fs::read(&path).unwrap();
    // Stomp on the slot area (after magic, version, flags, policy).
    for byte in image[150..170].iter_mut() {
        *byte = 0xFF;
    }
    std::fs::write(&path, &image).unwrap();

    // Depending on which field is hit this is a Format error or an
    // authentication failure; it must never open silently.
    assert!(Vault::open(&path, "admin", "correct horse battery", None).is_err());
}

// ---------------------------------------------------------------------------
// With FEC: bounded corruption repairs to identical plaintext
// ---------------------------------------------------------------------------

#[test]
fn bounded_corruption_with_fec_repairs_transparently() {
    let dir = TempDir::new().unwrap();
    let payload: Vec<u8> = (0..2000).map(|i| (i % 251) as u8).collect();
    let path = create_on_disk(&dir, Some(10), &payload);

    let mut image = std::fs::read(&path).unwrap();
    // Everything after magic(4) + version(2) + flags(1) is armored:
    // the replicated container prefix and the RS blocks alike.  Scatter
    // flips well under the per-block budget (10% redundancy repairs
    // ~25 bytes per 255-byte block).
    let body_start = 7;
    let len = image.len();
    for i in 0..15 {
        image[body_start + i * ((len - body_start) / 15)] ^= 0xFF;
    }
    std::fs::write(&path, &image).unwrap();

    let vault = Vault::open(&path, "admin", "correct horse battery", None)
        .expect("FEC should repair bounded corruption");
    assert_eq!(vault.payload(), payload.as_slice());
}

#[test]
fn corruption_beyond_fec_capacity_is_explicit() {
    let dir = TempDir::new().unwrap();
    let path = create_on_disk(&dir, Some(5), b"some payload bytes");

    let mut image = std::fs::read(&path).unwrap();
    // Obliterate a whole stretch of the first block (past the 7-byte
    // file prefix and 15-byte container prefix): 5% redundancy cannot
    // repair this.
    for byte in image[22..122].iter_mut() {
        *byte = byte.wrapping_add(1);
    }
    std::fs::write(&path, &image).unwrap();

    assert!(matches!(
        Vault::open(&path, "admin", "correct horse battery", None),
        Err(VaultError::Integrity)
    ));
}

#[test]
fn flipped_fec_prefix_byte_still_opens() {
    let dir = TempDir::new().unwrap();
    let path = create_on_disk(&dir, Some(10), b"prefix armored");

    let mut image = std::fs::read(&path).unwrap();
    // First copy of the container redundancy byte, right after the
    // 7-byte file prefix.  The replicated copies outvote it.
    image[7] ^= 0xFF;
    std::fs::write(&path, &image).unwrap();

    let vault = Vault::open(&path, "admin", "correct horse battery", None)
        .expect("a flip in the FEC prefix must be repairable too");
    assert_eq!(vault.payload(), b"prefix armored");
}

#[test]
fn fec_vault_round_trips_clean() {
    let dir = TempDir::new().unwrap();
    let path = create_on_disk(&dir, Some(25), b"fec protected");

    let vault = Vault::open(&path, "admin", "correct horse battery", None).unwrap();
    assert_eq!(vault.payload(), b"fec protected");
}

// ---------------------------------------------------------------------------
// Truncation
// ---------------------------------------------------------------------------

#[test]
fn truncated_file_is_a_format_error() {
    let dir = TempDir::new().unwrap();
    let path = create_on_disk(&dir, None, b"data");

    let image = std::fs::read(&path).unwrap();
    std::fs::write(&path, &image[..60]).unwrap();

    assert!(matches!(
        Vault::open(&path, "admin", "correct horse battery", None),
        Err(VaultError::Format(_))
    ));
}

#[test]
fn garbage_file_is_a_format_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("garbage.vault");
    std::fs::write(&path, b"this is not a vault at all").unwrap();

    assert!(matches!(
        Vault::open(&path, "admin", "whatever password", None),
        Err(VaultError::Format(_))
    ));
}
