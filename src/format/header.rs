//! Vault file header and version dispatch.
//!
//! Common prefix:  [ magic "MUVT":4 | version: u16 LE ]
//!
//! v1 (legacy single-user):
//!   [ salt:32 | iv:12 | flags:1 | ciphertext+tag ]
//!   flags bit0 set means the ciphertext is an FEC container.
//!
//! v2 (multi-user):
//!   [ flags:1 | body ]
//!   body = [ policy:132 | slot_count:1 | slots... | iv:12 | ciphertext+tag ]
//!   flags bit0 set means the body is an FEC container as a whole, so
//!   the key slots themselves are repairable too.

use crate::crypto::encryption::IV_LEN;
use crate::crypto::kdf::SALT_LEN;
use crate::errors::{Result, VaultError};
use crate::fec::FecEncoder;
use crate::format::policy::{SecurityPolicy, POLICY_LEN};
use crate::format::slot::{KeySlot, MAX_KEY_SLOTS};
use crate::format::ByteReader;

/// File magic.
pub const MAGIC: [u8; 4] = *b"MUVT";

/// Legacy single-user format.
pub const VERSION_V1: u16 = 1;

/// Multi-user key-slot format.
pub const VERSION_V2: u16 = 2;

/// flags bit0: body is FEC-encoded.
const FLAG_FEC: u8 = 0b0000_0001;

/// The v2 header: policy plus the ordered slot list.
#[derive(Debug, Clone)]
pub struct VaultHeader {
    pub policy: SecurityPolicy,
    pub slots: Vec<KeySlot>,
}

impl VaultHeader {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self {
            policy,
            slots: Vec::new(),
        }
    }

    /// Count of active administrator slots.
    pub fn active_admin_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.active && s.is_administrator())
            .count()
    }

    pub fn active_slot_count(&self) -> usize {
        self.slots.iter().filter(|s| s.active).count()
    }
}

/// A fully parsed v2 file, ready for authentication.
#[derive(Debug)]
pub struct ParsedV2 {
    pub header: VaultHeader,
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub fec_redundancy: Option<u8>,
}

/// A parsed legacy v1 file.
#[derive(Debug)]
pub struct ParsedV1 {
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

/// Check the magic and return the format version.
pub fn detect_version(bytes: &[u8]) -> Result<u16> {
    let mut reader = ByteReader::new(bytes);
    let magic = reader.take(4, "magic")?;
    if magic != MAGIC {
        return Err(VaultError::Format("not a vault file (bad magic)".into()));
    }
    let version = reader.take_u16_le("version")?;
    match version {
        VERSION_V1 | VERSION_V2 => Ok(version),
        other => Err(VaultError::UnsupportedVersion(other)),
    }
}

/// Serialize a complete v2 file.
///
/// `fec_redundancy` of `Some(r)` wraps the whole body in an FEC
/// container at r% redundancy.
pub fn write_file_v2(
    header: &VaultHeader,
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
    fec_redundancy: Option<u8>,
) -> Result<Vec<u8>> {
    header.policy.validate()?;
    if header.slots.len() > MAX_KEY_SLOTS {
        return Err(VaultError::MaxUsers(MAX_KEY_SLOTS));
    }
    if header.active_admin_count() == 0 {
        return Err(VaultError::LastAdministrator);
    }

    // 1. Assemble the body.
    let mut body = Vec::with_capacity(POLICY_LEN + 1 + IV_LEN + ciphertext.len());
    body.extend_from_slice(&header.policy.to_bytes());
    body.push(header.slots.len() as u8);
    for slot in &header.slots {
        body.extend_from_slice(&slot.to_bytes()?);
    }
    body.extend_from_slice(iv);
    body.extend_from_slice(ciphertext);

    // 2. Optionally armor it.
    let (flags, body) = match fec_redundancy {
        Some(r) => (FLAG_FEC, FecEncoder::new(r)?.encode(&body)?),
        None => (0u8, body),
    };

    // 3. Prefix magic, version, flags.
    let mut out = Vec::with_capacity(4 + 2 + 1 + body.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION_V2.to_le_bytes());
    out.push(flags);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Parse a v2 file, FEC-repairing the body first when flagged.
pub fn parse_file_v2(bytes: &[u8]) -> Result<ParsedV2> {
    if detect_version(bytes)? != VERSION_V2 {
        return Err(VaultError::Format("expected a v2 vault file".into()));
    }

    let mut reader = ByteReader::new(bytes);
    reader.take(6, "prefix")?;
    let flags = reader.take_u8("flags")?;

    let raw_body = reader.rest();
    let (body, fec_redundancy): (Vec<u8>, Option<u8>) = if flags & FLAG_FEC != 0 {
        let redundancy = FecEncoder::container_redundancy(raw_body)?;
        (FecEncoder::decode(raw_body)?, Some(redundancy))
    } else {
        (raw_body.to_vec(), None)
    };

    let mut body_reader = ByteReader::new(&body);

    let policy = SecurityPolicy::from_bytes(body_reader.take(POLICY_LEN, "security policy")?)?;

    let slot_count = body_reader.take_u8("slot count")? as usize;
    if slot_count > MAX_KEY_SLOTS {
        return Err(VaultError::Format(format!(
            "slot count {slot_count} exceeds maximum {MAX_KEY_SLOTS}"
        )));
    }
    let mut slots = Vec::with_capacity(slot_count);
    for _ in 0..slot_count {
        slots.push(KeySlot::read_from(&mut body_reader)?);
    }

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(body_reader.take(IV_LEN, "payload IV")?);

    let ciphertext = body_reader.rest().to_vec();
    if ciphertext.is_empty() {
        return Err(VaultError::Format("missing payload ciphertext".into()));
    }

    Ok(ParsedV2 {
        header: VaultHeader { policy, slots },
        iv,
        ciphertext,
        fec_redundancy,
    })
}

/// Parse a legacy v1 file.  FEC repair happens here; the caller only
/// sees the recovered ciphertext.
pub fn parse_file_v1(bytes: &[u8]) -> Result<ParsedV1> {
    if detect_version(bytes)? != VERSION_V1 {
        return Err(VaultError::Format("expected a v1 vault file".into()));
    }

    let mut reader = ByteReader::new(bytes);
    reader.take(6, "prefix")?;

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(reader.take(SALT_LEN, "salt")?);

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(reader.take(IV_LEN, "IV")?);

    let flags = reader.take_u8("flags")?;
    let rest = reader.rest();

    let ciphertext = if flags & FLAG_FEC != 0 {
        FecEncoder::decode(rest)?
    } else {
        rest.to_vec()
    };
    if ciphertext.is_empty() {
        return Err(VaultError::Format("missing payload ciphertext".into()));
    }

    Ok(ParsedV1 {
        salt,
        iv,
        ciphertext,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::{KdfAlgorithm, MAX_DIGEST_LEN, USERNAME_SALT_LEN};
    use crate::crypto::wrap::WRAPPED_DEK_LEN;
    use crate::format::slot::Role;
    use crate::token::CHALLENGE_LEN;

    fn admin_slot() -> KeySlot {
        let mut digest = [0u8; MAX_DIGEST_LEN];
        digest[..32].copy_from_slice(&[0x11; 32]);
        KeySlot {
            active: true,
            username_digest: digest,
            username_digest_len: 32,
            username_salt: [0x22; USERNAME_SALT_LEN],
            kek_algorithm: KdfAlgorithm::Pbkdf2Sha256,
            salt: [0x33; 32],
            wrapped_dek: [0x44; WRAPPED_DEK_LEN],
            role: Role::Administrator,
            must_change_password: false,
            password_changed_at: 0,
            last_login_at: 0,
            token_enrolled: false,
            token_challenge: [0u8; CHALLENGE_LEN],
            token_serial: String::new(),
            token_enrolled_at: 0,
            password_history: Vec::new(),
        }
    }

    fn sample_header() -> VaultHeader {
        let mut header = VaultHeader::new(SecurityPolicy::default());
        header.slots.push(admin_slot());
        header
    }

    #[test]
    fn v2_file_round_trips_without_fec() {
        let header = sample_header();
        let iv = [9u8; IV_LEN];
        let ct = vec![7u8; 64];

        let file = write_file_v2(&header, &iv, &ct, None).unwrap();
        assert_eq!(detect_version(&file).unwrap(), VERSION_V2);

        let parsed = parse_file_v2(&file).unwrap();
        assert_eq!(parsed.header.slots.len(), 1);
        assert_eq!(parsed.iv, iv);
        assert_eq!(parsed.ciphertext, ct);
        assert!(parsed.fec_redundancy.is_none());
    }

    #[test]
    fn v2_file_round_trips_with_fec() {
        let header = sample_header();
        let iv = [9u8; IV_LEN];
        let ct = vec![7u8; 64];

        let file = write_file_v2(&header, &iv, &ct, Some(10)).unwrap();
        let parsed = parse_file_v2(&file).unwrap();
        assert_eq!(parsed.ciphertext, ct);
        assert_eq!(parsed.fec_redundancy, Some(10));
    }

    #[test]
    fn fec_repairs_header_corruption() {
        let header = sample_header();
        let iv = [9u8; IV_LEN];
        let ct = vec![7u8; 128];

        let mut file = write_file_v2(&header, &iv, &ct, Some(20)).unwrap();
        // Flip bytes past the 7-byte file prefix; the first hits the
        // replicated container prefix, the rest land in RS blocks.
        for i in 0..10 {
            file[12 + i * 7] ^= 0xFF;
        }
        let parsed = parse_file_v2(&file).unwrap();
        assert_eq!(parsed.ciphertext, ct);
    }

    #[test]
    fn bad_magic_is_a_format_error() {
        let mut file = write_file_v2(&sample_header(), &[0u8; IV_LEN], &[1u8; 32], None).unwrap();
        file[0] = b'X';
        assert!(matches!(
            detect_version(&file),
            Err(VaultError::Format(_))
        ));
    }

    #[test]
    fn unknown_version_is_unsupported() {
        let mut file = write_file_v2(&sample_header(), &[0u8; IV_LEN], &[1u8; 32], None).unwrap();
        file[4..6].copy_from_slice(&9u16.to_le_bytes());
        assert!(matches!(
            detect_version(&file),
            Err(VaultError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn header_without_an_active_admin_cannot_be_written() {
        let mut header = sample_header();
        header.slots[0].role = Role::Standard;
        assert!(matches!(
            write_file_v2(&header, &[0u8; IV_LEN], &[1u8; 32], None),
            Err(VaultError::LastAdministrator)
        ));
    }

    #[test]
    fn truncated_v2_body_is_a_format_error() {
        let file = write_file_v2(&sample_header(), &[0u8; IV_LEN], &[1u8; 32], None).unwrap();
        assert!(matches!(
            parse_file_v2(&file[..40]),
            Err(VaultError::Format(_))
        ));
    }

    #[test]
    fn v1_file_parses() {
        let mut file = Vec::new();
        file.extend_from_slice(&MAGIC);
        file.extend_from_slice(&VERSION_V1.to_le_bytes());
        file.extend_from_slice(&[5u8; SALT_LEN]);
        file.extend_from_slice(&[6u8; IV_LEN]);
        file.push(0); // no FEC
        file.extend_from_slice(&[7u8; 48]);

        let parsed = parse_file_v1(&file).unwrap();
        assert_eq!(parsed.salt, [5u8; SALT_LEN]);
        assert_eq!(parsed.iv, [6u8; IV_LEN]);
        assert_eq!(parsed.ciphertext, vec![7u8; 48]);
    }
}
