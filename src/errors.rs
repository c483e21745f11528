use std::path::PathBuf;
use thiserror::Error;

/// Reasons a new password can be rejected by the vault policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    /// Password is shorter than the policy's minimum length.
    TooShort { min: u32, actual: usize },
    /// Password matches one of the user's recent passwords.
    Reused,
    /// A policy field is outside its allowed range.
    InvalidPolicy(String),
}

impl std::fmt::Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyViolation::TooShort { min, actual } => {
                write!(f, "password too short — {actual} chars, minimum {min}")
            }
            PolicyViolation::Reused => write!(f, "password was used previously"),
            PolicyViolation::InvalidPolicy(msg) => write!(f, "invalid policy: {msg}"),
        }
    }
}

/// Reasons a hardware-token operation can fail.
///
/// Callers authenticating a user must collapse these into
/// [`VaultError::Authentication`] before surfacing them, so an attacker
/// cannot distinguish "wrong password" from "wrong token".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenFailure {
    /// No token device is connected.
    NotPresent,
    /// The connected device's serial does not match the enrolled one.
    Unauthorized,
    /// The device's response is too short to combine into a key safely.
    ResponseTooShort { got: usize, need: usize },
    /// The device reported an internal error.
    Device(String),
    /// The challenge wait exceeded the driver timeout.
    Timeout,
}

impl std::fmt::Display for TokenFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenFailure::NotPresent => write!(f, "token not present"),
            TokenFailure::Unauthorized => write!(f, "token not authorized for this vault"),
            TokenFailure::ResponseTooShort { got, need } => {
                write!(f, "token response too short — {got} bytes, need {need}")
            }
            TokenFailure::Device(msg) => write!(f, "token device error: {msg}"),
            TokenFailure::Timeout => write!(f, "token challenge timed out"),
        }
    }
}

/// All errors that can occur in MultiVault.
#[derive(Debug, Error)]
pub enum VaultError {
    // --- File structure ---
    #[error("Invalid vault format: {0}")]
    Format(String),

    #[error("Unsupported vault version {0}")]
    UnsupportedVersion(u16),

    // --- Authentication ---
    /// Wrong username, password, or token combination.  Deliberately
    /// undifferentiated: the wrap integrity check is the only signal.
    #[error("Authentication failed — wrong username, password, or token")]
    Authentication,

    // --- Integrity ---
    /// Corruption beyond what FEC could repair, or a tampered AEAD tag.
    /// Fatal for the file; restore from a backup.
    #[error("Integrity check failed — vault data is corrupt or tampered")]
    Integrity,

    // --- Policy ---
    #[error("Policy violation: {0}")]
    Policy(PolicyViolation),

    // --- Hardware token ---
    #[error("Token error: {0}")]
    Token(TokenFailure),

    // --- Crypto plumbing ---
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    // --- Vault lifecycle ---
    #[error("Vault not found at {0}")]
    VaultNotFound(PathBuf),

    #[error("Vault already exists at {0}")]
    VaultAlreadyExists(PathBuf),

    // --- Multi-user management ---
    #[error("User not found")]
    UserNotFound,

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("Permission denied — administrator role required")]
    PermissionDenied,

    #[error("Cannot remove the last administrator")]
    LastAdministrator,

    #[error("Cannot remove your own account")]
    SelfRemoval,

    #[error("Maximum number of key slots ({0}) reached")]
    MaxUsers(usize),

    #[error("Password change required before the vault can be modified")]
    PasswordChangeRequired,

    // --- IO ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Config ---
    #[error("Config file error: {0}")]
    Config(String),

    // --- CLI ---
    #[error("User cancelled operation")]
    UserCancelled,
}

impl From<PolicyViolation> for VaultError {
    fn from(v: PolicyViolation) -> Self {
        VaultError::Policy(v)
    }
}

impl From<TokenFailure> for VaultError {
    fn from(t: TokenFailure) -> Self {
        VaultError::Token(t)
    }
}

/// Convenience type alias for MultiVault results.
pub type Result<T> = std::result::Result<T, VaultError>;
