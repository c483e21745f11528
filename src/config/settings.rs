use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, VaultError};
use crate::format::policy::SecurityPolicy;

/// User-level configuration, loaded from `.multivault.toml`.
///
/// Every field has a sensible default so the tool works without any
/// config file at all.  These are *defaults for new vaults*; an
/// existing vault's policy always comes from its own header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Vault file used when `--vault` is not passed.
    #[serde(default = "default_vault_file")]
    pub vault_file: String,

    /// Minimum password length for new vaults.
    #[serde(default = "default_min_password_length")]
    pub min_password_length: u32,

    /// PBKDF2 iteration count for new vaults.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Password history depth for new vaults (0 disables).
    #[serde(default = "default_history_depth")]
    pub password_history_depth: u32,

    /// FEC redundancy percent for new vaults (0 disables FEC).
    #[serde(default)]
    pub fec_redundancy: u8,

    /// Argon2 memory cost in KiB (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u8,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_vault_file() -> String {
    "multivault.vault".to_string()
}

fn default_min_password_length() -> u32 {
    12
}

fn default_kdf_iterations() -> u32 {
    600_000
}

fn default_history_depth() -> u32 {
    5
}

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u8 {
    4
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_file: default_vault_file(),
            min_password_length: default_min_password_length(),
            kdf_iterations: default_kdf_iterations(),
            password_history_depth: default_history_depth(),
            fec_redundancy: 0,
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the working directory.
    const FILE_NAME: &'static str = ".multivault.toml";

    /// Load settings from `<dir>/.multivault.toml`.
    ///
    /// If the file does not exist, defaults are returned.  If it exists
    /// but cannot be parsed, an error is returned.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            VaultError::Config(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        Ok(settings)
    }

    /// Resolve the vault file path against a working directory.
    pub fn vault_path(&self, dir: &Path) -> PathBuf {
        dir.join(&self.vault_file)
    }

    /// Build the security policy a new vault gets from these settings.
    pub fn new_vault_policy(&self) -> SecurityPolicy {
        SecurityPolicy {
            min_password_length: self.min_password_length,
            kdf_iterations: self.kdf_iterations,
            password_history_depth: self.password_history_depth,
            argon2_memory_kib: self.argon2_memory_kib,
            argon2_iterations: self.argon2_iterations,
            argon2_parallelism: self.argon2_parallelism,
            ..Default::default()
        }
    }

    /// FEC redundancy as the engine expects it (`None` disables).
    pub fn fec(&self) -> Option<u8> {
        if self.fec_redundancy == 0 {
            None
        } else {
            Some(self.fec_redundancy)
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
