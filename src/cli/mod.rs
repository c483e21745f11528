//! CLI module — Clap argument parser, output helpers, and command
//! implementations.

pub mod output;

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use zeroize::Zeroizing;

use crate::config::Settings;
use crate::errors::{Result, VaultError};
use crate::format::slot::Role;
use crate::token::{HmacToken, TokenDevice};
use crate::vault::{CreateParams, CreateStep, Vault};

/// MultiVault CLI: multi-user encrypted vault.
#[derive(Parser)]
#[command(
    name = "multivault",
    about = "Multi-user encrypted vault with per-user key slots",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Vault file (default: from .multivault.toml, else multivault.vault)
    #[arg(long, global = true)]
    pub vault: Option<PathBuf>,

    /// Username to authenticate as
    #[arg(short, long, global = true, env = "MULTIVAULT_USER")]
    pub username: Option<String>,

    /// Path to a token keyfile (software token backend)
    #[arg(long, global = true)]
    pub token_keyfile: Option<PathBuf>,
}

/// All available subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create a new vault with a founding administrator
    Init {
        /// Require a hardware token for every user
        #[arg(long)]
        require_token: bool,

        /// FEC redundancy percent 5-50 (overrides settings; 0 disables)
        #[arg(long)]
        fec: Option<u8>,
    },

    /// Show vault policy and the authenticated session
    Status,

    /// Print the decrypted payload to stdout or a file
    Get {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace the payload from a file or stdin
    Put {
        /// Input file (stdin if omitted)
        file: Option<PathBuf>,
    },

    /// Change your password
    Passwd,

    /// Manage users (administrator)
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage hardware-token enrollment
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },

    /// Show or update the security policy
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Migrate a legacy single-user vault into a new multi-user one
    Migrate {
        /// Path to the legacy vault file
        legacy: PathBuf,
    },
}

/// User management subcommands.
#[derive(clap::Subcommand)]
pub enum UserAction {
    /// List active users
    List,

    /// Add a user with a temporary password
    Add {
        /// New user's name
        name: String,

        /// Grant the administrator role
        #[arg(long)]
        admin: bool,

        /// Do not force a password change at first login
        #[arg(long)]
        no_force_change: bool,
    },

    /// Remove (deactivate) a user
    Remove {
        /// User to remove
        name: String,
    },

    /// Clear a user's password history (self, or any user as admin)
    ClearHistory {
        /// Target user
        name: String,
    },
}

/// Token subcommands.
#[derive(clap::Subcommand)]
pub enum TokenAction {
    /// Enroll the token named by --token-keyfile on your own slot
    Enroll,

    /// Generate a new random token keyfile
    KeyfileGenerate {
        /// Path for the keyfile
        path: PathBuf,
    },
}

/// Policy subcommands.
#[derive(clap::Subcommand)]
pub enum PolicyAction {
    /// Print the current policy
    Show,

    /// Update mutable policy fields (administrator)
    Set {
        /// Minimum password length (8-128)
        #[arg(long)]
        min_password_length: Option<u32>,

        /// Password history depth (0-24)
        #[arg(long)]
        history_depth: Option<u32>,

        /// Restrict algorithms to FIPS-approved families
        #[arg(long)]
        fips: Option<bool>,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Get the vault password, trying in order:
/// 1. `MULTIVAULT_PASSWORD` env var (scripts/CI)
/// 2. Interactive prompt
///
/// Returns `Zeroizing<String>` so the password is wiped on drop.
pub fn prompt_password(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var("MULTIVAULT_PASSWORD") {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    let pw = dialoguer::Password::new()
        .with_prompt(prompt)
        .interact()
        .map_err(|e| VaultError::Config(format!("password prompt: {e}")))?;
    Ok(Zeroizing::new(pw))
}

/// Prompt for a new password with confirmation.
///
/// Also respects `MULTIVAULT_NEW_PASSWORD` for scripted usage.  Length
/// is checked against the policy minimum before returning.
pub fn prompt_new_password(min_length: u32) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var("MULTIVAULT_NEW_PASSWORD") {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }

    loop {
        let password = dialoguer::Password::new()
            .with_prompt("Choose password")
            .with_confirmation("Confirm password", "Passwords do not match, try again")
            .interact()
            .map_err(|e| VaultError::Config(format!("password prompt: {e}")))?;

        if (password.chars().count() as u32) < min_length {
            output::warning(&format!(
                "Password must be at least {min_length} characters. Try again."
            ));
            continue;
        }

        return Ok(Zeroizing::new(password));
    }
}

/// Resolve the vault path from the CLI flag or settings.
pub fn vault_path(cli: &Cli, settings: &Settings) -> Result<PathBuf> {
    if let Some(path) = &cli.vault {
        return Ok(path.clone());
    }
    let cwd = std::env::current_dir()?;
    Ok(settings.vault_path(&cwd))
}

/// The username from `--username` / `MULTIVAULT_USER`, or a prompt.
pub fn resolve_username(cli: &Cli) -> Result<String> {
    if let Some(name) = &cli.username {
        return Ok(name.clone());
    }
    dialoguer::Input::new()
        .with_prompt("Username")
        .interact_text()
        .map_err(|e| VaultError::Config(format!("username prompt: {e}")))
}

/// Load the software token from `--token-keyfile`, if passed.
pub fn load_token(cli: &Cli) -> Result<Option<HmacToken>> {
    match &cli.token_keyfile {
        Some(path) => Ok(Some(HmacToken::from_keyfile(path)?)),
        None => Ok(None),
    }
}

fn open_vault(cli: &Cli, settings: &Settings) -> Result<Vault> {
    let path = vault_path(cli, settings)?;
    let username = resolve_username(cli)?;
    let password = prompt_password("Vault password")?;
    let token = load_token(cli)?;
    let vault = Vault::open(
        &path,
        &username,
        &password,
        token.as_ref().map(|t| t as &dyn TokenDevice),
    )?;

    if vault.session().password_change_required {
        output::warning("A password change is required before the vault can be used.");
        output::tip("Run `multivault passwd` to set a new password.");
    }
    if vault.session().token_enrollment_required {
        output::warning("This vault requires a hardware token you have not enrolled.");
        output::tip("Run `multivault token enroll --token-keyfile <file>`.");
    }
    Ok(vault)
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

pub fn cmd_init(cli: &Cli, require_token: bool, fec: Option<u8>) -> Result<()> {
    let settings = Settings::load(&std::env::current_dir()?)?;
    let path = vault_path(cli, &settings)?;
    let username = resolve_username(cli)?;

    let mut policy = settings.new_vault_policy();
    policy.require_token = require_token;
    let fec = match fec {
        Some(0) => None,
        Some(r) => Some(r),
        None => settings.fec(),
    };

    let password = prompt_new_password(policy.min_password_length)?;
    let token = load_token(cli)?;

    let mut progress = |i: usize, total: usize, step: CreateStep| {
        output::info(&format!("[{}/{}] {}", i + 1, total, step.label()));
    };

    let vault = Vault::create(
        CreateParams {
            path: &path,
            username: &username,
            password: &password,
            policy,
            fec_redundancy: fec,
            initial_payload: &[],
        },
        token.as_ref().map(|t| t as &dyn TokenDevice),
        Some(&mut progress),
    )?;

    output::success(&format!("Vault created at {}", vault.path().display()));
    output::tip("Add users with `multivault user add <name>`.");
    Ok(())
}

pub fn cmd_status(cli: &Cli) -> Result<()> {
    let settings = Settings::load(&std::env::current_dir()?)?;
    let vault = open_vault(cli, &settings)?;
    let policy = vault.policy();
    let session = vault.session();

    output::success(&format!("Authenticated as {}", session.username));
    println!("  role:                  {:?}", session.role);
    println!("  active users:          {}", vault.list_users().len());
    println!("  require token:         {}", policy.require_token);
    println!("  min password length:   {}", policy.min_password_length);
    println!("  kdf iterations:        {}", policy.kdf_iterations);
    println!("  history depth:         {}", policy.password_history_depth);
    println!("  fips mode:             {}", policy.fips_mode);
    Ok(())
}

pub fn cmd_get(cli: &Cli, output_file: Option<&PathBuf>) -> Result<()> {
    let settings = Settings::load(&std::env::current_dir()?)?;
    let vault = open_vault(cli, &settings)?;

    match output_file {
        Some(path) => {
            std::fs::write(path, vault.payload())?;
            output::success(&format!("Payload written to {}", path.display()));
        }
        None => {
            use std::io::Write;
            std::io::stdout().write_all(vault.payload())?;
        }
    }
    Ok(())
}

pub fn cmd_put(cli: &Cli, file: Option<&PathBuf>) -> Result<()> {
    let settings = Settings::load(&std::env::current_dir()?)?;
    let mut vault = open_vault(cli, &settings)?;

    let bytes = match file {
        Some(path) => std::fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    vault.set_payload(bytes)?;
    vault.save()?;
    output::success("Payload updated.");
    Ok(())
}

pub fn cmd_passwd(cli: &Cli) -> Result<()> {
    let settings = Settings::load(&std::env::current_dir()?)?;
    let mut vault = open_vault(cli, &settings)?;

    let old = prompt_password("Current password")?;
    let new = prompt_new_password(vault.policy().min_password_length)?;
    let token = load_token(cli)?;

    vault.change_password(&old, &new, token.as_ref().map(|t| t as &dyn TokenDevice))?;
    output::success("Password changed.");
    Ok(())
}

pub fn cmd_user(cli: &Cli, action: &UserAction) -> Result<()> {
    let settings = Settings::load(&std::env::current_dir()?)?;
    let mut vault = open_vault(cli, &settings)?;

    match action {
        UserAction::List => {
            output::print_users(&vault.list_users());
        }
        UserAction::Add {
            name,
            admin,
            no_force_change,
        } => {
            let temp = prompt_new_password(vault.policy().min_password_length)?;
            let role = if *admin {
                Role::Administrator
            } else {
                Role::Standard
            };
            vault.add_user(name, &temp, role, !*no_force_change)?;
            output::success(&format!("User '{name}' added."));
            if !*no_force_change {
                output::tip("They must change the temporary password at first login.");
            }
        }
        UserAction::Remove { name } => {
            vault.remove_user(name)?;
            output::success(&format!("User '{name}' removed."));
        }
        UserAction::ClearHistory { name } => {
            vault.clear_password_history(name)?;
            output::success(&format!("Password history cleared for '{name}'."));
        }
    }
    Ok(())
}

pub fn cmd_token(cli: &Cli, action: &TokenAction) -> Result<()> {
    match action {
        TokenAction::Enroll => {
            let settings = Settings::load(&std::env::current_dir()?)?;
            let token = load_token(cli)?.ok_or_else(|| {
                VaultError::Config("token enrollment needs --token-keyfile".into())
            })?;

            let mut vault = open_vault(cli, &settings)?;
            let password = prompt_password("Vault password")?;
            vault.enroll_token(&password, &token)?;
            output::success(&format!("Token {} enrolled.", token.serial()));
        }
        TokenAction::KeyfileGenerate { path } => {
            use rand::RngCore;
            if path.exists() {
                return Err(VaultError::Config(format!(
                    "{} already exists",
                    path.display()
                )));
            }
            let mut secret = [0u8; 64];
            rand::rngs::OsRng.fill_bytes(&mut secret);
            crate::io::write_atomic(path, &secret)?;
            output::success(&format!("Token keyfile written to {}", path.display()));
            output::warning("Anyone holding this file holds the token. Store it offline.");
        }
    }
    Ok(())
}

pub fn cmd_policy(cli: &Cli, action: &PolicyAction) -> Result<()> {
    let settings = Settings::load(&std::env::current_dir()?)?;
    let mut vault = open_vault(cli, &settings)?;

    match action {
        PolicyAction::Show => {
            let p = vault.policy();
            println!("require_token           = {}", p.require_token);
            println!("min_password_length     = {}", p.min_password_length);
            println!("kdf_iterations          = {}", p.kdf_iterations);
            println!("password_history_depth  = {}", p.password_history_depth);
            println!("username_hash_algorithm = {:?}", p.username_hash_algorithm);
            println!("argon2_memory_kib       = {}", p.argon2_memory_kib);
            println!("argon2_iterations       = {}", p.argon2_iterations);
            println!("argon2_parallelism      = {}", p.argon2_parallelism);
            println!("fips_mode               = {}", p.fips_mode);
        }
        PolicyAction::Set {
            min_password_length,
            history_depth,
            fips,
        } => {
            let mut policy = vault.policy().clone();
            if let Some(len) = min_password_length {
                policy.min_password_length = *len;
            }
            if let Some(depth) = history_depth {
                policy.password_history_depth = *depth;
            }
            if let Some(fips) = fips {
                policy.fips_mode = *fips;
            }
            vault.rotate_policy(policy)?;
            output::success("Policy updated.");
        }
    }
    Ok(())
}

pub fn cmd_migrate(cli: &Cli, legacy: &PathBuf) -> Result<()> {
    let settings = Settings::load(&std::env::current_dir()?)?;
    let path = vault_path(cli, &settings)?;
    let username = resolve_username(cli)?;

    let legacy_password = prompt_password("Legacy vault password")?;
    let payload = crate::vault::open_legacy(legacy, &legacy_password)?;
    output::info(&format!(
        "Legacy vault decrypted ({} bytes of payload).",
        payload.len()
    ));

    let policy = settings.new_vault_policy();
    let new_password = prompt_new_password(policy.min_password_length)?;
    let token = load_token(cli)?;

    Vault::create(
        CreateParams {
            path: &path,
            username: &username,
            password: &new_password,
            policy,
            fec_redundancy: settings.fec(),
            initial_payload: &payload,
        },
        token.as_ref().map(|t| t as &dyn TokenDevice),
        None,
    )?;

    output::success(&format!("Migrated to {}", path.display()));
    output::tip("Verify the new vault opens, then delete the legacy file.");
    Ok(())
}
