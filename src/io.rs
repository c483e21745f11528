//! Vault file IO.
//!
//! Writes are atomic: the new image goes to a temp file in the same
//! directory, is fsynced, then renamed over the target.  A crash at any
//! point leaves either the old file or the new file, never a torn one.
//! Files are created owner-read/write only.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::{Result, VaultError};

/// Read a vault file in full.
pub fn read_vault_file(path: &Path) -> Result<Vec<u8>> {
    if !path.exists() {
        return Err(VaultError::VaultNotFound(path.to_path_buf()));
    }
    Ok(fs::read(path)?)
}

/// Atomically replace `path` with `bytes`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path);

    // Write the full image to the temp file first.
    let result = write_temp(&temp_path, bytes).and_then(|()| {
        fs::rename(&temp_path, path)?;
        sync_parent_dir(path)
    });

    if result.is_err() {
        // Never leave a partial file behind.
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_temp(temp_path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Fsync the containing directory so the rename itself is durable.
fn sync_parent_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}
