//! In-memory handling of the data-encryption key.
//!
//! The DEK is the one secret shared by every key slot.  It lives in a
//! [`Dek`] wrapper that pins its page with `mlock` where the platform
//! allows (so it is not swapped to disk) and zeroizes the bytes on drop.
//! An mlock failure is not fatal — unprivileged processes often hit
//! RLIMIT_MEMLOCK — but the zeroize guarantee always holds.

use zeroize::Zeroize;

/// Length of the DEK in bytes (256 bits).
pub const DEK_LEN: usize = 32;

/// A 32-byte data-encryption key with locked, self-erasing storage.
pub struct Dek {
    bytes: Box<[u8; DEK_LEN]>,
    locked: bool,
}

impl Dek {
    /// Wrap raw key bytes.  The caller's copy is wiped; attempts to
    /// mlock the backing memory.
    pub fn new(mut bytes: [u8; DEK_LEN]) -> Self {
        let boxed = Box::new(bytes);
        bytes.zeroize();
        let locked = lock_memory(boxed.as_ptr(), DEK_LEN);
        Self {
            bytes: boxed,
            locked,
        }
    }

    /// Generate a fresh random DEK.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; DEK_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let dek = Self::new(bytes);
        // Arrays are Copy; wipe this frame's copy as well.
        bytes.zeroize();
        dek
    }

    pub fn as_bytes(&self) -> &[u8; DEK_LEN] {
        &self.bytes
    }

    /// Whether the backing memory is actually pinned.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for Dek {
    fn drop(&mut self) {
        self.bytes.zeroize();
        if self.locked {
            unlock_memory(self.bytes.as_ptr(), DEK_LEN);
        }
    }
}

impl std::fmt::Debug for Dek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Dek").field("locked", &self.locked).finish()
    }
}

#[cfg(unix)]
fn lock_memory(ptr: *const u8, len: usize) -> bool {
    // Safety: the pointer and length describe memory owned by the
    // boxed array, which outlives the lock.
    unsafe { libc::mlock(ptr as *const libc::c_void, len) == 0 }
}

#[cfg(unix)]
fn unlock_memory(ptr: *const u8, len: usize) {
    unsafe {
        libc::munlock(ptr as *const libc::c_void, len);
    }
}

#[cfg(not(unix))]
fn lock_memory(_ptr: *const u8, _len: usize) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock_memory(_ptr: *const u8, _len: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_deks_are_distinct() {
        let a = Dek::generate();
        let b = Dek::generate();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn debug_never_leaks_bytes() {
        let dek = Dek::new([0xAB; DEK_LEN]);
        let printed = format!("{dek:?}");
        assert!(!printed.contains("171")); // 0xAB
        assert!(!printed.to_lowercase().contains("ab, ab"));
    }
}
