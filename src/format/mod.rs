//! On-disk vault format: policy and slot records, file header, version
//! dispatch.
//!
//! Parsing is defensive throughout.  Length checks are subtraction-based
//! (`remaining >= need`), never `offset + size > total`, so a hostile
//! length field cannot overflow an addition and slip past the check.

pub mod header;
pub mod policy;
pub mod slot;

use crate::errors::{Result, VaultError};

/// Sequential reader over untrusted bytes with overflow-safe bounds.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Take the next `n` bytes, or fail with a format error naming the
    /// field being read.
    pub fn take(&mut self, n: usize, field: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(VaultError::Format(format!(
                "truncated while reading {field}: need {n} bytes, have {}",
                self.remaining()
            )));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn take_u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    pub fn take_u16_le(&mut self, field: &str) -> Result<u16> {
        let b = self.take(2, field)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn take_i64_be(&mut self, field: &str) -> Result<i64> {
        let b = self.take(8, field)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_be_bytes(arr))
    }

    /// The unread tail of the input.
    pub fn rest(self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_enforces_bounds_by_subtraction() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        assert_eq!(r.take(2, "head").unwrap(), &[1, 2]);
        assert_eq!(r.remaining(), 1);
        assert!(r.take(2, "tail").is_err());
        // Failed take consumes nothing.
        assert_eq!(r.take_u8("last").unwrap(), 3);
    }
}
