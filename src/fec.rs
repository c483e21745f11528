//! Reed-Solomon forward error correction for the vault body.
//!
//! Media-level bit rot is the threat here, not tampering — the AEAD tag
//! still authenticates the payload after repair.  Data is split into
//! 255-byte RS blocks over GF(2^8); each block carries enough parity
//! that up to the configured redundancy percentage of its bytes can be
//! corrupted and still repaired.  Corruption beyond that capacity is an
//! explicit [`VaultError::Integrity`], never silently wrong bytes.
//!
//! Container layout:
//!   [ prefix x3 | 255-byte blocks... ]
//!   prefix = [ redundancy: 1 | original_len: u32 BE ]
//!
//! The prefix sits outside the RS parity, so it is stored three times
//! and recovered by per-bit majority vote: a flipped byte there is as
//! repairable as one inside a block.

use reed_solomon::{Decoder, Encoder};

use crate::errors::{Result, VaultError};

/// RS block size over GF(2^8).
const BLOCK_LEN: usize = 255;

/// Minimum data bytes kept per block, bounding the parity share.
const MIN_DATA_PER_BLOCK: usize = 16;

/// Container prefix fields: redundancy byte + original length.
const PREFIX_LEN: usize = 1 + 4;

/// The prefix is stored three times for majority-vote recovery.
const CONTAINER_HEADER_LEN: usize = PREFIX_LEN * 3;

/// Lowest accepted redundancy percentage.
pub const MIN_REDUNDANCY: u8 = 5;

/// Highest accepted redundancy percentage.
pub const MAX_REDUNDANCY: u8 = 50;

/// Parity bytes per block for a redundancy percentage.
///
/// RS corrects `parity / 2` unknown byte errors, so covering r% of a
/// block takes `2 * r%` parity bytes, rounded up.
fn parity_len(redundancy: u8) -> usize {
    let raw = (BLOCK_LEN * 2 * redundancy as usize).div_ceil(100);
    raw.min(BLOCK_LEN - MIN_DATA_PER_BLOCK)
}

/// Recover the container prefix by per-bit majority over its three
/// stored copies.
fn read_prefix(encoded: &[u8]) -> Result<(u8, usize)> {
    if encoded.len() < CONTAINER_HEADER_LEN {
        return Err(VaultError::Format("FEC container truncated".into()));
    }
    let mut prefix = [0u8; PREFIX_LEN];
    for (i, byte) in prefix.iter_mut().enumerate() {
        let (a, b, c) = (
            encoded[i],
            encoded[PREFIX_LEN + i],
            encoded[2 * PREFIX_LEN + i],
        );
        *byte = (a & b) | (a & c) | (b & c);
    }
    let redundancy = prefix[0];
    validate_redundancy(redundancy)?;

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&prefix[1..PREFIX_LEN]);
    Ok((redundancy, u32::from_be_bytes(len_bytes) as usize))
}

fn validate_redundancy(redundancy: u8) -> Result<()> {
    if !(MIN_REDUNDANCY..=MAX_REDUNDANCY).contains(&redundancy) {
        return Err(VaultError::Format(format!(
            "FEC redundancy {redundancy}% out of range {MIN_REDUNDANCY}-{MAX_REDUNDANCY}"
        )));
    }
    Ok(())
}

/// Block-wise Reed-Solomon encoder/decoder at a fixed redundancy level.
pub struct FecEncoder {
    redundancy: u8,
    parity: usize,
}

impl FecEncoder {
    pub fn new(redundancy: u8) -> Result<Self> {
        validate_redundancy(redundancy)?;
        Ok(Self {
            redundancy,
            parity: parity_len(redundancy),
        })
    }

    pub fn redundancy(&self) -> u8 {
        self.redundancy
    }

    /// Data bytes carried per 255-byte block.
    pub fn data_per_block(&self) -> usize {
        BLOCK_LEN - self.parity
    }

    /// Encode opaque bytes into the FEC container.  Deterministic.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(VaultError::Format("cannot FEC-encode empty data".into()));
        }
        let original_len = u32::try_from(data.len())
            .map_err(|_| VaultError::Format("data too large for FEC container".into()))?;

        let chunk = self.data_per_block();
        let blocks = data.len().div_ceil(chunk);
        let encoder = Encoder::new(self.parity);

        let mut prefix = [0u8; PREFIX_LEN];
        prefix[0] = self.redundancy;
        prefix[1..PREFIX_LEN].copy_from_slice(&original_len.to_be_bytes());

        let mut out = Vec::with_capacity(CONTAINER_HEADER_LEN + blocks * BLOCK_LEN);
        for _ in 0..3 {
            out.extend_from_slice(&prefix);
        }

        for piece in data.chunks(chunk) {
            if piece.len() == chunk {
                out.extend_from_slice(&encoder.encode(piece));
            } else {
                // Last block: zero-pad so every block is 255 bytes on
                // the wire; original_len restores the true length.
                let mut padded = vec![0u8; chunk];
                padded[..piece.len()].copy_from_slice(piece);
                out.extend_from_slice(&encoder.encode(&padded));
            }
        }
        Ok(out)
    }

    /// Decode a container produced by [`encode`], repairing what the
    /// parity allows.
    pub fn decode(encoded: &[u8]) -> Result<Vec<u8>> {
        let (redundancy, original_len) = read_prefix(encoded)?;

        let body = &encoded[CONTAINER_HEADER_LEN..];
        if body.is_empty() || body.len() % BLOCK_LEN != 0 {
            return Err(VaultError::Format(format!(
                "FEC body length {} is not a whole number of blocks",
                body.len()
            )));
        }

        let parity = parity_len(redundancy);
        let chunk = BLOCK_LEN - parity;
        if body.len() / BLOCK_LEN * chunk < original_len {
            return Err(VaultError::Format(
                "FEC container shorter than its declared payload".into(),
            ));
        }

        let decoder = Decoder::new(parity);
        let mut data = Vec::with_capacity(original_len);
        for block in body.chunks(BLOCK_LEN) {
            let repaired = decoder
                .correct(block, None)
                .map_err(|_| VaultError::Integrity)?;
            data.extend_from_slice(repaired.data());
        }

        data.truncate(original_len);
        Ok(data)
    }

    /// Read the redundancy level out of a container without decoding it.
    pub fn container_redundancy(encoded: &[u8]) -> Result<u8> {
        Ok(read_prefix(encoded)?.0)
    }
}
