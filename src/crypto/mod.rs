//! Cryptographic primitives for the vault engine.
//!
//! - `kdf` — password-based KEK derivation and username digesting
//! - `wrap` — AES-256-KW wrapping of the shared DEK into key slots
//! - `encryption` — AES-256-GCM payload encryption
//! - `keys` — locked, self-erasing DEK storage

pub mod encryption;
pub mod kdf;
pub mod keys;
pub mod wrap;
