// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Cryptographic Primitives
//!
//! Thin, typed wrappers around the primitive classes the enclave composes:
//!
//! - `aead` - AES-256-GCM with a 16-byte IV and associated data
//! - `kem` - X25519 key encapsulation producing per-operation symmetric keys
//! - `shamir` - threshold secret sharing over GF(256)
//! - `kdf` - master-key derivation from the reconstructed root secret
//!
//! ## Security
//!
//! - Every symmetric key is zeroized when dropped
//! - No function here retries on failure; callers classify `CryptoError`
//! - Key material is never formatted by `Debug`

pub mod aead;
pub mod kdf;
pub mod kem;
pub mod shamir;

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

pub use aead::Encrypted;
pub use kdf::MasterKeyDerivation;
pub use kem::{KemKeyPair, SessionKey, SymmetricAlgorithm};
pub use shamir::Share;

/// Length in bytes of every symmetric key handled by the enclave (AES-256).
pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, failing unless it is exactly `KEY_LEN` bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Borrow the raw key bytes.
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Errors raised by the primitive wrappers.
///
/// These are classified by the enclave at the operation boundary and are
/// never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("AEAD authentication failed")]
    Aead,

    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid IV length: expected {expected} bytes, got {actual}")]
    InvalidIvLength { expected: usize, actual: usize },

    #[error("Malformed encapsulation: {0}")]
    MalformedEncapsulation(String),

    #[error("Key exchange produced a non-contributory shared secret")]
    NonContributory,

    #[error("Key derivation failed")]
    KeyDerivation,

    #[error("Secure random generator failure")]
    Random,

    #[error("Secret split failed: {0}")]
    Split(String),

    #[error("Secret combine failed: {0}")]
    Combine(String),

    #[error("Malformed share: {0}")]
    MalformedShare(String),
}
