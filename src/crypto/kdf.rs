// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Master-key derivation from the reconstructed root secret.
//!
//! Whatever the configured algorithm, the output must be exactly
//! [`KEY_LEN`] bytes. Anything else is a configuration fault, reported as
//! [`CryptoError::InvalidKeyLength`] and escalated to fatal by the enclave.

use std::str::FromStr;

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512_256};

use super::{CryptoError, SymmetricKey, KEY_LEN};

const HKDF_INFO: &[u8] = b"sealed-enclave/master-key/v1";

/// Digest/KDF used to turn the root secret into the master key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MasterKeyDerivation {
    #[default]
    Sha256,
    Sha512_256,
    HkdfSha256,
}

impl MasterKeyDerivation {
    /// Derive the 32-byte master key.
    pub fn derive(&self, root_secret: &[u8]) -> Result<SymmetricKey, CryptoError> {
        match self {
            MasterKeyDerivation::Sha256 => digest_key::<Sha256>(root_secret),
            MasterKeyDerivation::Sha512_256 => digest_key::<Sha512_256>(root_secret),
            MasterKeyDerivation::HkdfSha256 => {
                let hk = Hkdf::<Sha256>::new(None, root_secret);
                let mut okm = [0u8; KEY_LEN];
                hk.expand(HKDF_INFO, &mut okm)
                    .map_err(|_| CryptoError::KeyDerivation)?;
                let key = SymmetricKey::new(okm);
                zeroize::Zeroize::zeroize(&mut okm);
                Ok(key)
            }
        }
    }
}

impl FromStr for MasterKeyDerivation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(MasterKeyDerivation::Sha256),
            "sha512-256" | "sha512_256" => Ok(MasterKeyDerivation::Sha512_256),
            "hkdf-sha256" | "hkdf" => Ok(MasterKeyDerivation::HkdfSha256),
            other => Err(format!("unsupported key derivation: {other}")),
        }
    }
}

fn digest_key<D: Digest>(root_secret: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let digest = D::digest(root_secret);
    SymmetricKey::from_slice(digest.as_slice())
}
