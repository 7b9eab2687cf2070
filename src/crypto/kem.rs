// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Key encapsulation over X25519.
//!
//! `encapsulate` runs an ephemeral-static Diffie-Hellman against the
//! recipient's session key and expands the shared secret with HKDF-SHA256.
//! The encapsulation blob is the ephemeral public key. Every share and every
//! provisioning hand-off gets its own symmetric key this way.

use std::fmt;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use super::{CryptoError, SymmetricKey, KEY_LEN};

/// Length of an X25519 public key and of the encapsulation blob.
pub const ENCAPSULATION_LEN: usize = 32;

const KEM_INFO: &[u8] = b"sealed-enclave/kem/x25519-hkdf-sha256/v1";

/// Symmetric algorithm the encapsulated key is destined for.
///
/// The hint is bound into the HKDF info string so a key derived for one
/// algorithm is never reused for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymmetricAlgorithm {
    #[default]
    Aes256Gcm,
}

impl SymmetricAlgorithm {
    /// Stable label bound into key derivation.
    pub fn label(&self) -> &'static str {
        match self {
            SymmetricAlgorithm::Aes256Gcm => "aes-256-gcm",
        }
    }

    /// Key length this algorithm requires.
    pub fn key_len(&self) -> usize {
        match self {
            SymmetricAlgorithm::Aes256Gcm => KEY_LEN,
        }
    }
}

impl std::str::FromStr for SymmetricAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" => Ok(SymmetricAlgorithm::Aes256Gcm),
            other => Err(format!("unsupported symmetric algorithm: {other}")),
        }
    }
}

/// Public half of an enclave's ephemeral session keypair.
///
/// Shareholders and provisioning peers encrypt against this key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionKey([u8; ENCAPSULATION_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; ENCAPSULATION_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ENCAPSULATION_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", String::from(*self))
    }
}

impl From<SessionKey> for String {
    fn from(key: SessionKey) -> Self {
        use base64ct::{Base64, Encoding};
        Base64::encode_string(&key.0)
    }
}

impl TryFrom<String> for SessionKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        use base64ct::{Base64, Encoding};
        let bytes = Base64::decode_vec(&value).map_err(|e| format!("invalid base64: {e}"))?;
        let arr: [u8; ENCAPSULATION_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| format!("session key must be {ENCAPSULATION_LEN} bytes"))?;
        Ok(Self(arr))
    }
}

/// Ephemeral session keypair held by an enclave while unsealing.
///
/// The secret half is zeroized on drop.
pub struct KemKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KemKeyPair {
    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public half, as handed to shareholders.
    pub fn session_key(&self) -> SessionKey {
        SessionKey(self.public.to_bytes())
    }
}

impl fmt::Debug for KemKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KemKeyPair")
            .field("public", &self.session_key())
            .finish_non_exhaustive()
    }
}

fn derive(
    shared: &[u8],
    encapsulation: &[u8; ENCAPSULATION_LEN],
    recipient: &[u8; ENCAPSULATION_LEN],
    algorithm: SymmetricAlgorithm,
) -> Result<SymmetricKey, CryptoError> {
    let mut salt = [0u8; ENCAPSULATION_LEN * 2];
    salt[..ENCAPSULATION_LEN].copy_from_slice(encapsulation);
    salt[ENCAPSULATION_LEN..].copy_from_slice(recipient);

    let mut info = Vec::with_capacity(KEM_INFO.len() + 16);
    info.extend_from_slice(KEM_INFO);
    info.extend_from_slice(algorithm.label().as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(&info, &mut okm[..algorithm.key_len()])
        .map_err(|_| CryptoError::KeyDerivation)?;
    let key = SymmetricKey::new(okm);
    zeroize::Zeroize::zeroize(&mut okm);
    Ok(key)
}

/// Produce a fresh symmetric key bound to `recipient` plus the blob the
/// recipient needs to recover it.
pub fn encapsulate(
    recipient: &SessionKey,
    algorithm: SymmetricAlgorithm,
) -> Result<(SymmetricKey, Vec<u8>), CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let encapsulation = PublicKey::from(&ephemeral).to_bytes();
    let shared = ephemeral.diffie_hellman(&PublicKey::from(recipient.0));
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }

    let key = derive(shared.as_bytes(), &encapsulation, &recipient.0, algorithm)?;
    Ok((key, encapsulation.to_vec()))
}

/// Recover the symmetric key from `keypair` and an encapsulation blob.
///
/// A blob produced for a different recipient decapsulates to an unrelated
/// key; the mismatch surfaces as an AEAD failure on the ciphertext.
pub fn decapsulate(
    keypair: &KemKeyPair,
    encapsulation: &[u8],
    algorithm: SymmetricAlgorithm,
) -> Result<SymmetricKey, CryptoError> {
    let blob: [u8; ENCAPSULATION_LEN] = encapsulation.try_into().map_err(|_| {
        CryptoError::MalformedEncapsulation(format!(
            "expected {ENCAPSULATION_LEN} bytes, got {}",
            encapsulation.len()
        ))
    })?;

    let shared = keypair.secret.diffie_hellman(&PublicKey::from(blob));
    if !shared.was_contributory() {
        return Err(CryptoError::NonContributory);
    }

    derive(shared.as_bytes(), &blob, &keypair.public.to_bytes(), algorithm)
}
