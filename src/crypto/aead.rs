// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! AEAD codec: AES-256-GCM with a 16-byte random IV per call.
//!
//! The associated data is authenticated but not encrypted, and is echoed
//! back in [`Encrypted`] so the caller can verify it on decryption. A
//! decryption failure is a security event; callers must not retry it with
//! other keys.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use super::{CryptoError, SymmetricKey};

/// IV length in bytes.
pub const IV_LEN: usize = 16;

/// Authentication tag length in bytes (128-bit tag).
pub const TAG_LEN: usize = 16;

/// AES-256-GCM keyed with a 16-byte nonce and a 16-byte tag.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Output of [`encrypt`]: ciphertext with appended tag, IV and the
/// associated data that was bound into the tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypted {
    pub cipher_text: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub associated_data: Vec<u8>,
}

impl Encrypted {
    /// Reassemble an `Encrypted` from wire parts, validating the IV length.
    pub fn from_parts(
        cipher_text: &[u8],
        iv: &[u8],
        associated_data: &[u8],
    ) -> Result<Self, CryptoError> {
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| CryptoError::InvalidIvLength {
            expected: IV_LEN,
            actual: iv.len(),
        })?;
        Ok(Self {
            cipher_text: cipher_text.to_vec(),
            iv,
            associated_data: associated_data.to_vec(),
        })
    }
}

/// Fill `buf` from the system CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> Result<(), CryptoError> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| CryptoError::Random)
}

fn cipher(key: &SymmetricKey) -> Result<Aes256Gcm16, CryptoError> {
    Aes256Gcm16::new_from_slice(key.expose()).map_err(|_| CryptoError::InvalidKeyLength {
        expected: super::KEY_LEN,
        actual: key.expose().len(),
    })
}

/// Encrypt `plaintext` under `key`, binding `associated_data` into the tag.
pub fn encrypt(
    plaintext: &[u8],
    key: &SymmetricKey,
    associated_data: &[u8],
) -> Result<Encrypted, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    fill_random(&mut iv)?;

    let cipher_text = cipher(key)?
        .encrypt(
            Nonce::<U16>::from_slice(&iv),
            Payload {
                msg: plaintext,
                aad: associated_data,
            },
        )
        .map_err(|_| CryptoError::Aead)?;

    Ok(Encrypted {
        cipher_text,
        iv,
        associated_data: associated_data.to_vec(),
    })
}

/// Verify and decrypt. Fails on any tag mismatch (wrong key, tampered
/// ciphertext or tampered associated data).
pub fn decrypt(encrypted: &Encrypted, key: &SymmetricKey) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if encrypted.cipher_text.len() < TAG_LEN {
        return Err(CryptoError::Aead);
    }

    let plaintext = cipher(key)?
        .decrypt(
            Nonce::<U16>::from_slice(&encrypted.iv),
            Payload {
                msg: &encrypted.cipher_text,
                aad: &encrypted.associated_data,
            },
        )
        .map_err(|_| CryptoError::Aead)?;

    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SymmetricKey {
        SymmetricKey::new([byte; crate::crypto::KEY_LEN])
    }

    #[test]
    fn round_trip_with_associated_data() {
        let k = key(1);
        for (plaintext, ad) in [
            (&b""[..], &b""[..]),
            (&b"share bytes"[..], &b"tag"[..]),
            (&[0u8; 4096][..], &b"a longer associated data string"[..]),
        ] {
            let encrypted = encrypt(plaintext, &k, ad).unwrap();
            assert_eq!(encrypted.associated_data, ad);
            assert_eq!(encrypted.cipher_text.len(), plaintext.len() + TAG_LEN);
            assert_eq!(&*decrypt(&encrypted, &k).unwrap(), plaintext);
        }
    }

    #[test]
    fn fresh_iv_per_call() {
        let k = key(2);
        let a = encrypt(b"same", &k, b"ad").unwrap();
        let b = encrypt(b"same", &k, b"ad").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.cipher_text, b.cipher_text);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let k = key(3);
        let mut encrypted = encrypt(b"payload", &k, b"ad").unwrap();
        encrypted.cipher_text[0] ^= 0x01;
        assert!(matches!(decrypt(&encrypted, &k), Err(CryptoError::Aead)));
    }

    #[test]
    fn tampered_associated_data_fails() {
        let k = key(4);
        let mut encrypted = encrypt(b"payload", &k, b"share").unwrap();
        encrypted.associated_data = b"provisioning".to_vec();
        assert!(matches!(decrypt(&encrypted, &k), Err(CryptoError::Aead)));
    }

    #[test]
    fn wrong_key_fails() {
        let encrypted = encrypt(b"payload", &key(5), b"ad").unwrap();
        assert!(matches!(decrypt(&encrypted, &key(6)), Err(CryptoError::Aead)));
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let k = key(7);
        let mut encrypted = encrypt(b"payload", &k, b"ad").unwrap();
        encrypted.cipher_text.truncate(TAG_LEN - 1);
        assert!(matches!(decrypt(&encrypted, &k), Err(CryptoError::Aead)));
    }

    #[test]
    fn from_parts_rejects_short_iv() {
        let err = Encrypted::from_parts(b"ct", &[0u8; 12], b"ad").unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidIvLength {
                expected: 16,
                actual: 12
            }
        ));
    }
}
