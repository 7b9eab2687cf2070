// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fernet-style bearer-token codec.
//!
//! ## Layout
//!
//! ```text
//! base64url(
//!   version   (1 byte, 0x80)
//!   timestamp (8 bytes, big-endian unix seconds)
//!   iv        (16 bytes)
//!   ciphertext (AES-256-GCM, header bound as associated data)
//!   hmac      (32 bytes, HMAC-SHA256 over everything above)
//! )
//! ```
//!
//! Signing and encryption sub-keys are derived from the master key with
//! HKDF-SHA256, so the master key itself never touches a token.

use base64ct::{Base64Url, Encoding};
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::crypto::aead::{self, Encrypted, IV_LEN, TAG_LEN};
use crate::crypto::{CryptoError, SymmetricKey, KEY_LEN};

type HmacSha256 = Hmac<Sha256>;

/// Token format version byte.
pub const VERSION: u8 = 0x80;

const HEADER_LEN: usize = 1 + 8;
const MAC_LEN: usize = 32;
const MIN_TOKEN_LEN: usize = HEADER_LEN + IV_LEN + TAG_LEN + MAC_LEN;

/// Tokens stamped further than this into the future are rejected.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(60);

const SIGNING_INFO: &[u8] = b"sealed-enclave/token/signing/v1";
const ENCRYPTION_INFO: &[u8] = b"sealed-enclave/token/encryption/v1";

/// Errors from token encoding and verification.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token is malformed: {0}")]
    Malformed(String),

    #[error("Unsupported token version: {0:#04x}")]
    UnsupportedVersion(u8),

    #[error("Token signature is invalid")]
    InvalidSignature,

    #[error("Token has expired")]
    Expired,

    #[error("Token is not yet valid")]
    NotYetValid,

    #[error("Token crypto failure: {0}")]
    Crypto(#[from] CryptoError),
}

/// Sub-keys derived from the master key.
pub struct TokenKeys {
    signing: Zeroizing<[u8; KEY_LEN]>,
    encryption: SymmetricKey,
}

impl TokenKeys {
    pub fn derive(master: &SymmetricKey) -> Result<Self, CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, master.expose());

        let mut signing = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(SIGNING_INFO, &mut signing[..])
            .map_err(|_| CryptoError::KeyDerivation)?;

        let mut encryption = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(ENCRYPTION_INFO, &mut encryption[..])
            .map_err(|_| CryptoError::KeyDerivation)?;

        Ok(Self {
            signing,
            encryption: SymmetricKey::new(*encryption),
        })
    }

    fn mac(&self) -> Result<HmacSha256, CryptoError> {
        <HmacSha256 as Mac>::new_from_slice(&self.signing[..])
            .map_err(|_| CryptoError::KeyDerivation)
    }
}

/// Parts of a token whose signature and timestamp have been checked.
pub struct VerifiedToken {
    pub issued_at: DateTime<Utc>,
    encrypted: Encrypted,
}

/// Encode `payload` into a signed, encrypted token stamped at `now`.
pub fn encode(keys: &TokenKeys, payload: &[u8], now: DateTime<Utc>) -> Result<String, TokenError> {
    let mut header = [0u8; HEADER_LEN];
    header[0] = VERSION;
    header[1..].copy_from_slice(&now.timestamp().to_be_bytes());

    let encrypted = aead::encrypt(payload, &keys.encryption, &header)?;

    let mut raw = Vec::with_capacity(HEADER_LEN + IV_LEN + encrypted.cipher_text.len() + MAC_LEN);
    raw.extend_from_slice(&header);
    raw.extend_from_slice(&encrypted.iv);
    raw.extend_from_slice(&encrypted.cipher_text);

    let mut mac = keys.mac()?;
    mac.update(&raw);
    raw.extend_from_slice(&mac.finalize().into_bytes());

    Ok(Base64Url::encode_string(&raw))
}

/// Check version, signature and age without decrypting.
pub fn verify(
    keys: &TokenKeys,
    token: &str,
    now: DateTime<Utc>,
    max_age: Option<Duration>,
) -> Result<VerifiedToken, TokenError> {
    let raw = Base64Url::decode_vec(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
    if raw.len() < MIN_TOKEN_LEN {
        return Err(TokenError::Malformed(format!("{} bytes is too short", raw.len())));
    }
    if raw[0] != VERSION {
        return Err(TokenError::UnsupportedVersion(raw[0]));
    }

    let (signed, tag) = raw.split_at(raw.len() - MAC_LEN);
    let mut mac = keys.mac()?;
    mac.update(signed);
    mac.verify_slice(tag)
        .map_err(|_| TokenError::InvalidSignature)?;

    let mut ts = [0u8; 8];
    ts.copy_from_slice(&signed[1..HEADER_LEN]);
    let issued = i64::from_be_bytes(ts);
    let issued_at = DateTime::<Utc>::from_timestamp(issued, 0)
        .ok_or_else(|| TokenError::Malformed("timestamp out of range".into()))?;

    check_age(issued_at, now, max_age)?;

    let encrypted = Encrypted::from_parts(
        &signed[HEADER_LEN + IV_LEN..],
        &signed[HEADER_LEN..HEADER_LEN + IV_LEN],
        &signed[..HEADER_LEN],
    )?;

    Ok(VerifiedToken {
        issued_at,
        encrypted,
    })
}

/// Payload of a fully verified token plus its issue time.
pub struct DecodedToken {
    pub issued_at: DateTime<Utc>,
    pub payload: Zeroizing<Vec<u8>>,
}

/// Reject a token stamped too far in the future or older than `max_age`.
///
/// Also applied to cached verdicts, whose cache TTL says nothing about the
/// token's own age.
pub fn check_age(
    issued_at: DateTime<Utc>,
    now: DateTime<Utc>,
    max_age: Option<Duration>,
) -> Result<(), TokenError> {
    let age = now.timestamp().saturating_sub(issued_at.timestamp());
    if age < 0 && age.unsigned_abs() > MAX_CLOCK_SKEW.as_secs() {
        return Err(TokenError::NotYetValid);
    }
    if let Some(max_age) = max_age {
        if age > 0 && age.unsigned_abs() > max_age.as_secs() {
            return Err(TokenError::Expired);
        }
    }
    Ok(())
}

/// Verify and decrypt, returning the original payload.
pub fn decode(
    keys: &TokenKeys,
    token: &str,
    now: DateTime<Utc>,
    max_age: Option<Duration>,
) -> Result<DecodedToken, TokenError> {
    let verified = verify(keys, token, now, max_age)?;
    let payload = aead::decrypt(&verified.encrypted, &keys.encryption)?;
    Ok(DecodedToken {
        issued_at: verified.issued_at,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn keys(byte: u8) -> TokenKeys {
        TokenKeys::derive(&SymmetricKey::new([byte; KEY_LEN])).unwrap()
    }

    #[test]
    fn encode_then_decode() {
        let k = keys(1);
        let now = Utc::now();
        let token = encode(&k, b"{\"sub\":\"alice\"}", now).unwrap();

        let decoded = decode(&k, &token, now, None).unwrap();
        assert_eq!(decoded.payload.as_slice(), b"{\"sub\":\"alice\"}");
        assert_eq!(decoded.issued_at.timestamp(), now.timestamp());

        let verified = verify(&k, &token, now, None).unwrap();
        assert_eq!(verified.issued_at.timestamp(), now.timestamp());
    }

    #[test]
    fn token_is_url_safe() {
        let token = encode(&keys(2), &[0xFF; 64], Utc::now()).unwrap();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '='));
    }

    #[test]
    fn other_master_key_rejected() {
        let now = Utc::now();
        let token = encode(&keys(3), b"payload", now).unwrap();
        assert!(matches!(
            verify(&keys(4), &token, now, None),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn tampered_token_rejected() {
        let k = keys(5);
        let now = Utc::now();
        let token = encode(&k, b"payload", now).unwrap();
        let mut raw = Base64Url::decode_vec(&token).unwrap();
        raw[HEADER_LEN + IV_LEN] ^= 0x01;
        let tampered = Base64Url::encode_string(&raw);
        assert!(matches!(
            verify(&k, &tampered, now, None),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn expired_token_rejected() {
        let k = keys(6);
        let issued = Utc::now() - TimeDelta::seconds(600);
        let token = encode(&k, b"payload", issued).unwrap();

        assert!(verify(&k, &token, Utc::now(), None).is_ok());
        assert!(matches!(
            verify(&k, &token, Utc::now(), Some(Duration::from_secs(300))),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn age_check_matches_verify() {
        let now = Utc::now();
        let max_age = Some(Duration::from_secs(300));

        assert!(check_age(now - TimeDelta::seconds(299), now, max_age).is_ok());
        assert!(matches!(
            check_age(now - TimeDelta::seconds(301), now, max_age),
            Err(TokenError::Expired)
        ));
        assert!(check_age(now - TimeDelta::seconds(301), now, None).is_ok());
        assert!(matches!(
            check_age(now + TimeDelta::seconds(61), now, None),
            Err(TokenError::NotYetValid)
        ));
    }

    #[test]
    fn future_token_rejected_beyond_skew() {
        let k = keys(7);
        let now = Utc::now();
        let near = encode(&k, b"payload", now + TimeDelta::seconds(30)).unwrap();
        let far = encode(&k, b"payload", now + TimeDelta::seconds(600)).unwrap();

        assert!(verify(&k, &near, now, None).is_ok());
        assert!(matches!(
            verify(&k, &far, now, None),
            Err(TokenError::NotYetValid)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        let k = keys(8);
        assert!(matches!(
            verify(&k, "not base64!!", Utc::now(), None),
            Err(TokenError::Malformed(_))
        ));
        assert!(matches!(
            verify(&k, &Base64Url::encode_string(&[VERSION; 10]), Utc::now(), None),
            Err(TokenError::Malformed(_))
        ));
    }

    #[test]
    fn unknown_version_rejected() {
        let k = keys(9);
        let token = encode(&k, b"payload", Utc::now()).unwrap();
        let mut raw = Base64Url::decode_vec(&token).unwrap();
        raw[0] = 0x81;
        assert!(matches!(
            verify(&k, &Base64Url::encode_string(&raw), Utc::now(), None),
            Err(TokenError::UnsupportedVersion(0x81))
        ));
    }
}
