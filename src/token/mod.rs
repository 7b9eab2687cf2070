// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Bearer Tokens
//!
//! Token generation and validation keyed by the enclave master key.
//!
//! ## Caching
//!
//! Validation verdicts are cached in two tiers, keyed by the SHA-256 of
//! the serialized token:
//!
//! | Tier | Holds | Default size | Default TTL |
//! |------|-------|--------------|-------------|
//! | validated | decoded payload | 1000 | 10 days |
//! | invalid | rejection marker | 1000 | 30 seconds |
//!
//! The invalid tier is checked first. Its short TTL lets a token whose
//! hash was rejected once be re-evaluated soon after.
//!
//! While the enclave is sealed no key is installed: `generate` returns
//! `None` and nothing validates.

pub mod cache;
pub mod codec;

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::TokenCacheConfig;
use crate::crypto::{CryptoError, SymmetricKey};
use cache::ExpiringLru;
use codec::TokenKeys;

pub use codec::TokenError;

/// Opaque serialized bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(serialized: impl Into<String>) -> Self {
        Self(serialized.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A token paired with the digest of its serialized form.
///
/// Equality and hashing use the digest alone.
#[derive(Clone, Serialize, Deserialize)]
pub struct HashedToken {
    hash: [u8; 32],
    token: Token,
}

impl HashedToken {
    pub fn new(token: Token) -> Self {
        let hash = Sha256::digest(token.as_str().as_bytes()).into();
        Self { hash, token }
    }

    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn token(&self) -> &Token {
        &self.token
    }
}

impl From<Token> for HashedToken {
    fn from(token: Token) -> Self {
        Self::new(token)
    }
}

impl PartialEq for HashedToken {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for HashedToken {}

impl Hash for HashedToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for HashedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.hash[..4].iter().map(|b| format!("{b:02x}")).collect();
        write!(f, "HashedToken({prefix}..)")
    }
}

type CachedPayload = Arc<dyn Any + Send + Sync>;

/// Transformed payload plus the issue time it must be re-aged against.
#[derive(Clone)]
struct CachedVerdict {
    payload: CachedPayload,
    issued_at: DateTime<Utc>,
}

/// Generates and validates tokens under the installed master key.
///
/// Verdicts are written to either tier only while the key set they were
/// computed under is still installed. `clear` and `initialize` empty both
/// tiers while holding the key lock, so a validation that races a seal can
/// never leave a verdict behind.
pub struct TokenGenerator {
    keys: RwLock<Option<Arc<TokenKeys>>>,
    validated: ExpiringLru<HashedToken, CachedVerdict>,
    invalid: ExpiringLru<HashedToken, ()>,
    max_token_age: Option<Duration>,
}

impl TokenGenerator {
    /// Create a generator with no key installed.
    pub fn new(config: &TokenCacheConfig) -> Self {
        // A cached verdict must never outlive the token itself.
        let validated_ttl = match config.max_token_age {
            Some(age) => config.validated_ttl.min(age),
            None => config.validated_ttl,
        };
        Self {
            keys: RwLock::new(None),
            validated: ExpiringLru::new(config.validated_capacity, validated_ttl),
            invalid: ExpiringLru::new(config.invalid_capacity, config.invalid_ttl),
            max_token_age: config.max_token_age,
        }
    }

    /// Install the master key, replacing any previous one.
    pub fn initialize(&self, master_key: &SymmetricKey) -> Result<(), CryptoError> {
        let keys = Arc::new(TokenKeys::derive(master_key)?);
        let mut slot = self.write_keys();
        *slot = Some(keys);
        self.validated.clear();
        self.invalid.clear();
        Ok(())
    }

    /// Drop the key and every cached verdict.
    pub fn clear(&self) {
        let mut slot = self.write_keys();
        *slot = None;
        self.validated.clear();
        self.invalid.clear();
    }

    pub fn is_initialized(&self) -> bool {
        self.current_keys().is_some()
    }

    fn read_keys(&self) -> RwLockReadGuard<'_, Option<Arc<TokenKeys>>> {
        self.keys.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_keys(&self) -> RwLockWriteGuard<'_, Option<Arc<TokenKeys>>> {
        self.keys.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_keys(&self) -> Option<Arc<TokenKeys>> {
        self.read_keys().clone()
    }

    /// Run `record` only if `keys` is still the installed key set.
    fn record_if_current(&self, keys: &Arc<TokenKeys>, record: impl FnOnce()) -> bool {
        let slot = self.read_keys();
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, keys) => {
                record();
                true
            }
            _ => false,
        }
    }

    /// Validated-tier hit, re-checked against the token's own age.
    fn cached(&self, token: &HashedToken) -> Option<CachedPayload> {
        let verdict = self.validated.get(token)?;
        match codec::check_age(verdict.issued_at, Utc::now(), self.max_token_age) {
            Ok(()) => Some(verdict.payload),
            Err(e) => {
                tracing::debug!(token = ?token, error = %e, "Cached token aged out");
                self.validated.invalidate(token);
                self.invalid.put(token.clone(), ());
                None
            }
        }
    }

    /// Produce a token carrying `payload`.
    ///
    /// Returns `Ok(None)` while sealed; that is "unavailable", not an
    /// encoding error.
    pub fn generate(&self, payload: &[u8]) -> Result<Option<Token>, TokenError> {
        let Some(keys) = self.current_keys() else {
            tracing::debug!("Token generation requested while sealed");
            return Ok(None);
        };
        let serialized = codec::encode(&keys, payload, Utc::now())?;
        Ok(Some(Token(serialized)))
    }

    /// Check a token's signature and age.
    ///
    /// Consults the invalid tier, then the validated tier, then verifies.
    /// A failed verification is remembered in the invalid tier. Success is
    /// not cached here; `validate` owns the validated tier.
    pub fn valid(&self, token: &HashedToken) -> bool {
        let keys = {
            let slot = self.read_keys();
            let Some(keys) = slot.as_ref().map(Arc::clone) else {
                return false;
            };
            if self.invalid.contains(token) {
                tracing::trace!(token = ?token, "Rejected from invalid-token cache");
                return false;
            }
            if self.cached(token).is_some() {
                return true;
            }
            keys
        };

        match codec::verify(&keys, token.token().as_str(), Utc::now(), self.max_token_age) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(token = ?token, error = %e, "Token failed verification");
                self.record_if_current(&keys, || self.invalid.put(token.clone(), ()));
                false
            }
        }
    }

    /// Verify, decrypt and transform a token's payload.
    ///
    /// The transformed value is cached in the validated tier. `transform`
    /// returning `None` yields `None` without caching any verdict. If the
    /// key is cleared or replaced while validating, the result is `None`.
    pub fn validate<T, F>(&self, token: &HashedToken, transform: F) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce(&[u8]) -> Option<T>,
    {
        let keys = {
            let slot = self.read_keys();
            let keys = slot.as_ref().map(Arc::clone)?;
            if self.invalid.contains(token) {
                tracing::debug!(token = ?token, "Cache hit on known-bad token");
                return None;
            }
            if let Some(cached) = self.cached(token) {
                match cached.downcast::<T>() {
                    Ok(payload) => return Some(payload),
                    // Cached under a different payload type; decode again.
                    Err(_) => self.validated.invalidate(token),
                }
            }
            keys
        };

        let decoded =
            match codec::decode(&keys, token.token().as_str(), Utc::now(), self.max_token_age) {
                Ok(decoded) => decoded,
                Err(e) => {
                    tracing::debug!(token = ?token, error = %e, "Token failed validation");
                    self.record_if_current(&keys, || self.invalid.put(token.clone(), ()));
                    return None;
                }
            };

        let Some(payload) = transform(decoded.payload.as_slice()) else {
            tracing::debug!(token = ?token, "Token payload rejected by transform");
            return None;
        };
        let payload = Arc::new(payload);
        let verdict = CachedVerdict {
            payload: payload.clone(),
            issued_at: decoded.issued_at,
        };

        if self.record_if_current(&keys, || self.validated.put(token.clone(), verdict)) {
            Some(payload)
        } else {
            tracing::debug!(token = ?token, "Key changed during validation");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KEY_LEN;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn generator() -> TokenGenerator {
        let tokens = TokenGenerator::new(&TokenCacheConfig::default());
        tokens.initialize(&SymmetricKey::new([9u8; KEY_LEN])).unwrap();
        tokens
    }

    fn utf8(bytes: &[u8]) -> Option<String> {
        String::from_utf8(bytes.to_vec()).ok()
    }

    #[test]
    fn hashed_token_identity_is_the_hash() {
        let a = HashedToken::new(Token::new("abc"));
        let b = HashedToken::new(Token::new("abc"));
        let c = HashedToken::new(Token::new("abd"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.hash().as_slice(), Sha256::digest(b"abc").as_slice());
    }

    #[test]
    fn sealed_generator_is_unavailable() {
        let tokens = TokenGenerator::new(&TokenCacheConfig::default());
        assert!(!tokens.is_initialized());
        assert!(tokens.generate(b"payload").unwrap().is_none());

        let token = HashedToken::new(Token::new("anything"));
        assert!(!tokens.valid(&token));
        assert!(tokens.validate(&token, utf8).is_none());
    }

    #[test]
    fn generated_token_validates() {
        let tokens = generator();
        let token = HashedToken::new(tokens.generate(b"alice").unwrap().unwrap());

        assert!(tokens.valid(&token));
        let payload = tokens.validate(&token, utf8).unwrap();
        assert_eq!(payload.as_str(), "alice");
    }

    #[test]
    fn validate_caches_transformed_payload() {
        let tokens = generator();
        let token = HashedToken::new(tokens.generate(b"bob").unwrap().unwrap());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let payload = tokens
                .validate(&token, |bytes| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    utf8(bytes)
                })
                .unwrap();
            assert_eq!(payload.as_str(), "bob");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forged_token_lands_in_invalid_tier() {
        let tokens = generator();
        let forged = HashedToken::new(Token::new("gAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"));

        assert!(!tokens.valid(&forged));
        assert!(tokens.invalid.contains(&forged));
        assert!(tokens.validate(&forged, utf8).is_none());
    }

    #[test]
    fn token_from_other_key_is_rejected() {
        let issuer = TokenGenerator::new(&TokenCacheConfig::default());
        issuer.initialize(&SymmetricKey::new([1u8; KEY_LEN])).unwrap();
        let token = HashedToken::new(issuer.generate(b"x").unwrap().unwrap());

        let tokens = generator();
        assert!(tokens.validate(&token, utf8).is_none());
        assert!(!tokens.valid(&token));
    }

    #[test]
    fn failed_transform_is_not_cached_as_invalid() {
        let tokens = generator();
        let token = HashedToken::new(tokens.generate(&[0xFF, 0xFE]).unwrap().unwrap());

        assert!(tokens.validate(&token, utf8).is_none());
        assert!(!tokens.invalid.contains(&token));
        assert!(tokens.valid(&token));
    }

    #[test]
    fn clear_forgets_key_and_verdicts() {
        let tokens = generator();
        let token = HashedToken::new(tokens.generate(b"carol").unwrap().unwrap());
        assert!(tokens.validate(&token, utf8).is_some());

        tokens.clear();
        assert!(!tokens.is_initialized());
        assert!(tokens.validate(&token, utf8).is_none());
        assert!(!tokens.valid(&token));
        assert!(tokens.generate(b"carol").unwrap().is_none());
    }

    #[test]
    fn seal_during_validation_leaves_no_verdict() {
        let tokens = generator();
        let token = HashedToken::new(tokens.generate(b"dave").unwrap().unwrap());

        let payload = tokens.validate(&token, |bytes| {
            tokens.clear();
            utf8(bytes)
        });
        assert!(payload.is_none());
        assert!(!tokens.is_initialized());
        assert!(tokens.validated.is_empty());
        assert!(!tokens.valid(&token));
        assert!(tokens.validate(&token, utf8).is_none());
    }

    #[test]
    fn key_rotation_during_validation_is_discarded() {
        let tokens = generator();
        let token = HashedToken::new(tokens.generate(b"erin").unwrap().unwrap());

        let payload = tokens.validate(&token, |bytes| {
            tokens
                .initialize(&SymmetricKey::new([3u8; KEY_LEN]))
                .unwrap();
            utf8(bytes)
        });
        assert!(payload.is_none());
        assert!(tokens.validated.is_empty());
        assert!(!tokens.valid(&token));
    }

    #[test]
    fn cached_verdict_expires_with_token_age() {
        let config = TokenCacheConfig {
            max_token_age: Some(Duration::from_secs(3)),
            ..TokenCacheConfig::default()
        };
        let tokens = TokenGenerator::new(&config);
        tokens.initialize(&SymmetricKey::new([4u8; KEY_LEN])).unwrap();

        // Issued two seconds ago, so it is cached close to its max age.
        let keys = tokens.current_keys().unwrap();
        let issued = Utc::now() - chrono::TimeDelta::seconds(2);
        let token = HashedToken::new(Token::new(codec::encode(&keys, b"frank", issued).unwrap()));
        assert_eq!(tokens.validate(&token, utf8).unwrap().as_str(), "frank");
        assert!(tokens.validated.contains(&token));

        // Past the token's max age but well inside the cache TTL.
        std::thread::sleep(Duration::from_millis(2100));
        assert!(!tokens.valid(&token));
        assert!(tokens.validate(&token, utf8).is_none());
        assert!(!tokens.validated.contains(&token));
        assert!(tokens.invalid.contains(&token));
    }

    #[test]
    fn poisoned_key_lock_still_clears() {
        let tokens = generator();
        let poisoner = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _slot = tokens.keys.write().unwrap();
            panic!("poison the key lock");
        }));
        assert!(poisoner.is_err());

        assert!(tokens.is_initialized());
        tokens.clear();
        assert!(!tokens.is_initialized());
        tokens.initialize(&SymmetricKey::new([5u8; KEY_LEN])).unwrap();
        assert!(tokens.generate(b"grace").unwrap().is_some());
    }

    #[test]
    fn invalid_tier_expires() {
        let config = TokenCacheConfig {
            invalid_ttl: Duration::from_millis(1),
            ..TokenCacheConfig::default()
        };
        let tokens = TokenGenerator::new(&config);
        tokens.initialize(&SymmetricKey::new([2u8; KEY_LEN])).unwrap();

        let forged = HashedToken::new(Token::new("forged"));
        assert!(!tokens.valid(&forged));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!tokens.invalid.contains(&forged));
    }

    #[test]
    fn validated_ttl_capped_by_max_token_age() {
        let config = TokenCacheConfig {
            max_token_age: Some(Duration::from_secs(60)),
            ..TokenCacheConfig::default()
        };
        let tokens = TokenGenerator::new(&config);
        assert_eq!(tokens.validated.ttl(), Duration::from_secs(60));
    }
}
