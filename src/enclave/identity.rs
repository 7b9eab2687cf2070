// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Seam to the external identity layer.
//!
//! The enclave never manages identity material itself. Once unsealed it
//! reports the identifier digest, signs provisioning requests and verifies
//! peers through whatever implements [`Identity`].

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity unavailable: {0}")]
    Unavailable(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Verification failed: {0}")]
    Verification(String),
}

/// Persistent identifier plus signing capability of an enclave.
pub trait Identity: Send + Sync {
    /// Digest of the persistent identifier.
    fn identifier_digest(&self) -> Vec<u8>;

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, IdentityError>;

    /// Whether `signature` over `payload` carries at least `threshold`
    /// valid signer contributions.
    fn verify(
        &self,
        threshold: usize,
        signature: &[u8],
        payload: &[u8],
    ) -> Result<bool, IdentityError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use hmac::{Hmac, Mac};
    use sha2::{Digest, Sha256};

    use super::{Identity, IdentityError};

    type HmacSha256 = Hmac<Sha256>;

    /// Single-signer identity backed by a shared HMAC key.
    pub struct HmacIdentity {
        key: Vec<u8>,
    }

    impl HmacIdentity {
        pub fn new(key: &[u8]) -> Self {
            Self { key: key.to_vec() }
        }

        fn mac(&self) -> Result<HmacSha256, IdentityError> {
            HmacSha256::new_from_slice(&self.key)
                .map_err(|e| IdentityError::Unavailable(e.to_string()))
        }
    }

    impl Identity for HmacIdentity {
        fn identifier_digest(&self) -> Vec<u8> {
            Sha256::digest(&self.key).to_vec()
        }

        fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, IdentityError> {
            let mut mac = self.mac()?;
            mac.update(payload);
            Ok(mac.finalize().into_bytes().to_vec())
        }

        fn verify(
            &self,
            threshold: usize,
            signature: &[u8],
            payload: &[u8],
        ) -> Result<bool, IdentityError> {
            if threshold > 1 {
                return Ok(false);
            }
            let mut mac = self.mac()?;
            mac.update(payload);
            Ok(mac.verify_slice(signature).is_ok())
        }
    }

    #[test]
    fn hmac_identity_signs_and_verifies() {
        let identity = HmacIdentity::new(b"enclave-a");
        let signature = identity.sign(b"payload").unwrap();

        assert!(identity.verify(1, &signature, b"payload").unwrap());
        assert!(!identity.verify(1, &signature, b"other").unwrap());
        assert!(!identity.verify(2, &signature, b"payload").unwrap());
        assert!(!HmacIdentity::new(b"enclave-b")
            .verify(1, &signature, b"payload")
            .unwrap());
        assert_eq!(identity.identifier_digest().len(), 32);
    }
}
