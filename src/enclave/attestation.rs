// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provisioning attestation: the nonce that makes each hand-off single-use
//! and the policy deciding which peers may receive the master key.

use std::fmt;
use std::sync::Arc;

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

use super::identity::{Identity, IdentityError};
use crate::crypto::aead::fill_random;
use crate::crypto::{CryptoError, SessionKey};
use crate::error::EnclaveError;

pub const NONCE_LEN: usize = 32;

/// Single-use correlation value for one provisioning exchange.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttestationNonce([u8; NONCE_LEN]);

impl AttestationNonce {
    pub fn random() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; NONCE_LEN];
        fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    pub fn from_bytes(bytes: [u8; NONCE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }
}

impl fmt::Debug for AttestationNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttestationNonce({})", Base64::encode_string(&self.0[..6]))
    }
}

impl From<AttestationNonce> for String {
    fn from(nonce: AttestationNonce) -> Self {
        Base64::encode_string(&nonce.0)
    }
}

impl TryFrom<String> for AttestationNonce {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let bytes = Base64::decode_vec(&value).map_err(|e| format!("invalid base64: {e}"))?;
        let arr: [u8; NONCE_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| format!("nonce must be {NONCE_LEN} bytes"))?;
        Ok(Self(arr))
    }
}

/// A receiving enclave's request for the master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningRequest {
    pub session_key: SessionKey,
    pub nonce: AttestationNonce,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "optional_signature"
    )]
    pub signature: Option<Vec<u8>>,
}

impl ProvisioningRequest {
    /// Unsigned request; only an `AlwaysAccept` provider will serve it.
    pub fn new(session_key: SessionKey, nonce: AttestationNonce) -> Self {
        Self {
            session_key,
            nonce,
            signature: None,
        }
    }

    pub fn signed(
        session_key: SessionKey,
        nonce: AttestationNonce,
        identity: &dyn Identity,
    ) -> Result<Self, IdentityError> {
        let mut request = Self::new(session_key, nonce);
        request.signature = Some(identity.sign(&request.attestation_payload())?);
        Ok(request)
    }

    /// Bytes covered by the signature: `session_key || nonce`.
    pub fn attestation_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.session_key.as_bytes().len() + NONCE_LEN);
        payload.extend_from_slice(self.session_key.as_bytes());
        payload.extend_from_slice(self.nonce.as_bytes());
        payload
    }
}

mod optional_signature {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::enclave::wire::base64_bytes;

    pub fn serialize<S: Serializer>(
        signature: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match signature {
            Some(bytes) => base64_bytes::serialize(bytes, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        #[derive(Deserialize)]
        struct Signature(#[serde(with = "base64_bytes")] Vec<u8>);

        Ok(Option::<Signature>::deserialize(deserializer)?.map(|s| s.0))
    }
}

/// Which provisioning requests the enclave serves.
pub enum AttestationPolicy {
    /// Serve every request without checking who asked.
    ///
    /// Any caller that can reach `provisioning` obtains the master key.
    /// Only for development and tests.
    AlwaysAccept,

    /// Require a signature over `session_key || nonce` carrying at least
    /// `threshold` valid contributions according to `verifier`.
    Verify {
        verifier: Arc<dyn Identity>,
        threshold: usize,
    },
}

impl AttestationPolicy {
    pub fn always_accept() -> Self {
        tracing::warn!("Attestation disabled: provisioning will serve any requester");
        Self::AlwaysAccept
    }

    pub fn verify(verifier: Arc<dyn Identity>, threshold: usize) -> Self {
        Self::Verify {
            verifier,
            threshold,
        }
    }

    pub fn check(&self, request: &ProvisioningRequest) -> Result<(), EnclaveError> {
        match self {
            AttestationPolicy::AlwaysAccept => Ok(()),
            AttestationPolicy::Verify {
                verifier,
                threshold,
            } => {
                let signature = request.signature.as_deref().ok_or_else(|| {
                    EnclaveError::AttestationRejected("request is not signed".into())
                })?;
                let accepted = verifier
                    .verify(*threshold, signature, &request.attestation_payload())
                    .map_err(|e| EnclaveError::AttestationRejected(e.to_string()))?;
                if accepted {
                    Ok(())
                } else {
                    Err(EnclaveError::AttestationRejected(format!(
                        "signature does not meet threshold {threshold}"
                    )))
                }
            }
        }
    }
}

impl fmt::Debug for AttestationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttestationPolicy::AlwaysAccept => f.write_str("AlwaysAccept"),
            AttestationPolicy::Verify { threshold, .. } => f
                .debug_struct("Verify")
                .field("threshold", threshold)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KemKeyPair;
    use crate::enclave::identity::testing::HmacIdentity;

    fn request() -> ProvisioningRequest {
        ProvisioningRequest::new(
            KemKeyPair::generate().session_key(),
            AttestationNonce::random().unwrap(),
        )
    }

    #[test]
    fn nonces_are_fresh() {
        assert_ne!(
            AttestationNonce::random().unwrap(),
            AttestationNonce::random().unwrap()
        );
    }

    #[test]
    fn always_accept_serves_unsigned() {
        assert!(AttestationPolicy::always_accept().check(&request()).is_ok());
    }

    #[test]
    fn verify_requires_valid_signature() {
        let identity = Arc::new(HmacIdentity::new(b"cluster"));
        let policy = AttestationPolicy::verify(identity.clone(), 1);

        let unsigned = request();
        let err = policy.check(&unsigned).unwrap_err();
        assert_eq!(err.error_code(), "attestation_rejected");

        let signed = ProvisioningRequest::signed(
            unsigned.session_key,
            unsigned.nonce,
            &*identity,
        )
        .unwrap();
        assert!(policy.check(&signed).is_ok());

        // Signature bound to a different nonce.
        let mut replayed = signed.clone();
        replayed.nonce = AttestationNonce::random().unwrap();
        assert!(policy.check(&replayed).is_err());

        let forged =
            ProvisioningRequest::signed(signed.session_key, signed.nonce, &HmacIdentity::new(b"x"))
                .unwrap();
        assert!(policy.check(&forged).is_err());
    }

    #[test]
    fn request_json_round_trip() {
        let identity = HmacIdentity::new(b"cluster");
        let signed = ProvisioningRequest::signed(
            KemKeyPair::generate().session_key(),
            AttestationNonce::random().unwrap(),
            &identity,
        )
        .unwrap();
        let json = serde_json::to_string(&signed).unwrap();
        assert!(json.contains("sessionKey"));
        let back: ProvisioningRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, signed);

        let unsigned = request();
        let json = serde_json::to_value(&unsigned).unwrap();
        assert!(json.get("signature").is_none());
    }
}
