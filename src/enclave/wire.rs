// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request/response shapes the enclave owns.
//!
//! Byte fields serialize as standard base64 strings in JSON. The transport
//! that carries them is external.

use serde::{Deserialize, Serialize};

use crate::crypto::aead::{self, Encrypted};
use crate::crypto::kem::{self, SessionKey, SymmetricAlgorithm};
use crate::crypto::{CryptoError, Share};

/// Associated data bound into every share ciphertext.
///
/// A ciphertext sealed for share transport can never be replayed as a
/// provisioning bundle (whose associated data is the attestation nonce).
pub const SHARE_ASSOCIATED_DATA: &[u8] = b"sealed-enclave/share/v1";

/// Serde adapter for `Vec<u8>` as base64.
pub(crate) mod base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Wire form of a Shamir share, encrypted to the enclave's session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedShare {
    #[serde(with = "base64_bytes")]
    pub encapsulation: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub cipher_text: Vec<u8>,
}

impl EncryptedShare {
    /// Shareholder side: encrypt `share` to an enclave's session key.
    pub fn encrypt(
        share: &Share,
        session_key: &SessionKey,
        algorithm: SymmetricAlgorithm,
    ) -> Result<Self, CryptoError> {
        let (key, encapsulation) = kem::encapsulate(session_key, algorithm)?;
        let encrypted = aead::encrypt(&share.to_bytes(), &key, SHARE_ASSOCIATED_DATA)?;
        Ok(Self {
            encapsulation,
            iv: encrypted.iv.to_vec(),
            cipher_text: encrypted.cipher_text,
        })
    }

    /// The ciphertext with the share associated data reattached.
    pub fn encrypted(&self) -> Result<Encrypted, CryptoError> {
        Encrypted::from_parts(&self.cipher_text, &self.iv, SHARE_ASSOCIATED_DATA)
    }
}

/// Master key encrypted to a receiving enclave's session key, with the
/// attestation nonce as associated data.
///
/// An empty bundle means the provisioning slot was already taken.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningBundle {
    #[serde(with = "base64_bytes")]
    pub encapsulation: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub cipher_text: Vec<u8>,
}

impl ProvisioningBundle {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.encapsulation.is_empty() && self.iv.is_empty() && self.cipher_text.is_empty()
    }
}

/// Outcome of `unseal`, `apply` and `seal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub success: bool,
    pub share_count: usize,
    pub message: String,
}

impl Status {
    pub fn ok(share_count: usize) -> Self {
        Self {
            success: true,
            share_count,
            message: String::new(),
        }
    }

    pub fn failure(share_count: usize, message: impl Into<String>) -> Self {
        Self {
            success: false,
            share_count,
            message: message.into(),
        }
    }
}

/// Outcome of `unwrap`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnwrapStatus {
    pub success: bool,
    pub share_count: usize,
    /// Digest of the enclave identifier, when an identity layer is attached.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "optional_base64_bytes"
    )]
    pub identifier_digest: Option<Vec<u8>>,
    pub message: String,
}

impl UnwrapStatus {
    pub fn failure(share_count: usize, message: impl Into<String>) -> Self {
        Self {
            success: false,
            share_count,
            identifier_digest: None,
            message: message.into(),
        }
    }
}

mod optional_base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => super::base64_bytes::serialize(bytes, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::base64_bytes")] Vec<u8>);

        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
    }
}
