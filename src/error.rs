// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave error taxonomy.
//!
//! Only hard failures are errors. A share that fails to decrypt, too few
//! shares on `unwrap`, or a lost provisioning race come back as status
//! values instead, since callers are expected to retry those.

use crate::config::ConfigError;
use crate::crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum EnclaveError {
    /// Operation invoked in the wrong lifecycle state.
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Provisioning request did not satisfy the attestation policy.
    #[error("Attestation rejected: {0}")]
    AttestationRejected(String),

    /// Classified cryptographic failure on a path where it is not a soft
    /// failure (e.g. installing a provisioned key).
    #[error("Cryptographic failure: {0}")]
    Crypto(#[from] CryptoError),

    /// The master key could not be produced at exactly 32 bytes.
    #[error("Master key derivation failed: {0}")]
    MasterKeyDerivation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EnclaveError {
    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            EnclaveError::FailedPrecondition(_) => "failed_precondition",
            EnclaveError::AttestationRejected(_) => "attestation_rejected",
            EnclaveError::Crypto(_) => "crypto_failure",
            EnclaveError::MasterKeyDerivation(_) => "master_key_derivation",
            EnclaveError::Config(_) => "invalid_config",
        }
    }

    /// Fatal errors indicate a misconfigured or corrupted enclave rather
    /// than a bad request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EnclaveError::MasterKeyDerivation(_) | EnclaveError::Config(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_fatality() {
        let precondition = EnclaveError::failed_precondition("sealed");
        assert_eq!(precondition.error_code(), "failed_precondition");
        assert!(!precondition.is_fatal());
        assert_eq!(precondition.to_string(), "Failed precondition: sealed");

        let derivation = EnclaveError::MasterKeyDerivation("64 bytes".into());
        assert_eq!(derivation.error_code(), "master_key_derivation");
        assert!(derivation.is_fatal());

        let crypto: EnclaveError = CryptoError::Aead.into();
        assert_eq!(crypto.error_code(), "crypto_failure");
        assert!(!crypto.is_fatal());
    }
}
