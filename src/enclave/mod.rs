// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Sealing State Machine
//!
//! The enclave moves `Sealed -> Unsealing -> Unsealed -> Sealed`.
//!
//! - `unseal` opens a session with a fresh ephemeral KEM keypair
//! - shareholders encrypt their Shamir shares to that session key and `apply` them
//! - `unwrap` combines every collected share and derives the 32-byte master key
//! - an unsealed enclave can hand its master key to a peer (`provisioning`),
//!   which installs it with `provision` instead of collecting shares
//!
//! ## Locking
//!
//! Locks are always taken in the order `state -> shares -> nonce slots`.
//! `apply` and `provisioning` hold the state read lock for their whole
//! operation, so a concurrent `unseal` or `seal` cannot slip in between the
//! check and the mutation. Concurrent `apply` calls only contend on the
//! share map insert.

pub mod attestation;
pub mod identity;
pub mod wire;

use std::collections::BTreeMap;
use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use serde::Serialize;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::audit::{AuditEvent, AuditEventType, AuditLog};
use crate::config::EnclaveConfig;
use crate::crypto::{
    aead, kem, shamir, CryptoError, Encrypted, KemKeyPair, SessionKey, Share, SymmetricKey,
};
use crate::error::EnclaveError;
use crate::token::{HashedToken, Token, TokenError, TokenGenerator};

pub use attestation::{AttestationNonce, AttestationPolicy, ProvisioningRequest};
pub use identity::{Identity, IdentityError};
pub use wire::{EncryptedShare, ProvisioningBundle, Status, UnwrapStatus};

/// Externally observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnclaveStatus {
    Sealed,
    Unsealing,
    Unsealed,
}

/// Internal state. The master key exists only in `Unsealed`.
enum EnclaveState {
    Sealed,
    Unsealing {
        session: Arc<KemKeyPair>,
    },
    Unsealed {
        master_key: Arc<SymmetricKey>,
        session: Arc<KemKeyPair>,
    },
}

impl EnclaveState {
    fn status(&self) -> EnclaveStatus {
        match self {
            EnclaveState::Sealed => EnclaveStatus::Sealed,
            EnclaveState::Unsealing { .. } => EnclaveStatus::Unsealing,
            EnclaveState::Unsealed { .. } => EnclaveStatus::Unsealed,
        }
    }

    fn session(&self) -> Option<&Arc<KemKeyPair>> {
        match self {
            EnclaveState::Sealed => None,
            EnclaveState::Unsealing { session } | EnclaveState::Unsealed { session, .. } => {
                Some(session)
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single enclave instance. Share it across request handlers with `Arc`.
pub struct Enclave {
    config: EnclaveConfig,
    state: RwLock<EnclaveState>,
    /// Decrypted shares keyed by index, collected while unsealing.
    shares: Mutex<BTreeMap<u8, Zeroizing<Vec<u8>>>>,
    /// Provider side: nonce of the one provisioning request served this session.
    attestation_nonce: Mutex<Option<AttestationNonce>>,
    /// Receiver side: nonce of our outstanding provisioning request.
    requested_nonce: Mutex<Option<AttestationNonce>>,
    tokens: TokenGenerator,
    attestation: AttestationPolicy,
    identity: Option<Arc<dyn Identity>>,
    audit: AuditLog,
}

impl Enclave {
    /// Create a sealed enclave.
    pub fn new(config: EnclaveConfig, attestation: AttestationPolicy) -> Result<Self, EnclaveError> {
        config.validate()?;
        Ok(Self {
            tokens: TokenGenerator::new(&config.tokens),
            audit: AuditLog::new(config.audit_capacity),
            config,
            state: RwLock::new(EnclaveState::Sealed),
            shares: Mutex::new(BTreeMap::new()),
            attestation_nonce: Mutex::new(None),
            requested_nonce: Mutex::new(None),
            attestation,
            identity: None,
        })
    }

    /// Attach the identity layer used to sign provisioning requests and
    /// reported in `UnwrapStatus`.
    pub fn with_identity(mut self, identity: Arc<dyn Identity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn config(&self) -> &EnclaveConfig {
        &self.config
    }

    pub fn state(&self) -> EnclaveStatus {
        self.read_state().status()
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn tokens(&self) -> &TokenGenerator {
        &self.tokens
    }

    /// Number of shares collected so far in the current session.
    pub fn pending_shares(&self) -> usize {
        lock(&self.shares).len()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, EnclaveState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, EnclaveState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open an unsealing session with a fresh ephemeral keypair.
    ///
    /// Repeating `unseal` while unsealing discards the previous keypair and
    /// every share collected under it.
    pub fn unseal(&self) -> Result<Status, EnclaveError> {
        let mut state = self.write_state();
        if matches!(*state, EnclaveState::Unsealed { .. }) {
            return Err(EnclaveError::failed_precondition(
                "enclave is already unsealed; seal it first",
            ));
        }

        let session = Arc::new(KemKeyPair::generate());
        let discarded = {
            let mut shares = lock(&self.shares);
            let discarded = shares.len();
            shares.clear();
            discarded
        };
        *lock(&self.requested_nonce) = None;
        *state = EnclaveState::Unsealing { session };

        info!(discarded_shares = discarded, "Unsealing session started");
        self.audit.record(AuditEvent::new(AuditEventType::UnsealStarted).with_share_count(0));
        Ok(Status::ok(0))
    }

    /// Public half of the current session keypair.
    pub fn session_key(&self) -> Result<SessionKey, EnclaveError> {
        self.read_state()
            .session()
            .map(|session| session.session_key())
            .ok_or_else(|| EnclaveError::failed_precondition("no session key; call unseal first"))
    }

    /// Decrypt and store one share.
    ///
    /// A share that does not decrypt or parse, or whose index lies outside
    /// `1..=N`, is reported through a failed `Status` and not counted.
    pub fn apply(&self, encrypted: &EncryptedShare) -> Result<Status, EnclaveError> {
        let state = self.read_state();
        let EnclaveState::Unsealing { session } = &*state else {
            return Err(EnclaveError::failed_precondition(
                "apply requires an unsealing enclave",
            ));
        };

        let share = match self.open_share(session, encrypted) {
            Ok(share) => share,
            Err(e) => {
                let share_count = self.pending_shares();
                warn!(error = %e, share_count, "Share rejected");
                self.audit.record(
                    AuditEvent::new(AuditEventType::ShareRejected)
                        .with_share_count(share_count)
                        .failed(e.to_string()),
                );
                return Ok(Status::failure(share_count, format!("share rejected: {e}")));
            }
        };

        if share.index > self.config.share_count {
            let share_count = self.pending_shares();
            let message = format!(
                "share index {} outside 1..={}",
                share.index, self.config.share_count
            );
            warn!(index = share.index, share_count, "Share rejected: index out of range");
            self.audit.record(
                AuditEvent::new(AuditEventType::ShareRejected)
                    .with_share_count(share_count)
                    .failed(message.clone()),
            );
            return Ok(Status::failure(share_count, message));
        }

        let index = share.index;
        let (share_count, replaced) = {
            let mut shares = lock(&self.shares);
            let replaced = shares.insert(index, share.bytes).is_some();
            (shares.len(), replaced)
        };

        info!(index, share_count, replaced, "Share accepted");
        self.audit.record(
            AuditEvent::new(AuditEventType::ShareAccepted)
                .with_share_count(share_count)
                .with_details(serde_json::json!({ "index": index, "replaced": replaced })),
        );
        Ok(Status::ok(share_count))
    }

    fn open_share(
        &self,
        session: &KemKeyPair,
        encrypted: &EncryptedShare,
    ) -> Result<Share, CryptoError> {
        let algorithm = self.config.symmetric_algorithm;
        let key = kem::decapsulate(session, &encrypted.encapsulation, algorithm)?;
        let plaintext = aead::decrypt(&encrypted.encrypted()?, &key)?;
        Share::from_bytes(&plaintext)
    }

    /// Caller holds the state write lock, so no `apply` raced the snapshot.
    fn restore_shares(&self, snapshot: BTreeMap<u8, Zeroizing<Vec<u8>>>) {
        let mut shares = lock(&self.shares);
        shares.extend(snapshot);
        debug!(share_count = shares.len(), "Collected shares restored");
    }

    /// Combine the collected shares and install the derived master key.
    ///
    /// Too few shares, or shares that do not combine, yield a failed
    /// `UnwrapStatus` and leave the collected shares in place. A root secret
    /// that cannot be turned into a 32-byte key is fatal; the shares are put
    /// back in that case too.
    pub fn unwrap(&self) -> Result<UnwrapStatus, EnclaveError> {
        let mut state = self.write_state();
        let EnclaveState::Unsealing { session } = &*state else {
            return Err(EnclaveError::failed_precondition(
                "unwrap requires an unsealing enclave",
            ));
        };
        let session = Arc::clone(session);
        let threshold = self.config.threshold;

        let snapshot = {
            let mut shares = lock(&self.shares);
            if shares.len() < threshold as usize {
                let share_count = shares.len();
                debug!(share_count, threshold, "Unwrap attempted below threshold");
                return Ok(UnwrapStatus::failure(
                    share_count,
                    format!("need {threshold} shares, have {share_count}"),
                ));
            }
            std::mem::take(&mut *shares)
        };
        let share_count = snapshot.len();

        let root_secret = match shamir::combine(threshold, &snapshot) {
            Ok(secret) => secret,
            Err(e) => {
                self.restore_shares(snapshot);
                warn!(error = %e, share_count, "Shares failed to combine");
                self.audit.record(
                    AuditEvent::new(AuditEventType::UnwrapFailed)
                        .with_share_count(share_count)
                        .failed(e.to_string()),
                );
                return Ok(UnwrapStatus::failure(
                    share_count,
                    format!("shares did not combine: {e}"),
                ));
            }
        };

        let installed = self
            .config
            .key_derivation
            .derive(&root_secret)
            .map_err(|e| EnclaveError::MasterKeyDerivation(e.to_string()))
            .and_then(|master_key| {
                self.tokens.initialize(&master_key)?;
                Ok(master_key)
            });
        let master_key = match installed {
            Ok(master_key) => master_key,
            Err(e) => {
                self.restore_shares(snapshot);
                error!(error = %e, share_count, "Master key installation failed");
                self.audit.record(
                    AuditEvent::new(AuditEventType::UnwrapFailed)
                        .with_share_count(share_count)
                        .failed(e.to_string()),
                );
                return Err(e);
            }
        };
        *state = EnclaveState::Unsealed {
            master_key: Arc::new(master_key),
            session,
        };

        let identifier_digest = self.identity.as_ref().map(|id| id.identifier_digest());
        info!(share_count, threshold, "Enclave unsealed");
        self.audit
            .record(AuditEvent::new(AuditEventType::Unsealed).with_share_count(share_count));

        Ok(UnwrapStatus {
            success: true,
            share_count,
            identifier_digest,
            message: String::new(),
        })
    }

    /// Drop the master key, the session keypair, every collected share and
    /// both provisioning nonces.
    pub fn seal(&self) -> Status {
        let mut state = self.write_state();
        let previous = state.status();
        *state = EnclaveState::Sealed;
        lock(&self.shares).clear();
        *lock(&self.attestation_nonce) = None;
        *lock(&self.requested_nonce) = None;
        self.tokens.clear();
        drop(state);

        info!(previous = ?previous, "Enclave sealed");
        self.audit.record(AuditEvent::new(AuditEventType::Sealed).with_share_count(0));
        Status::ok(0)
    }

    // =========================================================================
    // Provisioning
    // =========================================================================

    /// Provider side: encrypt the master key to a peer's session key.
    ///
    /// Only one request is served per unsealed session. Once the nonce slot
    /// is claimed every later call gets an empty bundle.
    pub fn provisioning(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningBundle, EnclaveError> {
        let state = self.read_state();
        let EnclaveState::Unsealed { master_key, .. } = &*state else {
            return Err(EnclaveError::failed_precondition(
                "provisioning requires an unsealed enclave",
            ));
        };

        if let Err(e) = self.attestation.check(request) {
            warn!(error = %e, "Provisioning request rejected");
            self.audit.record(
                AuditEvent::new(AuditEventType::ProvisioningRejected).failed(e.to_string()),
            );
            return Err(e);
        }

        {
            let mut slot = lock(&self.attestation_nonce);
            if slot.is_some() {
                info!("Provisioning declined: nonce slot already claimed");
                self.audit.record(
                    AuditEvent::new(AuditEventType::ProvisioningDeclined)
                        .with_details(serde_json::json!({ "reason": "nonce slot occupied" })),
                );
                return Ok(ProvisioningBundle::empty());
            }
            *slot = Some(request.nonce);
        }

        match self.wrap_master_key(master_key, request) {
            Ok(bundle) => {
                info!(peer = ?request.session_key, "Master key provisioned to peer");
                self.audit.record(AuditEvent::new(AuditEventType::ProvisioningServed));
                Ok(bundle)
            }
            Err(e) => {
                // Release the slot so the requester can retry.
                let mut slot = lock(&self.attestation_nonce);
                if *slot == Some(request.nonce) {
                    *slot = None;
                }
                error!(error = %e, "Failed to wrap master key");
                self.audit.record(
                    AuditEvent::new(AuditEventType::ProvisioningServed).failed(e.to_string()),
                );
                Err(e.into())
            }
        }
    }

    fn wrap_master_key(
        &self,
        master_key: &SymmetricKey,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningBundle, CryptoError> {
        let (key, encapsulation) =
            kem::encapsulate(&request.session_key, self.config.symmetric_algorithm)?;
        let encrypted = aead::encrypt(master_key.expose(), &key, request.nonce.as_bytes())?;
        Ok(ProvisioningBundle {
            encapsulation,
            iv: encrypted.iv.to_vec(),
            cipher_text: encrypted.cipher_text,
        })
    }

    /// Receiver side: ask a peer for its master key.
    ///
    /// Replaces any earlier outstanding request. The request is signed when
    /// an identity layer is attached.
    pub fn request_provisioning(&self) -> Result<ProvisioningRequest, EnclaveError> {
        let state = self.read_state();
        let EnclaveState::Unsealing { session } = &*state else {
            return Err(EnclaveError::failed_precondition(
                "provisioning can only be requested while unsealing",
            ));
        };

        let nonce = AttestationNonce::random()?;
        let request = match &self.identity {
            Some(identity) => {
                ProvisioningRequest::signed(session.session_key(), nonce, identity.as_ref())
                    .map_err(|e| {
                        EnclaveError::failed_precondition(format!(
                            "identity layer could not sign request: {e}"
                        ))
                    })?
            }
            None => ProvisioningRequest::new(session.session_key(), nonce),
        };
        *lock(&self.requested_nonce) = Some(nonce);

        debug!(signed = request.signature.is_some(), "Provisioning request issued");
        self.audit.record(AuditEvent::new(AuditEventType::ProvisioningRequested));
        Ok(request)
    }

    /// Receiver side: install a master key received from a peer.
    ///
    /// Consumes the outstanding request nonce whether or not the bundle
    /// opens, so a bundle can never be installed twice.
    pub fn provision(&self, bundle: &ProvisioningBundle) -> Result<(), EnclaveError> {
        let mut state = self.write_state();
        let EnclaveState::Unsealing { session } = &*state else {
            return Err(EnclaveError::failed_precondition(
                "provision requires an unsealing enclave",
            ));
        };
        if bundle.is_empty() {
            return Err(EnclaveError::failed_precondition(
                "empty bundle: the provider already served another request",
            ));
        }
        let nonce = lock(&self.requested_nonce).take().ok_or_else(|| {
            EnclaveError::failed_precondition("no outstanding provisioning request")
        })?;
        let session = Arc::clone(session);

        let master_key = match self.open_bundle(&session, bundle, &nonce) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Provisioning bundle rejected");
                self.audit
                    .record(AuditEvent::new(AuditEventType::Provisioned).failed(e.to_string()));
                return Err(e);
            }
        };

        self.tokens.initialize(&master_key)?;
        lock(&self.shares).clear();
        *state = EnclaveState::Unsealed {
            master_key: Arc::new(master_key),
            session,
        };

        info!("Enclave unsealed by provisioning");
        self.audit.record(AuditEvent::new(AuditEventType::Provisioned));
        Ok(())
    }

    fn open_bundle(
        &self,
        session: &KemKeyPair,
        bundle: &ProvisioningBundle,
        nonce: &AttestationNonce,
    ) -> Result<SymmetricKey, EnclaveError> {
        let key = kem::decapsulate(session, &bundle.encapsulation, self.config.symmetric_algorithm)?;
        let encrypted = Encrypted::from_parts(&bundle.cipher_text, &bundle.iv, nonce.as_bytes())?;
        let plaintext = aead::decrypt(&encrypted, &key)?;
        SymmetricKey::from_slice(&plaintext)
            .map_err(|e| EnclaveError::MasterKeyDerivation(e.to_string()))
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// `Ok(None)` while sealed.
    pub fn generate_token(&self, payload: &[u8]) -> Result<Option<Token>, TokenError> {
        self.tokens.generate(payload)
    }

    pub fn valid_token(&self, token: &HashedToken) -> bool {
        self.tokens.valid(token)
    }

    pub fn validate_token<T, F>(&self, token: &HashedToken, transform: F) -> Option<Arc<T>>
    where
        T: std::any::Any + Send + Sync,
        F: FnOnce(&[u8]) -> Option<T>,
    {
        self.tokens.validate(token, transform)
    }
}
