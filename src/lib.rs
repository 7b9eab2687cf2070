// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Sealed Enclave - Threshold-Unsealed Secrets Service
//!
//! The enclave boots sealed. Shareholders encrypt Shamir shares of a root
//! secret to its ephemeral session key; once enough shares arrive the root
//! secret is reconstructed and a 32-byte master key derived from it. The
//! master key then signs and encrypts bearer tokens, and can be handed to a
//! peer enclave through a single-use attested provisioning exchange.
//!
//! ## Modules
//!
//! - `crypto` - AEAD, key encapsulation, Shamir sharing, master-key derivation
//! - `enclave` - Sealing state machine, wire shapes, provisioning
//! - `token` - Bearer token codec and verdict caches
//! - `audit` - In-memory audit trail
//! - `config` - Environment-driven configuration
//! - `telemetry` - Structured logging

pub mod audit;
pub mod config;
pub mod crypto;
pub mod enclave;
pub mod error;
pub mod telemetry;
pub mod token;

pub use config::EnclaveConfig;
pub use enclave::{Enclave, EnclaveStatus};
pub use error::EnclaveError;
