// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Everything the enclave needs is supplied at construction. The binary
//! loads it from the environment; library callers build it directly.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ENCLAVE_SHARE_COUNT` | Number of shares the root secret was split into (N) | `3` |
//! | `ENCLAVE_THRESHOLD` | Shares required to unseal (T) | `2` |
//! | `ENCLAVE_KEY_DERIVATION` | `sha256`, `sha512-256` or `hkdf-sha256` | `sha256` |
//! | `ENCLAVE_SYMMETRIC_ALGORITHM` | Encapsulated key algorithm | `aes-256-gcm` |
//! | `ENCLAVE_ENDPOINT` | `tcp://host:port`, `unix:///path` or `vsock://cid:port` | `tcp://127.0.0.1:50051` |
//! | `ENCLAVE_AUDIT_CAPACITY` | Audit events retained in memory | `1024` |
//! | `TOKEN_CACHE_VALID_CAPACITY` | Validated-token cache size | `1000` |
//! | `TOKEN_CACHE_VALID_TTL_SECS` | Validated-token cache TTL | `864000` (10 days) |
//! | `TOKEN_CACHE_INVALID_CAPACITY` | Invalid-token cache size | `1000` |
//! | `TOKEN_CACHE_INVALID_TTL_SECS` | Invalid-token cache TTL | `30` |
//! | `TOKEN_MAX_AGE_SECS` | Reject tokens older than this | unset |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `json` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::crypto::shamir::MAX_SHARES;
use crate::crypto::{MasterKeyDerivation, SymmetricAlgorithm};

pub const SHARE_COUNT_ENV: &str = "ENCLAVE_SHARE_COUNT";
pub const THRESHOLD_ENV: &str = "ENCLAVE_THRESHOLD";
pub const KEY_DERIVATION_ENV: &str = "ENCLAVE_KEY_DERIVATION";
pub const SYMMETRIC_ALGORITHM_ENV: &str = "ENCLAVE_SYMMETRIC_ALGORITHM";
pub const ENDPOINT_ENV: &str = "ENCLAVE_ENDPOINT";
pub const AUDIT_CAPACITY_ENV: &str = "ENCLAVE_AUDIT_CAPACITY";
pub const VALID_CAPACITY_ENV: &str = "TOKEN_CACHE_VALID_CAPACITY";
pub const VALID_TTL_ENV: &str = "TOKEN_CACHE_VALID_TTL_SECS";
pub const INVALID_CAPACITY_ENV: &str = "TOKEN_CACHE_INVALID_CAPACITY";
pub const INVALID_TTL_ENV: &str = "TOKEN_CACHE_INVALID_TTL_SECS";
pub const MAX_TOKEN_AGE_ENV: &str = "TOKEN_MAX_AGE_SECS";

/// Default endpoint peers and shareholders reach the enclave on.
pub const DEFAULT_ENDPOINT: &str = "tcp://127.0.0.1:50051";

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Invalid threshold: need 2 <= T <= N <= {max} (T={threshold}, N={share_count})")]
    InvalidThreshold {
        threshold: u8,
        share_count: u8,
        max: u8,
    },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Where the enclave is reachable, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(SocketAddr),
    Unix(PathBuf),
    Vsock { cid: u32, port: u32 },
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidEndpoint(format!("{s}: {reason}"));

        if let Some(addr) = s.strip_prefix("tcp://") {
            let addr = addr.parse().map_err(|_| invalid("expected host:port"))?;
            Ok(Endpoint::Tcp(addr))
        } else if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(invalid("empty socket path"));
            }
            Ok(Endpoint::Unix(PathBuf::from(path)))
        } else if let Some(rest) = s.strip_prefix("vsock://") {
            let (cid, port) = rest.split_once(':').ok_or_else(|| invalid("expected cid:port"))?;
            Ok(Endpoint::Vsock {
                cid: cid.parse().map_err(|_| invalid("cid must be a u32"))?,
                port: port.parse().map_err(|_| invalid("port must be a u32"))?,
            })
        } else {
            Err(invalid("unknown scheme"))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Vsock { cid, port } => write!(f, "vsock://{cid}:{port}"),
        }
    }
}

/// Bounds and TTLs for the two token-verdict caches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCacheConfig {
    pub validated_capacity: usize,
    pub validated_ttl: Duration,
    pub invalid_capacity: usize,
    pub invalid_ttl: Duration,
    /// Tokens older than this are rejected; `None` disables the check.
    pub max_token_age: Option<Duration>,
}

impl Default for TokenCacheConfig {
    fn default() -> Self {
        Self {
            validated_capacity: 1000,
            validated_ttl: Duration::from_secs(10 * 24 * 60 * 60),
            invalid_capacity: 1000,
            invalid_ttl: Duration::from_secs(30),
            max_token_age: None,
        }
    }
}

/// Full enclave configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclaveConfig {
    pub share_count: u8,
    pub threshold: u8,
    pub key_derivation: MasterKeyDerivation,
    pub symmetric_algorithm: SymmetricAlgorithm,
    pub tokens: TokenCacheConfig,
    pub endpoint: Endpoint,
    pub audit_capacity: usize,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self {
            share_count: 3,
            threshold: 2,
            key_derivation: MasterKeyDerivation::default(),
            symmetric_algorithm: SymmetricAlgorithm::default(),
            tokens: TokenCacheConfig::default(),
            endpoint: Endpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], 50051))),
            audit_capacity: 1024,
        }
    }
}

impl EnclaveConfig {
    /// Config for an N-of-T scheme with every other field defaulted.
    pub fn with_threshold(share_count: u8, threshold: u8) -> Self {
        Self {
            share_count,
            threshold,
            ..Self::default()
        }
    }

    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(Duration::from_secs(parse_or(&lookup, name, default.as_secs())?))
        };

        let max_token_age = match lookup(MAX_TOKEN_AGE_ENV) {
            Some(raw) => Some(Duration::from_secs(parse_value(MAX_TOKEN_AGE_ENV, &raw)?)),
            None => None,
        };

        let config = Self {
            share_count: parse_or(&lookup, SHARE_COUNT_ENV, defaults.share_count)?,
            threshold: parse_or(&lookup, THRESHOLD_ENV, defaults.threshold)?,
            key_derivation: parse_or(&lookup, KEY_DERIVATION_ENV, defaults.key_derivation)?,
            symmetric_algorithm: parse_or(
                &lookup,
                SYMMETRIC_ALGORITHM_ENV,
                defaults.symmetric_algorithm,
            )?,
            tokens: TokenCacheConfig {
                validated_capacity: parse_or(
                    &lookup,
                    VALID_CAPACITY_ENV,
                    defaults.tokens.validated_capacity,
                )?,
                validated_ttl: secs(VALID_TTL_ENV, defaults.tokens.validated_ttl)?,
                invalid_capacity: parse_or(
                    &lookup,
                    INVALID_CAPACITY_ENV,
                    defaults.tokens.invalid_capacity,
                )?,
                invalid_ttl: secs(INVALID_TTL_ENV, defaults.tokens.invalid_ttl)?,
                max_token_age,
            },
            endpoint: match lookup(ENDPOINT_ENV) {
                Some(raw) => raw.parse()?,
                None => defaults.endpoint,
            },
            audit_capacity: parse_or(&lookup, AUDIT_CAPACITY_ENV, defaults.audit_capacity)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold < 2 || self.threshold > self.share_count || self.share_count > MAX_SHARES
        {
            return Err(ConfigError::InvalidThreshold {
                threshold: self.threshold,
                share_count: self.share_count,
                max: MAX_SHARES,
            });
        }
        if self.tokens.validated_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: VALID_CAPACITY_ENV,
                reason: "must be greater than zero".into(),
            });
        }
        if self.tokens.invalid_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: INVALID_CAPACITY_ENV,
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name,
        reason: e.to_string(),
    })
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}
