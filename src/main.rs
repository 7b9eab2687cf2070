// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;

use sealed_enclave::enclave::AttestationPolicy;
use sealed_enclave::telemetry::{self, LogFormat};
use sealed_enclave::{Enclave, EnclaveConfig};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = telemetry::init_tracing(LogFormat::from_env()) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    let config = match EnclaveConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid enclave configuration");
            return ExitCode::FAILURE;
        }
    };

    // No identity layer is attached to the standalone binary, so peers
    // cannot be attested.
    let enclave = match Enclave::new(config, AttestationPolicy::always_accept()) {
        Ok(enclave) => enclave,
        Err(e) => {
            tracing::error!(error = %e, code = e.error_code(), "Failed to create enclave");
            return ExitCode::FAILURE;
        }
    };

    let config = enclave.config();
    tracing::info!(
        endpoint = %config.endpoint,
        share_count = config.share_count,
        threshold = config.threshold,
        key_derivation = ?config.key_derivation,
        state = ?enclave.state(),
        "Sealed enclave ready"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    enclave.seal();
    tracing::info!("Shutdown complete");
    ExitCode::SUCCESS
}
