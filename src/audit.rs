// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit trail for security-sensitive enclave operations.
//!
//! Every lifecycle transition, share verdict and provisioning outcome is
//! recorded in a bounded in-memory log and mirrored to `tracing` under the
//! `audit` target. Events never carry key or share material.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Types of auditable events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Lifecycle
    UnsealStarted,
    Unsealed,
    Sealed,

    // Shares
    ShareAccepted,
    ShareRejected,
    UnwrapFailed,

    // Provisioning
    ProvisioningServed,
    ProvisioningDeclined,
    ProvisioningRejected,
    ProvisioningRequested,
    Provisioned,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID.
    pub event_id: String,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Type of event.
    pub event_type: AuditEventType,
    /// Share count at the time of the event, where relevant.
    pub share_count: Option<usize>,
    /// Additional details as JSON.
    pub details: Option<serde_json::Value>,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Error message if operation failed.
    pub error: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            share_count: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_share_count(mut self, share_count: usize) -> Self {
        self.share_count = Some(share_count);
        self
    }

    /// Add details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Bounded, thread-safe audit log. Oldest events are dropped first.
pub struct AuditLog {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Record an event.
    pub fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            event_type = ?event.event_type,
            share_count = ?event.share_count,
            success = event.success,
            error = ?event.error,
            "Audit event"
        );

        if let Ok(mut events) = self.events.lock() {
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(event);
        }
    }

    /// The most recent `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => {
                let skip = events.len().saturating_sub(limit);
                events.iter().skip(skip).cloned().collect()
            }
            Err(_) => Vec::new(),
        }
    }

    /// Event types in order, for quick assertions and diagnostics.
    pub fn event_types(&self) -> Vec<AuditEventType> {
        match self.events.lock() {
            Ok(events) => events.iter().map(|e| e.event_type).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Serialize the retained events as JSONL (one JSON object per line).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for event in self.recent(self.capacity) {
            out.push_str(&serde_json::to_string(&event)?);
            out.push('\n');
        }
        Ok(out)
    }
}
