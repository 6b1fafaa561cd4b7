//! C8 — Presentation Gate. Proves the exact bundle content hash was shown
//! to an approver before their approval is accepted. Invariant (iii).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use serde::{Deserialize, Serialize};

use crate::bundle::ApprovalBundle;
use crate::errors::PresentationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationRecord {
    pub record_id: String,
    pub approver_circle_ref: String,
    pub approver_id: String,
    pub bundle_hash: String,
    pub envelope_ref: String,
    pub action_hash: String,
    pub trace_id: String,
    pub presented_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

fn key(approver_circle_ref: &str, bundle_hash: &str, envelope_ref: &str) -> String {
    format!("{approver_circle_ref}::{bundle_hash}::{envelope_ref}")
}

#[derive(Default)]
pub struct PresentationGate {
    records: DashMap<String, PresentationRecord>,
}

impl PresentationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        approver_circle_ref: &str,
        approver_id: &str,
        bundle: &ApprovalBundle,
        envelope_ref: &str,
        trace_id: &str,
        expiry: chrono::Duration,
        now: DateTime<Utc>,
    ) -> PresentationRecord {
        let record = PresentationRecord {
            record_id: format!("pres-{}-{}", envelope_ref, approver_circle_ref),
            approver_circle_ref: approver_circle_ref.to_string(),
            approver_id: approver_id.to_string(),
            bundle_hash: bundle.content_hash.clone(),
            envelope_ref: envelope_ref.to_string(),
            action_hash: bundle.action_hash.clone(),
            trace_id: trace_id.to_string(),
            presented_at: now,
            expires_at: now + expiry,
        };
        self.records
            .insert(key(approver_circle_ref, &bundle.content_hash, envelope_ref), record.clone());
        record
    }

    pub fn verify(
        &self,
        approver_circle_ref: &str,
        bundle_hash: &str,
        envelope_ref: &str,
        action_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PresentationError> {
        let record = self
            .records
            .get(&key(approver_circle_ref, bundle_hash, envelope_ref))
            .ok_or_else(|| PresentationError::PresentationMissing(approver_circle_ref.to_string()))?;

        if now >= record.expires_at {
            return Err(PresentationError::PresentationExpired(approver_circle_ref.to_string()));
        }
        if record.bundle_hash != bundle_hash || record.action_hash != action_hash {
            return Err(PresentationError::PresentationHashMismatch {
                expected: bundle_hash.to_string(),
                actual: record.bundle_hash.clone(),
            });
        }
        Ok(())
    }

    /// Verifies every submitted `(approver_circle, bundle_hash)` pair;
    /// returns the circles that verified and the circles that were missing
    /// or otherwise failed.
    pub fn verify_all(
        &self,
        submissions: &[(String, String)],
        envelope_ref: &str,
        action_hash: &str,
        now: DateTime<Utc>,
    ) -> (HashSet<String>, HashSet<String>) {
        let mut verified = HashSet::new();
        let mut missing = HashSet::new();
        for (approver_circle_ref, bundle_hash) in submissions {
            match self.verify(approver_circle_ref, bundle_hash, envelope_ref, action_hash, now) {
                Ok(()) => {
                    verified.insert(approver_circle_ref.clone());
                }
                Err(_) => {
                    missing.insert(approver_circle_ref.clone());
                }
            }
        }
        (verified, missing)
    }
}
