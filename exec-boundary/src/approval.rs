//! C7 — Approval Manager & Verifier. Per-action, hash-bound, expiring,
//! HMAC-signed approvals. Single-use is enforced by the gate that consumes
//! the artifact (the multi-party gate, C9), not by `verify` itself.

use chrono::{DateTime, Utc};
use crypto_primitives::HmacKey;
use dashmap::DashMap;

use serde::{Deserialize, Serialize};

use crate::bundle::ApprovalBundle;
use crate::errors::ApprovalError;
use crate::hasher;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub envelope_ref: String,
    pub action_hash: String,
    pub target_circle_ref: String,
    pub prompt: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalArtifact {
    pub artifact_id: String,
    pub approver_circle_ref: String,
    pub approver_id: String,
    pub action_hash: String,
    pub approved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
    pub bundle_content_hash: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

/// Signs and issues approvals, and the in-memory store of issued artifacts
/// (keyed by `artifact_id`) that lets the multi-party gate mark them used.
pub struct ApprovalManager {
    mac_key: HmacKey,
    artifacts: DashMap<String, ApprovalArtifact>,
}

fn signing_payload(action_hash: &str, approver_circle_ref: &str, approver_id: &str, approved_at: DateTime<Utc>) -> String {
    hasher::canonicalize(&[
        hasher::Field("action_hash", action_hash.to_string()),
        hasher::Field("approved_at", hasher::render_time(approved_at)),
        hasher::Field("approver_circle_ref", approver_circle_ref.to_string()),
        hasher::Field("approver_id", approver_id.to_string()),
    ])
}

impl ApprovalManager {
    pub fn new(mac_key: HmacKey) -> Self {
        Self {
            mac_key,
            artifacts: DashMap::new(),
        }
    }

    /// Emits a neutral prompt whose text also passes neutrality (spec.md §4.7).
    pub fn create_request(
        &self,
        envelope_ref: &str,
        bundle: &ApprovalBundle,
        target_circle_ref: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ApprovalRequest, ApprovalError> {
        let prompt = format!(
            "Review and approve payment of {} {} to {}.",
            bundle.amount, bundle.currency, bundle.payee_ref
        );
        crate::bundle::check_neutrality(&prompt, now)?;

        Ok(ApprovalRequest {
            request_id: format!("req-{}-{}", envelope_ref, target_circle_ref),
            envelope_ref: envelope_ref.to_string(),
            action_hash: bundle.action_hash.clone(),
            target_circle_ref: target_circle_ref.to_string(),
            prompt,
            expires_at,
        })
    }

    /// Signs `(action_hash, approver_circle, approver, approved_at)` and
    /// returns a fresh artifact, registered in the store.
    pub fn submit(
        &self,
        artifact_id: &str,
        action_hash: &str,
        bundle_content_hash: &str,
        approver_circle_ref: &str,
        approver_id: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> ApprovalArtifact {
        let payload = signing_payload(action_hash, approver_circle_ref, approver_id, now);
        let signature = self.mac_key.sign(payload.as_bytes());

        let artifact = ApprovalArtifact {
            artifact_id: artifact_id.to_string(),
            approver_circle_ref: approver_circle_ref.to_string(),
            approver_id: approver_id.to_string(),
            action_hash: action_hash.to_string(),
            approved_at: now,
            expires_at,
            signature,
            bundle_content_hash: bundle_content_hash.to_string(),
            used: false,
            used_at: None,
        };
        self.artifacts.insert(artifact_id.to_string(), artifact.clone());
        artifact
    }

    /// Verifies signature, expiry, and action-hash binding. Does not mark
    /// the artifact used.
    pub fn verify(
        &self,
        artifact: &ApprovalArtifact,
        expected_action_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        if artifact.action_hash != expected_action_hash {
            return Err(ApprovalError::ActionHashMismatch {
                expected: expected_action_hash.to_string(),
                actual: artifact.action_hash.clone(),
            });
        }
        if now >= artifact.expires_at {
            return Err(ApprovalError::ApprovalExpired(artifact.artifact_id.clone()));
        }
        let payload = signing_payload(
            &artifact.action_hash,
            &artifact.approver_circle_ref,
            &artifact.approver_id,
            artifact.approved_at,
        );
        if !self.mac_key.verify(payload.as_bytes(), &artifact.signature) {
            return Err(ApprovalError::SignatureInvalid);
        }
        Ok(())
    }

    /// Consumes an artifact: fails if already used, else marks it used and
    /// returns success. This is the single-use property described in
    /// spec.md §4.7, invoked by the multi-party gate (C9).
    pub fn consume(&self, artifact_id: &str, now: DateTime<Utc>) -> Result<(), ApprovalError> {
        let mut entry = self
            .artifacts
            .get_mut(artifact_id)
            .ok_or_else(|| ApprovalError::ApprovalMissing(artifact_id.to_string()))?;
        if entry.used {
            return Err(ApprovalError::ApprovalReuse(artifact_id.to_string()));
        }
        entry.used = true;
        entry.used_at = Some(now);
        Ok(())
    }
}
