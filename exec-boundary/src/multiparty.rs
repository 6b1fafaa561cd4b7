//! C9 — Multi-Party Gate. Threshold, symmetry, distinct-approver, and scope
//! enforcement (spec.md §4.9).

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::approval::ApprovalArtifact;
use crate::errors::ApprovalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    SingleParty,
    MultiParty,
}

#[derive(Debug, Clone)]
pub struct MultiPartyPolicy {
    pub mode: GateMode,
    pub required_approvers: u32,
    pub threshold: u32,
    pub expiry_seconds: i64,
    pub scopes: Vec<String>,
}

/// Evaluates threshold, symmetry, action-hash binding, expiry, and scope
/// for a submitted set of `(artifact, bundle_content_hash)` pairs.
pub fn evaluate(
    policy: &MultiPartyPolicy,
    envelope_action_hash: &str,
    scope: &str,
    submissions: &[(ApprovalArtifact, String)],
    now: DateTime<Utc>,
) -> Result<(), ApprovalError> {
    if policy.mode == GateMode::SingleParty && submissions.len() != 1 {
        return Err(ApprovalError::InsufficientApprovals {
            got: submissions.len(),
            need: 1,
        });
    }

    if !policy.scopes.is_empty() && !policy.scopes.iter().any(|s| s == scope) {
        return Err(ApprovalError::ScopeMismatch(scope.to_string()));
    }

    let mut seen_circles = HashSet::new();
    for (artifact, _bundle_hash) in submissions {
        if !seen_circles.insert(artifact.approver_circle_ref.clone()) {
            return Err(ApprovalError::ApproverNotDistinct(
                artifact.approver_circle_ref.clone(),
            ));
        }
    }

    let distinct_count = seen_circles.len() as u32;
    if distinct_count < policy.threshold {
        return Err(ApprovalError::InsufficientApprovals {
            got: distinct_count as usize,
            need: policy.threshold as usize,
        });
    }

    let mut bundle_hashes: Vec<&str> = submissions.iter().map(|(_, h)| h.as_str()).collect();
    bundle_hashes.sort();
    bundle_hashes.dedup();
    if bundle_hashes.len() > 1 {
        let violators: Vec<String> = submissions
            .iter()
            .map(|(a, _)| a.approver_circle_ref.clone())
            .collect();
        return Err(ApprovalError::AsymmetricBundle { violators });
    }

    for (artifact, _bundle_hash) in submissions {
        if artifact.action_hash != envelope_action_hash {
            return Err(ApprovalError::ActionHashMismatch {
                expected: envelope_action_hash.to_string(),
                actual: artifact.action_hash.clone(),
            });
        }
        if now >= artifact.expires_at {
            return Err(ApprovalError::ApprovalExpired(artifact.artifact_id.clone()));
        }
    }

    Ok(())
}
