//! C6 — Approval Bundle Builder + Neutrality Checker.

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use crate::errors::ApprovalError;
use crate::hasher::{self, Field};

/// Forbidden-substring categories checked against bundle descriptions and
/// approval-request prompts. Closed list per spec.md §4.6.
const FORBIDDEN_PATTERNS: &[(&str, &str)] = &[
    ("urgency", "act now"),
    ("urgency", "immediately"),
    ("urgency", "urgent"),
    ("urgency", "last chance"),
    ("fear", "or else"),
    ("fear", "account will be closed"),
    ("fear", "you will lose"),
    ("shame", "you should be embarrassed"),
    ("shame", "everyone else already"),
    ("authority", "as your bank"),
    ("authority", "this is mandatory"),
    ("optimisation", "maximise your savings"),
    ("optimisation", "optimise your return"),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeutralityAttestation {
    pub verified: bool,
    pub reason: String,
    pub checked_at: DateTime<Utc>,
}

/// Checks text against the closed forbidden-substring list (case-insensitive).
pub fn check_neutrality(text: &str, now: DateTime<Utc>) -> Result<NeutralityAttestation, ApprovalError> {
    let lowered = text.to_lowercase();
    for (_category, pattern) in FORBIDDEN_PATTERNS {
        if lowered.contains(pattern) {
            return Err(ApprovalError::NeutralityViolation {
                pattern: (*pattern).to_string(),
            });
        }
    }
    Ok(NeutralityAttestation {
        verified: true,
        reason: "no forbidden pattern matched".to_string(),
        checked_at: now,
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExecutionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalBundle {
    pub envelope_ref: String,
    pub action_hash: String,
    pub intersection_ref: Option<String>,
    pub payee_ref: String,
    pub amount: i64,
    pub currency: String,
    pub execution_window: ExecutionWindow,
    pub expiry: DateTime<Utc>,
    pub revocation_window_end: DateTime<Utc>,
    pub revocation_waived: bool,
    pub view_hash: Option<String>,
    pub neutrality_attestation: NeutralityAttestation,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub content_hash: String,
}

pub struct BundleParams {
    pub envelope_ref: String,
    pub action_hash: String,
    pub intersection_ref: Option<String>,
    pub payee_ref: String,
    pub amount: i64,
    pub currency: String,
    pub execution_window: ExecutionWindow,
    pub expiry: DateTime<Utc>,
    pub revocation_window_end: DateTime<Utc>,
    pub revocation_waived: bool,
    pub view_hash: Option<String>,
    pub description: String,
}

impl ApprovalBundle {
    pub fn build(params: BundleParams, now: DateTime<Utc>) -> Result<Self, ApprovalError> {
        let neutrality_attestation = check_neutrality(&params.description, now)?;

        let fields = vec![
            Field("action_hash", params.action_hash.clone()),
            Field("amount", hasher::render_i64(params.amount)),
            Field("created_at", hasher::render_time(now)),
            Field("currency", params.currency.clone()),
            Field("description", params.description.clone()),
            Field("envelope_ref", params.envelope_ref.clone()),
            Field("execution_window_end", hasher::render_time(params.execution_window.end)),
            Field("execution_window_start", hasher::render_time(params.execution_window.start)),
            Field("expiry", hasher::render_time(params.expiry)),
            Field(
                "intersection_ref",
                params.intersection_ref.clone().unwrap_or_default(),
            ),
            Field("payee_ref", params.payee_ref.clone()),
            Field("revocation_waived", hasher::render_bool(params.revocation_waived)),
            Field("revocation_window_end", hasher::render_time(params.revocation_window_end)),
            Field("view_hash", params.view_hash.clone().unwrap_or_default()),
        ];
        let content_hash = hasher::content_hash(&hasher::canonicalize(&fields));

        Ok(Self {
            envelope_ref: params.envelope_ref,
            action_hash: params.action_hash,
            intersection_ref: params.intersection_ref,
            payee_ref: params.payee_ref,
            amount: params.amount,
            currency: params.currency,
            execution_window: params.execution_window,
            expiry: params.expiry,
            revocation_window_end: params.revocation_window_end,
            revocation_waived: params.revocation_waived,
            view_hash: params.view_hash,
            neutrality_attestation,
            description: params.description,
            created_at: now,
            content_hash,
        })
    }
}
