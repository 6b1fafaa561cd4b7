//! C5 — Envelope. Sealed, immutable execution contract. Invariant (i):
//! `seal_hash` covers every field except the revocation trio
//! (`revoked`, `revoked_at`, `revoked_by`) — those are the only fields the
//! revocation checker may mutate post-seal.

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::hasher::{self, Field};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSpec {
    pub action_type: String,
    pub amount: i64,
    pub currency: String,
    pub payee_ref: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RevocationWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub envelope_id: String,
    pub actor_circle_ref: String,
    pub intersection_ref: Option<String>,
    pub view_hash: String,
    pub action_hash: String,
    pub action_spec: ActionSpec,
    pub amount_cap: i64,
    pub frequency_cap: u32,
    pub duration_cap: Option<chrono::Duration>,
    pub expiry: DateTime<Utc>,
    /// Filled in by the approval flow after the envelope is sealed; not
    /// part of the seal hash input directly (see `seal_hash` docs) because
    /// approvals reference the envelope by `action_hash`, not the reverse.
    pub approvals: Vec<String>,
    pub approval_threshold: u32,
    pub revocation_window: RevocationWindow,
    pub revocation_waived: bool,
    pub trace_id: String,
    pub sealed_at: DateTime<Utc>,
    pub seal_hash: String,
    pub policy_snapshot_hash: String,
    pub view_snapshot_hash: String,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
}

pub struct EnvelopeParams {
    pub envelope_id: String,
    pub actor_circle_ref: String,
    pub intersection_ref: Option<String>,
    pub view_hash: String,
    pub action_spec: ActionSpec,
    pub amount_cap: i64,
    pub frequency_cap: u32,
    pub duration_cap: Option<chrono::Duration>,
    pub expiry: DateTime<Utc>,
    pub approval_threshold: u32,
    pub revocation_window_duration: Option<chrono::Duration>,
    pub revocation_waived: bool,
    pub trace_id: String,
    pub policy_snapshot_hash: String,
    pub view_snapshot_hash: String,
}

/// Deterministic action hash: binds type, amount, currency, payee,
/// description, view binding, circle, intersection, and time.
fn compute_action_hash(params: &EnvelopeParams, now: DateTime<Utc>) -> String {
    let fields = vec![
        Field("action_type", params.action_spec.action_type.clone()),
        Field("amount", hasher::render_i64(params.action_spec.amount)),
        Field("circle_ref", params.actor_circle_ref.clone()),
        Field("currency", params.action_spec.currency.clone()),
        Field("description", params.action_spec.description.clone()),
        Field("intersection_ref", params.intersection_ref.clone().unwrap_or_default()),
        Field("now", hasher::render_time(now)),
        Field("payee_ref", params.action_spec.payee_ref.clone()),
        Field("view_hash", params.view_hash.clone()),
    ];
    hasher::content_hash(&hasher::canonicalize(&fields))
}

impl Envelope {
    /// `seal-hash` covers every field except the revocation trio.
    fn compute_seal_hash(
        envelope_id: &str,
        actor_circle_ref: &str,
        intersection_ref: Option<&str>,
        view_hash: &str,
        action_hash: &str,
        action_spec: &ActionSpec,
        amount_cap: i64,
        frequency_cap: u32,
        expiry: DateTime<Utc>,
        approval_threshold: u32,
        revocation_window: &RevocationWindow,
        revocation_waived: bool,
        trace_id: &str,
        sealed_at: DateTime<Utc>,
        policy_snapshot_hash: &str,
        view_snapshot_hash: &str,
    ) -> String {
        let fields = vec![
            Field("action_hash", action_hash.to_string()),
            Field("action_type", action_spec.action_type.clone()),
            Field("actor_circle_ref", actor_circle_ref.to_string()),
            Field("amount", hasher::render_i64(action_spec.amount)),
            Field("amount_cap", hasher::render_i64(amount_cap)),
            Field("approval_threshold", hasher::render_i64(approval_threshold as i64)),
            Field("currency", action_spec.currency.clone()),
            Field("envelope_id", envelope_id.to_string()),
            Field("expiry", hasher::render_time(expiry)),
            Field("frequency_cap", hasher::render_i64(frequency_cap as i64)),
            Field("intersection_ref", intersection_ref.unwrap_or_default().to_string()),
            Field("payee_ref", action_spec.payee_ref.clone()),
            Field("policy_snapshot_hash", policy_snapshot_hash.to_string()),
            Field("revocation_waived", hasher::render_bool(revocation_waived)),
            Field("revocation_window_end", hasher::render_time(revocation_window.end)),
            Field("revocation_window_start", hasher::render_time(revocation_window.start)),
            Field("sealed_at", hasher::render_time(sealed_at)),
            Field("trace_id", trace_id.to_string()),
            Field("view_hash", view_hash.to_string()),
            Field("view_snapshot_hash", view_snapshot_hash.to_string()),
        ];
        hasher::content_hash(&hasher::canonicalize(&fields))
    }

    /// Build and seal a new envelope. Validates identifiers are non-empty,
    /// `amount <= amount_cap`, `frequency_cap > 0`, `threshold > 0`, and
    /// window duration `> 0` unless waived.
    pub fn build(params: EnvelopeParams, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        if params.envelope_id.is_empty()
            || params.actor_circle_ref.is_empty()
            || params.view_hash.is_empty()
            || params.policy_snapshot_hash.is_empty()
            || params.view_snapshot_hash.is_empty()
            || params.trace_id.is_empty()
        {
            return Err(ValidationError::MissingField("envelope identifier".into()));
        }
        if params.action_spec.amount <= 0 || params.action_spec.amount > params.amount_cap {
            return Err(ValidationError::InvalidAmount(format!(
                "amount {} exceeds cap {}",
                params.action_spec.amount, params.amount_cap
            )));
        }
        if params.frequency_cap == 0 {
            return Err(ValidationError::InvalidAmount("frequency_cap must be > 0".into()));
        }
        if params.approval_threshold == 0 {
            return Err(ValidationError::InvalidAmount("approval_threshold must be > 0".into()));
        }
        if !params.revocation_waived {
            let dur = params
                .revocation_window_duration
                .ok_or_else(|| ValidationError::MissingField("revocation_window_duration".into()))?;
            if dur <= chrono::Duration::zero() {
                return Err(ValidationError::InvalidAmount(
                    "revocation window duration must be > 0 unless waived".into(),
                ));
            }
        }

        let action_hash = compute_action_hash(&params, now);
        if action_hash.is_empty() {
            return Err(ValidationError::MissingField("action_hash".into()));
        }

        let revocation_window = RevocationWindow {
            start: now,
            end: now
                + params
                    .revocation_window_duration
                    .unwrap_or_else(chrono::Duration::zero),
        };

        let seal_hash = Self::compute_seal_hash(
            &params.envelope_id,
            &params.actor_circle_ref,
            params.intersection_ref.as_deref(),
            &params.view_hash,
            &action_hash,
            &params.action_spec,
            params.amount_cap,
            params.frequency_cap,
            params.expiry,
            params.approval_threshold,
            &revocation_window,
            params.revocation_waived,
            &params.trace_id,
            now,
            &params.policy_snapshot_hash,
            &params.view_snapshot_hash,
        );
        if seal_hash.is_empty() {
            return Err(ValidationError::MissingField("seal_hash".into()));
        }

        Ok(Self {
            envelope_id: params.envelope_id,
            actor_circle_ref: params.actor_circle_ref,
            intersection_ref: params.intersection_ref,
            view_hash: params.view_hash,
            action_hash,
            action_spec: params.action_spec,
            amount_cap: params.amount_cap,
            frequency_cap: params.frequency_cap,
            duration_cap: params.duration_cap,
            expiry: params.expiry,
            approvals: Vec::new(),
            approval_threshold: params.approval_threshold,
            revocation_window,
            revocation_waived: params.revocation_waived,
            trace_id: params.trace_id,
            sealed_at: now,
            seal_hash,
            policy_snapshot_hash: params.policy_snapshot_hash,
            view_snapshot_hash: params.view_snapshot_hash,
            revoked: false,
            revoked_at: None,
            revoked_by: None,
        })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    pub fn revocation_window_closed(&self, now: DateTime<Utc>) -> bool {
        now >= self.revocation_window.end
    }
}
