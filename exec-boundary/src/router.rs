//! C14 — Router & Boundary Adapter. Extracts an execution intent from an
//! upstream request, derives a deterministic `intent_id`, hard-blocks on
//! missing policy/view hashes, and hands the sealed envelope to the
//! executor (spec.md §4.14).

use serde::{Deserialize, Serialize};

use crate::errors::{BoundaryError, ValidationError};
use crate::executor::{self, ExecutionContext, ExecutionOutcome};
use crate::hasher::{self, Field};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionIntent {
    pub draft_id: String,
    pub actor_circle_ref: String,
    pub intersection_ref: Option<String>,
    pub action_type: String,
    pub payee_ref: String,
    pub amount: i64,
    pub currency: String,
    pub description: String,
    pub policy_snapshot_hash: String,
    pub view_snapshot_hash: String,
}

/// Deterministic `intent_id` derived from the draft, circle, action and its
/// typed content, and the bound policy/view hashes (spec.md §4.14) — no
/// wall-clock input, so the same approved draft always yields the same
/// `intent_id` and, by construction, the same `envelope_id` no matter when
/// the router is invoked.
pub fn derive_intent_id(intent: &ExecutionIntent) -> String {
    hasher::content_hash(&hasher::canonicalize(&[
        Field("draft_id", intent.draft_id.clone()),
        Field("actor_circle_ref", intent.actor_circle_ref.clone()),
        Field("action_type", intent.action_type.clone()),
        Field("payee_ref", intent.payee_ref.clone()),
        Field("amount", hasher::render_i64(intent.amount)),
        Field("currency", intent.currency.clone()),
        Field("description", intent.description.clone()),
        Field("policy_snapshot_hash", intent.policy_snapshot_hash.clone()),
        Field("view_snapshot_hash", intent.view_snapshot_hash.clone()),
    ]))
}

/// Validates that an intent carries non-empty policy/view hash bindings
/// before anything downstream is built from it. An intent missing either
/// hash is rejected outright — the router never substitutes a default.
pub fn validate_intent(intent: &ExecutionIntent) -> Result<(), ValidationError> {
    if intent.policy_snapshot_hash.is_empty() {
        return Err(ValidationError::MissingField("policy_snapshot_hash".into()));
    }
    if intent.view_snapshot_hash.is_empty() {
        return Err(ValidationError::MissingField("view_snapshot_hash".into()));
    }
    if intent.actor_circle_ref.is_empty() || intent.payee_ref.is_empty() {
        return Err(ValidationError::MissingField("actor_circle_ref or payee_ref".into()));
    }
    if intent.amount <= 0 {
        return Err(ValidationError::InvalidAmount(format!("amount {} must be positive", intent.amount)));
    }
    Ok(())
}

/// Entry point: validates the intent, then defers to the already-assembled
/// [`ExecutionContext`] (built by the caller from the intent plus the
/// sealed envelope, policy/view snapshots, and gate state) to run the
/// pipeline. The router's job ends at validation and intent-id derivation;
/// envelope sealing and gate assembly are the caller's responsibility
/// because they require collaborators (registries, clocks, connectors)
/// the router itself has no opinion about.
pub async fn execute_from_intent(
    intent: &ExecutionIntent,
    ctx: ExecutionContext<'_>,
) -> Result<ExecutionOutcome, BoundaryError> {
    validate_intent(intent).map_err(BoundaryError::Validation)?;
    let intent_id = derive_intent_id(intent);
    tracing::info!(intent_id = %intent_id, envelope_id = %ctx.envelope.envelope_id, "routing execution intent");
    executor::execute(ctx).await
}
