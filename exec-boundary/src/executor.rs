//! C13 — Executor. The pipeline that runs a sealed envelope through every
//! gate, the forced pause, and the write connector exactly once
//! (spec.md §4.13).

use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::Utc;

use crate::approval::ApprovalManager;
use crate::audit::{AuditEmitter, AuditEvent};
use crate::clock::Clock;
use crate::config::Config;
use crate::connector::{PreparedWrite, ReceiptStatus, WriteConnector, WriteReceipt};
use crate::envelope::Envelope;
use crate::errors::{BoundaryError, PolicyViewError, ProviderError, ValidationError};
use crate::ledger::{AttemptLedger, AttemptStatus};
use crate::multiparty::{self, MultiPartyPolicy};
use crate::policy::PolicySnapshot;
use crate::presentation::PresentationGate;
use crate::registry::{PayeeRegistry, ProviderRegistry};
use crate::revocation::RevocationChecker;
use crate::view::{self, ViewSnapshot};

/// Every gate the pipeline evaluates, in the fixed order given in
/// spec.md §4.13. One [`ValidationCheckRecord`] is produced per variant
/// per attempt, in this order, so the gate sequence is observable rather
/// than only inferable from which error came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCheck {
    ExplicitApprovalFlag,
    EnvelopeSealed,
    EnvelopeNotExpired,
    NotAborted,
    PolicyHashMatches,
    PolicyWriteEnabled,
    ViewHashMatches,
    ViewFresh,
    PayeeProviderAllowed,
    AmountWithinCaps,
    CurrencyAllowed,
    PresentationsVerified,
    ApprovalsSatisfyGate,
    ApprovalSignaturesVerified,
    RevocationClearBeforePause,
    RevocationClearAfterPause,
}

/// One gate's outcome: `name`, `passed`, `details` per spec.md §4.13.
#[derive(Debug, Clone)]
pub struct ValidationCheckRecord {
    pub check: ValidationCheck,
    pub passed: bool,
    pub detail: String,
}

/// The user-visible failure shape of spec.md §4.13: every terminal
/// attempt — success or not — returns one of these rather than an error
/// type, so `money_moved` and the gate-by-gate trail are always visible.
pub struct ExecutionOutcome {
    pub attempt_id: String,
    pub success: bool,
    pub status: AttemptStatus,
    pub blocked_reason: Option<String>,
    pub validation_details: Vec<ValidationCheckRecord>,
    pub receipt: Option<WriteReceipt>,
    pub money_moved: bool,
    pub replay_blocked: bool,
}

/// Everything the pipeline needs that isn't already on the envelope. Each
/// field corresponds to one gate the spec names; the executor calls them
/// in the order given in spec.md §4.13, failing closed on the first error.
pub struct ExecutionContext<'a> {
    pub explicit_approve: bool,
    pub envelope: &'a Envelope,
    pub policy: &'a PolicySnapshot,
    pub live_policy: &'a PolicySnapshot,
    pub view: &'a ViewSnapshot,
    pub live_view_hash: &'a str,
    pub payees: &'a PayeeRegistry,
    pub providers: &'a ProviderRegistry,
    pub provider_ref: &'a str,
    pub presentation_gate: &'a PresentationGate,
    pub presentation_submissions: &'a [(String, String)],
    pub multiparty_policy: &'a MultiPartyPolicy,
    pub approval_submissions: &'a [(crate::approval::ApprovalArtifact, String)],
    pub approval_manager: &'a ApprovalManager,
    pub scope: &'a str,
    pub revocation: &'a RevocationChecker,
    pub ledger: &'a AttemptLedger,
    pub connector: &'a (dyn WriteConnector + Send + Sync),
    pub audit: &'a (dyn AuditEmitter + Send + Sync),
    pub clock: &'a (dyn Clock + Send + Sync),
    pub config: &'a Config,
}

fn audit(ctx: &ExecutionContext, event_type: &str, outcome: &str, detail: &str) {
    let mut metadata = BTreeMap::new();
    metadata.insert("outcome".to_string(), outcome.to_string());
    metadata.insert("detail".to_string(), detail.to_string());
    ctx.audit.emit(AuditEvent {
        event_type: event_type.to_string(),
        timestamp: ctx.clock.now(),
        circle: ctx.envelope.actor_circle_ref.clone(),
        intersection: ctx.envelope.intersection_ref.clone(),
        subject_id: ctx.envelope.envelope_id.clone(),
        subject_type: "envelope".to_string(),
        provider: Some(ctx.provider_ref.to_string()),
        trace: ctx.envelope.trace_id.clone(),
        metadata,
    });
}

/// Records one gate's result: pushes it onto the ordered sequence and
/// emits it through both `tracing` and the audit sink, so the sequence
/// is observable even on an attempt that fails partway through and never
/// reaches a returned [`ExecutionOutcome`].
fn record_check(
    ctx: &ExecutionContext,
    checks: &mut Vec<ValidationCheckRecord>,
    check: ValidationCheck,
    passed: bool,
    detail: impl Into<String>,
) {
    let detail = detail.into();
    tracing::debug!(envelope_id = %ctx.envelope.envelope_id, check = ?check, passed, detail = %detail, "gate check");
    audit(
        ctx,
        "validation_check",
        if passed { "passed" } else { "failed" },
        &format!("{:?}: {}", check, detail),
    );
    checks.push(ValidationCheckRecord { check, passed, detail });
}

/// Maps a pipeline failure onto the terminal status it actually represents,
/// so a revoked attempt, an abort, a gate rejection, and a connector
/// failure land in distinct ledger states instead of all collapsing to the
/// same `Failed` bucket.
fn terminal_status_for_error(err: &BoundaryError) -> AttemptStatus {
    match err {
        BoundaryError::Revocation(_) => AttemptStatus::Revoked,
        BoundaryError::Provider(ProviderError::ExecutionAborted) => AttemptStatus::Aborted,
        BoundaryError::Provider(_) => AttemptStatus::Failed,
        BoundaryError::Ledger(_) => AttemptStatus::Failed,
        _ => AttemptStatus::Blocked,
    }
}

/// Runs the full gate pipeline for one attempt and returns the user-visible
/// outcome. `Ok` is returned for every terminal attempt — success or not —
/// with `success`/`status`/`blocked_reason`/`money_moved` distinguishing
/// them. `Err` is reserved for the narrow case where this call never
/// started an attempt at all (an idempotency/ledger conflict on a
/// concurrent in-flight attempt for the same key).
pub async fn execute(ctx: ExecutionContext<'_>) -> Result<ExecutionOutcome, BoundaryError> {
    let mut checks: Vec<ValidationCheckRecord> = Vec::new();
    let attempt_id = format!("attempt-{}", ctx.envelope.envelope_id);

    // Gate 1: the caller must carry the explicit-approve signal. This is
    // checked before anything else touches the ledger or the gates below —
    // there is no implicit approval path.
    if !ctx.explicit_approve {
        record_check(&ctx, &mut checks, ValidationCheck::ExplicitApprovalFlag, false, "explicit_approve flag not set");
        audit(&ctx, "executor", "blocked", "explicit_approve flag not set");
        return Ok(ExecutionOutcome {
            attempt_id,
            success: false,
            status: AttemptStatus::Blocked,
            blocked_reason: Some("explicit_approve flag not set".to_string()),
            validation_details: checks,
            receipt: None,
            money_moved: false,
            replay_blocked: false,
        });
    }
    record_check(&ctx, &mut checks, ValidationCheck::ExplicitApprovalFlag, true, "explicit_approve flag set");

    let idempotency_key = crate::ledger::derive_idempotency_key(
        &ctx.envelope.envelope_id,
        &ctx.envelope.action_hash,
        &attempt_id,
        &ctx.envelope.seal_hash,
    );

    if let Some(replayed) = ctx.ledger.check_replay(&idempotency_key) {
        tracing::info!(envelope_id = %ctx.envelope.envelope_id, "replay short-circuited to prior terminal attempt");
        let receipt = replayed.receipt_ref.as_ref().map(|receipt_id| WriteReceipt {
            receipt_id: receipt_id.clone(),
            idempotency_key: idempotency_key.clone(),
            provider_ref: ctx.provider_ref.to_string(),
            status: ReceiptStatus::Simulated,
            amount: ctx.envelope.action_spec.amount,
            currency: ctx.envelope.action_spec.currency.clone(),
            payee: ctx.envelope.action_spec.payee_ref.clone(),
            simulated: true,
            money_moved: false,
            error: None,
        });
        return Ok(ExecutionOutcome {
            attempt_id: replayed.attempt_id,
            success: replayed.status == AttemptStatus::Settled || replayed.status == AttemptStatus::Simulated,
            status: replayed.status,
            blocked_reason: None,
            validation_details: checks,
            receipt,
            money_moved: false,
            replay_blocked: true,
        });
    }

    let now = ctx.clock.now();
    let record = ctx
        .ledger
        .start(
            &attempt_id,
            &ctx.envelope.envelope_id,
            &ctx.envelope.action_hash,
            &idempotency_key,
            &ctx.envelope.actor_circle_ref,
            &ctx.envelope.trace_id,
            ctx.provider_ref,
            now,
        )
        .map_err(BoundaryError::Ledger)?;
    audit(&ctx, "ledger", "started", &record.attempt_id);

    match run_pipeline(&ctx, &attempt_id, &mut checks).await {
        Ok(receipt) => {
            let status = if receipt.simulated { AttemptStatus::Simulated } else { AttemptStatus::Settled };
            Ok(ExecutionOutcome {
                attempt_id,
                success: true,
                status,
                blocked_reason: None,
                validation_details: checks,
                money_moved: receipt.money_moved,
                receipt: Some(receipt),
                replay_blocked: false,
            })
        }
        Err(err) => {
            let now = ctx.clock.now();
            let terminal = terminal_status_for_error(&err);
            if let Err(finalise_err) = ctx.ledger.finalise(&attempt_id, terminal, None, now) {
                tracing::warn!(attempt_id = %attempt_id, error = %finalise_err, "failed to finalise attempt after pipeline error");
            }
            audit(&ctx, "executor", "failed", &err.to_string());
            Ok(ExecutionOutcome {
                attempt_id,
                success: false,
                status: terminal,
                blocked_reason: Some(err.to_string()),
                validation_details: checks,
                receipt: None,
                money_moved: false,
                replay_blocked: false,
            })
        }
    }
}

async fn run_pipeline(
    ctx: &ExecutionContext<'_>,
    attempt_id: &str,
    checks: &mut Vec<ValidationCheckRecord>,
) -> Result<WriteReceipt, BoundaryError> {
    let now = ctx.clock.now();
    ctx.ledger
        .update_status(attempt_id, AttemptStatus::Validating, now)
        .map_err(BoundaryError::Ledger)?;

    if ctx.envelope.seal_hash.is_empty() {
        record_check(ctx, checks, ValidationCheck::EnvelopeSealed, false, "seal_hash empty");
        return Err(BoundaryError::Validation(ValidationError::EnvelopeNotSealed));
    }
    record_check(ctx, checks, ValidationCheck::EnvelopeSealed, true, "envelope sealed");

    if ctx.envelope.is_expired(now) {
        record_check(ctx, checks, ValidationCheck::EnvelopeNotExpired, false, "envelope expired");
        return Err(BoundaryError::Validation(ValidationError::EnvelopeExpired));
    }
    record_check(ctx, checks, ValidationCheck::EnvelopeNotExpired, true, "envelope not expired");

    // Gate 3: the connector is the system of record for abort state — a
    // prior abort() call must block this attempt before any gate below
    // does real work.
    if ctx.connector.is_aborted(&ctx.envelope.envelope_id) {
        record_check(ctx, checks, ValidationCheck::NotAborted, false, "connector reports envelope aborted");
        return Err(BoundaryError::Provider(crate::errors::ProviderError::ExecutionAborted));
    }
    record_check(ctx, checks, ValidationCheck::NotAborted, true, "no abort recorded");

    if ctx.policy.hash != ctx.live_policy.hash {
        record_check(ctx, checks, ValidationCheck::PolicyHashMatches, false, "policy hash drifted from sealed snapshot");
        return Err(BoundaryError::PolicyView(PolicyViewError::PolicyDrift {
            expected_prefix: ctx.policy.hash.chars().take(12).collect(),
            actual_prefix: ctx.live_policy.hash.chars().take(12).collect(),
        }));
    }
    record_check(ctx, checks, ValidationCheck::PolicyHashMatches, true, "policy hash matches sealed snapshot");

    if !ctx.live_policy.write_enabled {
        record_check(ctx, checks, ValidationCheck::PolicyWriteEnabled, false, "policy has writes disabled");
        return Err(BoundaryError::PolicyView(PolicyViewError::PolicyDisabled));
    }
    record_check(ctx, checks, ValidationCheck::PolicyWriteEnabled, true, "policy allows writes");

    if let Err(err) = view::verify_view_hash(&ctx.envelope.view_hash, ctx.live_view_hash) {
        record_check(ctx, checks, ValidationCheck::ViewHashMatches, false, err.to_string());
        return Err(BoundaryError::PolicyView(err));
    }
    record_check(ctx, checks, ValidationCheck::ViewHashMatches, true, "view hash matches sealed snapshot");

    if let view::FreshnessCheck::Stale { staleness_ms, max_ms } =
        view::check_freshness(ctx.view, now, ctx.config.max_view_staleness)
    {
        record_check(
            ctx,
            checks,
            ValidationCheck::ViewFresh,
            false,
            format!("staleness {staleness_ms}ms exceeds max {max_ms}ms"),
        );
        return Err(BoundaryError::PolicyView(PolicyViewError::ViewStale { staleness_ms, max_ms }));
    }
    record_check(ctx, checks, ValidationCheck::ViewFresh, true, "view within staleness budget");

    if let Err(err) =
        crate::registry::require_allowed(ctx.payees, ctx.providers, &ctx.envelope.action_spec.payee_ref, ctx.provider_ref)
    {
        record_check(ctx, checks, ValidationCheck::PayeeProviderAllowed, false, err.to_string());
        return Err(BoundaryError::Registry(err));
    }
    record_check(ctx, checks, ValidationCheck::PayeeProviderAllowed, true, "payee and provider allowed");

    // Gate 8: the executor's own hard cap binds regardless of what the
    // envelope itself was sealed with. Independent of the envelope-level
    // `amount_cap` check already enforced at seal time (envelope.rs).
    if ctx.envelope.action_spec.amount > ctx.config.cap_amount {
        let detail = format!("amount {} exceeds executor cap {}", ctx.envelope.action_spec.amount, ctx.config.cap_amount);
        record_check(ctx, checks, ValidationCheck::AmountWithinCaps, false, detail.clone());
        return Err(BoundaryError::Validation(ValidationError::InvalidAmount(detail)));
    }
    if ctx.envelope.action_spec.amount > ctx.envelope.amount_cap {
        let detail = format!("amount {} exceeds envelope cap {}", ctx.envelope.action_spec.amount, ctx.envelope.amount_cap);
        record_check(ctx, checks, ValidationCheck::AmountWithinCaps, false, detail.clone());
        return Err(BoundaryError::Validation(ValidationError::InvalidAmount(detail)));
    }
    record_check(ctx, checks, ValidationCheck::AmountWithinCaps, true, "amount within executor and envelope caps");

    if !ctx.config.allowed_currencies.contains(&ctx.envelope.action_spec.currency) {
        record_check(ctx, checks, ValidationCheck::CurrencyAllowed, false, ctx.envelope.action_spec.currency.clone());
        return Err(BoundaryError::Validation(ValidationError::CurrencyDisallowed(
            ctx.envelope.action_spec.currency.clone(),
        )));
    }
    record_check(ctx, checks, ValidationCheck::CurrencyAllowed, true, ctx.envelope.action_spec.currency.clone());

    let (verified, missing) = ctx.presentation_gate.verify_all(
        ctx.presentation_submissions,
        &ctx.envelope.envelope_id,
        &ctx.envelope.action_hash,
        now,
    );
    if !missing.is_empty() {
        record_check(
            ctx,
            checks,
            ValidationCheck::PresentationsVerified,
            false,
            format!("missing circles: {missing:?}"),
        );
        return Err(BoundaryError::Presentation(
            crate::errors::PresentationError::PresentationMissing(missing.iter().next().cloned().unwrap_or_default()),
        ));
    }
    record_check(ctx, checks, ValidationCheck::PresentationsVerified, true, format!("{} circles verified", verified.len()));

    if let Err(err) = multiparty::evaluate(
        ctx.multiparty_policy,
        &ctx.envelope.action_hash,
        ctx.scope,
        ctx.approval_submissions,
        now,
    ) {
        record_check(ctx, checks, ValidationCheck::ApprovalsSatisfyGate, false, err.to_string());
        return Err(BoundaryError::Approval(err));
    }
    record_check(ctx, checks, ValidationCheck::ApprovalsSatisfyGate, true, "threshold and symmetry satisfied");

    // Gate 9: signature and action-hash binding for every submitted
    // artifact. Multi-party evaluation above already checked action-hash
    // and expiry off the artifact's own fields; this is the step that
    // actually verifies the HMAC signature against the manager's key.
    for (artifact, _bundle_hash) in ctx.approval_submissions {
        if let Err(err) = ctx.approval_manager.verify(artifact, &ctx.envelope.action_hash, now) {
            record_check(ctx, checks, ValidationCheck::ApprovalSignaturesVerified, false, err.to_string());
            return Err(BoundaryError::Approval(err));
        }
    }
    // Single-use is a property of the gate consuming the artifact (spec.md
    // §4.7): once every approval in this attempt has verified, each is
    // consumed so a later attempt cannot present the same artifact again.
    for (artifact, _bundle_hash) in ctx.approval_submissions {
        if let Err(err) = ctx.approval_manager.consume(&artifact.artifact_id, now) {
            record_check(ctx, checks, ValidationCheck::ApprovalSignaturesVerified, false, err.to_string());
            return Err(BoundaryError::Approval(err));
        }
    }
    record_check(
        ctx,
        checks,
        ValidationCheck::ApprovalSignaturesVerified,
        true,
        format!("{} artifacts verified and consumed", ctx.approval_submissions.len()),
    );

    ctx.ledger
        .update_status(attempt_id, AttemptStatus::Approved, now)
        .map_err(BoundaryError::Ledger)?;

    if let Err(err) = ctx.revocation.check(&ctx.envelope.envelope_id, false) {
        record_check(ctx, checks, ValidationCheck::RevocationClearBeforePause, false, err.to_string());
        return Err(BoundaryError::Revocation(err));
    }
    record_check(ctx, checks, ValidationCheck::RevocationClearBeforePause, true, "no revocation signal before pause");

    ctx.ledger
        .update_status(attempt_id, AttemptStatus::Executing, now)
        .map_err(BoundaryError::Ledger)?;

    run_forced_pause(ctx, attempt_id).await?;

    if let Err(err) = ctx.revocation.check(&ctx.envelope.envelope_id, true) {
        record_check(ctx, checks, ValidationCheck::RevocationClearAfterPause, false, err.to_string());
        return Err(BoundaryError::Revocation(err));
    }
    record_check(ctx, checks, ValidationCheck::RevocationClearAfterPause, true, "no revocation signal after pause");

    let write = PreparedWrite {
        envelope_id: ctx.envelope.envelope_id.clone(),
        idempotency_key: crate::ledger::derive_idempotency_key(
            &ctx.envelope.envelope_id,
            &ctx.envelope.action_hash,
            attempt_id,
            &ctx.envelope.seal_hash,
        ),
        provider_ref: ctx.provider_ref.to_string(),
        payee_ref: ctx.envelope.action_spec.payee_ref.clone(),
        amount: ctx.envelope.action_spec.amount,
        currency: ctx.envelope.action_spec.currency.clone(),
    };
    ctx.connector
        .prepare(&write)
        .await
        .map_err(crate::errors::BoundaryError::Provider)?;
    let receipt = ctx
        .connector
        .execute(&write)
        .await
        .map_err(crate::errors::BoundaryError::Provider)?;

    // Guardrail: this pipeline only ever drives sandbox-scoped writes. A
    // connector that reports real money movement here is a configuration
    // error severe enough to abort the process rather than return a value.
    if receipt.money_moved {
        panic!(
            "GuardrailViolation: connector {} reported money_moved=true for a sandbox-scoped execution boundary",
            receipt.provider_ref
        );
    }

    let now = ctx.clock.now();
    let terminal = if receipt.simulated { AttemptStatus::Simulated } else { AttemptStatus::Settled };
    ctx.ledger
        .finalise(attempt_id, terminal, Some(receipt.receipt_id.clone()), now)
        .map_err(BoundaryError::Ledger)?;
    audit(ctx, "executor", "completed", &receipt.receipt_id);

    Ok(receipt)
}

/// Polls the revocation checker across the configured forced-pause window
/// instead of sleeping through it blind, so a revocation mid-pause is
/// observed and aborts before the connector is ever called.
async fn run_forced_pause(ctx: &ExecutionContext<'_>, attempt_id: &str) -> Result<(), BoundaryError> {
    let total = ctx.config.forced_pause_duration;
    let interval = ctx.config.forced_pause_poll_interval.min(total.max(StdDuration::from_millis(1)));
    let mut elapsed = StdDuration::from_millis(0);

    ctx.ledger
        .update_status(attempt_id, AttemptStatus::Paused, ctx.clock.now())
        .map_err(BoundaryError::Ledger)?;
    audit(ctx, "forced_pause", "entered", &format!("{:?}", total));

    while elapsed < total {
        if ctx.revocation.state(&ctx.envelope.envelope_id) == crate::revocation::RevocationState::Revoked {
            let signal = ctx.revocation.signal(&ctx.envelope.envelope_id).expect("state checked revoked");
            return Err(BoundaryError::Revocation(crate::errors::RevocationError::RevokedDuringPause(signal.reason)));
        }
        let step = interval.min(total - elapsed);
        tokio::time::sleep(step).await;
        elapsed += step;
    }

    ctx.ledger
        .update_status(attempt_id, AttemptStatus::Executing, ctx.clock.now())
        .map_err(BoundaryError::Ledger)?;
    audit(ctx, "forced_pause", "exited", "pause window elapsed clean");
    Ok(())
}
