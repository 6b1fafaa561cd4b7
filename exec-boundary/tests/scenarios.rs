//! End-to-end scenarios for the financial execution boundary, covering
//! spec.md §8: a clean single-party pass, and one rejection per gate.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use crypto_primitives::HmacKey;

use exec_boundary::approval::ApprovalManager;
use exec_boundary::audit::{AuditEmitter, AuditEvent};
use exec_boundary::bundle::{ApprovalBundle, BundleParams, ExecutionWindow};
use exec_boundary::clock::{Clock, FixedClock};
use exec_boundary::config::Config;
use exec_boundary::connector::MockConnector;
use exec_boundary::envelope::{ActionSpec, Envelope, EnvelopeParams};
use exec_boundary::ledger::{AttemptLedger, AttemptStatus};
use exec_boundary::multiparty::{GateMode, MultiPartyPolicy};
use exec_boundary::policy::{PolicyParams, PolicySnapshot};
use exec_boundary::presentation::PresentationGate;
use exec_boundary::registry::{Environment, PayeeEntry, PayeeRegistry, ProviderEntry, ProviderRegistry};
use exec_boundary::revocation::RevocationChecker;
use exec_boundary::view::{ViewParams, ViewSnapshot};
use exec_boundary::{execute, ExecutionContext};

struct NullAudit;
impl AuditEmitter for NullAudit {
    fn emit(&self, _event: AuditEvent) {}
}

struct Fixtures {
    envelope: Envelope,
    policy: PolicySnapshot,
    view: ViewSnapshot,
    payees: PayeeRegistry,
    providers: ProviderRegistry,
}

fn build_fixtures(now: chrono::DateTime<Utc>, amount: i64, amount_cap: i64) -> Fixtures {
    let mut allowed_providers = BTreeSet::new();
    allowed_providers.insert("mock-write".to_string());
    let mut allowed_payees = BTreeSet::new();
    allowed_payees.insert("sandbox-utility".to_string());

    let policy = PolicySnapshot::build(
        PolicyParams {
            id: "policy-1".into(),
            owner_ref: "circle-1".into(),
            write_enabled: true,
            allowed_providers,
            allowed_payees,
            require_explicit_approval: true,
            max_staleness: Duration::from_secs(300),
            dry_run: false,
        },
        now,
    );

    let view = ViewSnapshot::build(
        ViewParams {
            id: "view-1".into(),
            circle_ref: "circle-1".into(),
            intersection_ref: None,
            payee_ref: "sandbox-utility".into(),
            provider_ref: "mock-write".into(),
            currency: "GBP".into(),
            amount,
            payee_allowed: true,
            provider_allowed: true,
            account_visibility: vec!["acc-1".into()],
            shared_view_hash: "shared-abc".into(),
            balance_ok: true,
            notes: None,
        },
        now,
    );

    let envelope = Envelope::build(
        EnvelopeParams {
            envelope_id: "env-1".into(),
            actor_circle_ref: "circle-1".into(),
            intersection_ref: None,
            view_hash: view.hash.clone(),
            action_spec: ActionSpec {
                action_type: "finance-payment".into(),
                amount,
                currency: "GBP".into(),
                payee_ref: "sandbox-utility".into(),
                description: "Pay the sandbox utility bill".into(),
            },
            amount_cap,
            frequency_cap: 1,
            duration_cap: None,
            expiry: now + chrono::Duration::hours(1),
            approval_threshold: 1,
            revocation_window_duration: Some(chrono::Duration::seconds(30)),
            revocation_waived: false,
            trace_id: "trace-1".into(),
            policy_snapshot_hash: policy.hash.clone(),
            view_snapshot_hash: view.hash.clone(),
        },
        now,
    )
    .expect("envelope should seal with a valid amount/cap pair");

    let mut payees = PayeeRegistry::new();
    payees.register(
        "sandbox-utility",
        PayeeEntry {
            display_name: "Sandbox Utility Co".into(),
            provider_ref: "mock-write".into(),
            environment: Environment::Sandbox,
            currency: "GBP".into(),
            allowed: true,
        },
    );
    let mut providers = ProviderRegistry::new();
    providers.register(
        "mock-write",
        ProviderEntry {
            environment: Environment::Sandbox,
            allowed: true,
        },
    );

    Fixtures { envelope, policy, view, payees, providers }
}

fn bundle_for(envelope: &Envelope, view: &ViewSnapshot, now: chrono::DateTime<Utc>) -> ApprovalBundle {
    ApprovalBundle::build(
        BundleParams {
            envelope_ref: envelope.envelope_id.clone(),
            action_hash: envelope.action_hash.clone(),
            intersection_ref: None,
            payee_ref: "sandbox-utility".into(),
            amount: envelope.action_spec.amount,
            currency: "GBP".into(),
            execution_window: ExecutionWindow { start: now, end: now + chrono::Duration::hours(1) },
            expiry: now + chrono::Duration::hours(1),
            revocation_window_end: envelope.revocation_window.end,
            revocation_waived: false,
            view_hash: Some(view.hash.clone()),
            description: "Pay the sandbox utility bill".into(),
        },
        now,
    )
    .unwrap()
}

fn fast_config() -> Config {
    let mut cfg = Config::default();
    cfg.forced_pause_duration = Duration::from_millis(20);
    cfg.forced_pause_poll_interval = Duration::from_millis(5);
    cfg
}

#[tokio::test]
async fn single_party_mock_execution_succeeds_end_to_end() {
    let clock = FixedClock::new(Utc::now());
    let now = clock.now();
    let fx = build_fixtures(now, 50, 100);
    let bundle = bundle_for(&fx.envelope, &fx.view, now);

    let presentation_gate = PresentationGate::new();
    presentation_gate.record("circle-1", "alice", &bundle, &fx.envelope.envelope_id, "trace-1", chrono::Duration::minutes(5), now);

    let approvals = ApprovalManager::new(HmacKey::from_bytes(b"scenario-key"));
    let artifact = approvals.submit(
        "artifact-1",
        &fx.envelope.action_hash,
        &bundle.content_hash,
        "circle-1",
        "alice",
        now + chrono::Duration::minutes(5),
        now,
    );

    let revocation = RevocationChecker::new();
    let ledger = AttemptLedger::new();
    let connector = MockConnector::new();
    let audit = NullAudit;
    let config = fast_config();
    let multiparty_policy = MultiPartyPolicy {
        mode: GateMode::SingleParty,
        required_approvers: 1,
        threshold: 1,
        expiry_seconds: 300,
        scopes: vec![],
    };

    let ctx = ExecutionContext {
        explicit_approve: true,
        envelope: &fx.envelope,
        policy: &fx.policy,
        live_policy: &fx.policy,
        view: &fx.view,
        live_view_hash: &fx.view.hash,
        payees: &fx.payees,
        providers: &fx.providers,
        provider_ref: "mock-write",
        presentation_gate: &presentation_gate,
        presentation_submissions: &[("circle-1".to_string(), bundle.content_hash.clone())],
        multiparty_policy: &multiparty_policy,
        approval_submissions: &[(artifact, bundle.content_hash.clone())],
        approval_manager: &approvals,
        scope: "finance-payment",
        revocation: &revocation,
        ledger: &ledger,
        connector: &connector,
        audit: &audit,
        clock: &clock,
        config: &config,
    };

    let outcome = execute(ctx).await.expect("clean single-party attempt should succeed");
    assert!(outcome.success);
    assert!(!outcome.money_moved);
    assert!(outcome.receipt.unwrap().simulated);
}

#[tokio::test]
async fn amount_over_envelope_cap_is_rejected_at_seal_time() {
    let now = Utc::now();
    // The envelope builder itself enforces amount <= amount_cap, so an
    // envelope whose action amount exceeds its own cap never seals and
    // never reaches the executor at all.
    let result = Envelope::build(
        EnvelopeParams {
            envelope_id: "env-over-cap".into(),
            actor_circle_ref: "circle-1".into(),
            intersection_ref: None,
            view_hash: "view-hash-abc".into(),
            action_spec: ActionSpec {
                action_type: "finance-payment".into(),
                amount: 500,
                currency: "GBP".into(),
                payee_ref: "sandbox-utility".into(),
                description: "Pay the sandbox utility bill".into(),
            },
            amount_cap: 100,
            frequency_cap: 1,
            duration_cap: None,
            expiry: now + chrono::Duration::hours(1),
            approval_threshold: 1,
            revocation_window_duration: Some(chrono::Duration::seconds(30)),
            revocation_waived: false,
            trace_id: "trace-1".into(),
            policy_snapshot_hash: "policy-hash-abc".into(),
            view_snapshot_hash: "view-hash-abc".into(),
        },
        now,
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn amount_over_executor_cap_is_blocked_at_execution_time() {
    // spec.md scenario 2, literally: amount=150 with an envelope-level cap
    // of 200, so the envelope seals fine and the attempt reaches the
    // executor — it is the executor's own hard cap (100 by default) that
    // blocks it.
    let clock = FixedClock::new(Utc::now());
    let now = clock.now();
    let fx = build_fixtures(now, 150, 200);
    let bundle = bundle_for(&fx.envelope, &fx.view, now);

    let presentation_gate = PresentationGate::new();
    presentation_gate.record("circle-1", "alice", &bundle, &fx.envelope.envelope_id, "trace-1", chrono::Duration::minutes(5), now);

    let approvals = ApprovalManager::new(HmacKey::from_bytes(b"scenario-key"));
    let artifact = approvals.submit(
        "artifact-1",
        &fx.envelope.action_hash,
        &bundle.content_hash,
        "circle-1",
        "alice",
        now + chrono::Duration::minutes(5),
        now,
    );

    let revocation = RevocationChecker::new();
    let ledger = AttemptLedger::new();
    let connector = MockConnector::new();
    let audit = NullAudit;
    let config = fast_config();
    let multiparty_policy = MultiPartyPolicy {
        mode: GateMode::SingleParty,
        required_approvers: 1,
        threshold: 1,
        expiry_seconds: 300,
        scopes: vec![],
    };

    let ctx = ExecutionContext {
        explicit_approve: true,
        envelope: &fx.envelope,
        policy: &fx.policy,
        live_policy: &fx.policy,
        view: &fx.view,
        live_view_hash: &fx.view.hash,
        payees: &fx.payees,
        providers: &fx.providers,
        provider_ref: "mock-write",
        presentation_gate: &presentation_gate,
        presentation_submissions: &[("circle-1".to_string(), bundle.content_hash.clone())],
        multiparty_policy: &multiparty_policy,
        approval_submissions: &[(artifact, bundle.content_hash.clone())],
        approval_manager: &approvals,
        scope: "finance-payment",
        revocation: &revocation,
        ledger: &ledger,
        connector: &connector,
        audit: &audit,
        clock: &clock,
        config: &config,
    };

    let outcome = execute(ctx).await.expect("blocked attempts still return a terminal outcome");
    assert!(!outcome.success);
    assert_eq!(outcome.status, AttemptStatus::Blocked);
    assert!(!outcome.money_moved);
    assert!(outcome.receipt.is_none());
    assert!(outcome.blocked_reason.unwrap().contains("exceeds executor cap"));
}

#[tokio::test]
async fn missing_presentation_blocks_multi_party_execution() {
    let clock = FixedClock::new(Utc::now());
    let now = clock.now();
    let fx = build_fixtures(now, 50, 100);
    let bundle = bundle_for(&fx.envelope, &fx.view, now);

    // Only "circle-alice" is presented the bundle; "circle-bob" never is.
    let presentation_gate = PresentationGate::new();
    presentation_gate.record("circle-alice", "alice", &bundle, &fx.envelope.envelope_id, "trace-1", chrono::Duration::minutes(5), now);

    let approvals = ApprovalManager::new(HmacKey::from_bytes(b"scenario-key"));
    let artifact_a = approvals.submit("artifact-a", &fx.envelope.action_hash, &bundle.content_hash, "circle-alice", "alice", now + chrono::Duration::minutes(5), now);
    let artifact_b = approvals.submit("artifact-b", &fx.envelope.action_hash, &bundle.content_hash, "circle-bob", "bob", now + chrono::Duration::minutes(5), now);

    let revocation = RevocationChecker::new();
    let ledger = AttemptLedger::new();
    let connector = MockConnector::new();
    let audit = NullAudit;
    let config = fast_config();
    let multiparty_policy = MultiPartyPolicy {
        mode: GateMode::MultiParty,
        required_approvers: 2,
        threshold: 2,
        expiry_seconds: 300,
        scopes: vec![],
    };

    let ctx = ExecutionContext {
        explicit_approve: true,
        envelope: &fx.envelope,
        policy: &fx.policy,
        live_policy: &fx.policy,
        view: &fx.view,
        live_view_hash: &fx.view.hash,
        payees: &fx.payees,
        providers: &fx.providers,
        provider_ref: "mock-write",
        presentation_gate: &presentation_gate,
        presentation_submissions: &[
            ("circle-alice".to_string(), bundle.content_hash.clone()),
            ("circle-bob".to_string(), bundle.content_hash.clone()),
        ],
        multiparty_policy: &multiparty_policy,
        approval_submissions: &[
            (artifact_a, bundle.content_hash.clone()),
            (artifact_b, bundle.content_hash.clone()),
        ],
        approval_manager: &approvals,
        scope: "finance-payment",
        revocation: &revocation,
        ledger: &ledger,
        connector: &connector,
        audit: &audit,
        clock: &clock,
        config: &config,
    };

    let outcome = execute(ctx).await.expect("blocked attempts still return a terminal outcome");
    assert!(!outcome.success);
    assert_eq!(outcome.status, AttemptStatus::Blocked);
    assert!(outcome.blocked_reason.unwrap().contains("circle-bob"));
}

#[tokio::test]
async fn asymmetric_bundle_hashes_block_execution() {
    let clock = FixedClock::new(Utc::now());
    let now = clock.now();
    let fx = build_fixtures(now, 50, 100);
    let bundle = bundle_for(&fx.envelope, &fx.view, now);

    // Bob is shown a bundle whose content hash differs (simulated by
    // signing his approval against the same action hash but a different
    // bundle hash than Alice's).
    let other_bundle_hash = "tampered-bundle-hash".to_string();

    let presentation_gate = PresentationGate::new();
    presentation_gate.record("circle-alice", "alice", &bundle, &fx.envelope.envelope_id, "trace-1", chrono::Duration::minutes(5), now);

    let approvals = ApprovalManager::new(HmacKey::from_bytes(b"scenario-key"));
    let artifact_a = approvals.submit("artifact-a", &fx.envelope.action_hash, &bundle.content_hash, "circle-alice", "alice", now + chrono::Duration::minutes(5), now);
    let artifact_b = approvals.submit("artifact-b", &fx.envelope.action_hash, &other_bundle_hash, "circle-bob", "bob", now + chrono::Duration::minutes(5), now);

    let revocation = RevocationChecker::new();
    let ledger = AttemptLedger::new();
    let connector = MockConnector::new();
    let audit = NullAudit;
    let config = fast_config();
    let multiparty_policy = MultiPartyPolicy {
        mode: GateMode::MultiParty,
        required_approvers: 2,
        threshold: 2,
        expiry_seconds: 300,
        scopes: vec![],
    };

    let ctx = ExecutionContext {
        explicit_approve: true,
        envelope: &fx.envelope,
        policy: &fx.policy,
        live_policy: &fx.policy,
        view: &fx.view,
        live_view_hash: &fx.view.hash,
        payees: &fx.payees,
        providers: &fx.providers,
        provider_ref: "mock-write",
        presentation_gate: &presentation_gate,
        presentation_submissions: &[("circle-alice".to_string(), bundle.content_hash.clone())],
        multiparty_policy: &multiparty_policy,
        approval_submissions: &[
            (artifact_a, bundle.content_hash.clone()),
            (artifact_b, other_bundle_hash.clone()),
        ],
        approval_manager: &approvals,
        scope: "finance-payment",
        revocation: &revocation,
        ledger: &ledger,
        connector: &connector,
        audit: &audit,
        clock: &clock,
        config: &config,
    };

    let outcome = execute(ctx).await.expect("blocked attempts still return a terminal outcome");
    assert!(!outcome.success);
    assert_eq!(outcome.status, AttemptStatus::Blocked);
    assert!(outcome.blocked_reason.unwrap().contains("asymmetric"));
}

#[tokio::test]
async fn revocation_observed_during_forced_pause_aborts_before_write() {
    let clock = FixedClock::new(Utc::now());
    let now = clock.now();
    let fx = build_fixtures(now, 50, 100);
    let bundle = bundle_for(&fx.envelope, &fx.view, now);

    let presentation_gate = PresentationGate::new();
    presentation_gate.record("circle-1", "alice", &bundle, &fx.envelope.envelope_id, "trace-1", chrono::Duration::minutes(5), now);

    let approvals = ApprovalManager::new(HmacKey::from_bytes(b"scenario-key"));
    let artifact = approvals.submit("artifact-1", &fx.envelope.action_hash, &bundle.content_hash, "circle-1", "alice", now + chrono::Duration::minutes(5), now);

    let revocation = RevocationChecker::new();
    // Revoke ahead of time; the forced-pause poll loop must observe it
    // before the connector is ever called.
    revocation.revoke(&fx.envelope.envelope_id, "circle-1", "alice", "changed my mind", now);

    let ledger = AttemptLedger::new();
    let connector = MockConnector::new();
    let audit = NullAudit;
    let mut config = fast_config();
    config.forced_pause_duration = Duration::from_millis(50);
    config.forced_pause_poll_interval = Duration::from_millis(5);
    let multiparty_policy = MultiPartyPolicy {
        mode: GateMode::SingleParty,
        required_approvers: 1,
        threshold: 1,
        expiry_seconds: 300,
        scopes: vec![],
    };

    let ctx = ExecutionContext {
        explicit_approve: true,
        envelope: &fx.envelope,
        policy: &fx.policy,
        live_policy: &fx.policy,
        view: &fx.view,
        live_view_hash: &fx.view.hash,
        payees: &fx.payees,
        providers: &fx.providers,
        provider_ref: "mock-write",
        presentation_gate: &presentation_gate,
        presentation_submissions: &[("circle-1".to_string(), bundle.content_hash.clone())],
        multiparty_policy: &multiparty_policy,
        approval_submissions: &[(artifact, bundle.content_hash.clone())],
        approval_manager: &approvals,
        scope: "finance-payment",
        revocation: &revocation,
        ledger: &ledger,
        connector: &connector,
        audit: &audit,
        clock: &clock,
        config: &config,
    };

    let outcome = execute(ctx).await.expect("revoked attempts still return a terminal outcome");
    assert!(!outcome.success);
    assert_eq!(outcome.status, AttemptStatus::Revoked);
    assert!(outcome.receipt.is_none());
    assert!(!outcome.money_moved);
}

#[tokio::test]
async fn replay_after_terminal_attempt_short_circuits_to_original_receipt() {
    let clock = FixedClock::new(Utc::now());
    let now = clock.now();
    let fx = build_fixtures(now, 50, 100);
    let bundle = bundle_for(&fx.envelope, &fx.view, now);

    let presentation_gate = PresentationGate::new();
    presentation_gate.record("circle-1", "alice", &bundle, &fx.envelope.envelope_id, "trace-1", chrono::Duration::minutes(5), now);

    let approvals = ApprovalManager::new(HmacKey::from_bytes(b"scenario-key"));
    let artifact = approvals.submit("artifact-1", &fx.envelope.action_hash, &bundle.content_hash, "circle-1", "alice", now + chrono::Duration::minutes(5), now);

    let revocation = RevocationChecker::new();
    let ledger = AttemptLedger::new();
    let connector = MockConnector::new();
    let audit = NullAudit;
    let config = fast_config();
    let multiparty_policy = MultiPartyPolicy {
        mode: GateMode::SingleParty,
        required_approvers: 1,
        threshold: 1,
        expiry_seconds: 300,
        scopes: vec![],
    };

    let ctx = ExecutionContext {
        explicit_approve: true,
        envelope: &fx.envelope,
        policy: &fx.policy,
        live_policy: &fx.policy,
        view: &fx.view,
        live_view_hash: &fx.view.hash,
        payees: &fx.payees,
        providers: &fx.providers,
        provider_ref: "mock-write",
        presentation_gate: &presentation_gate,
        presentation_submissions: &[("circle-1".to_string(), bundle.content_hash.clone())],
        multiparty_policy: &multiparty_policy,
        approval_submissions: &[(artifact.clone(), bundle.content_hash.clone())],
        approval_manager: &approvals,
        scope: "finance-payment",
        revocation: &revocation,
        ledger: &ledger,
        connector: &connector,
        audit: &audit,
        clock: &clock,
        config: &config,
    };

    let first = execute(ctx).await.expect("first attempt should complete");
    assert!(first.success);
    assert!(!first.replay_blocked);

    let ctx_replay = ExecutionContext {
        explicit_approve: true,
        envelope: &fx.envelope,
        policy: &fx.policy,
        live_policy: &fx.policy,
        view: &fx.view,
        live_view_hash: &fx.view.hash,
        payees: &fx.payees,
        providers: &fx.providers,
        provider_ref: "mock-write",
        presentation_gate: &presentation_gate,
        presentation_submissions: &[("circle-1".to_string(), bundle.content_hash.clone())],
        multiparty_policy: &multiparty_policy,
        approval_submissions: &[(artifact, bundle.content_hash.clone())],
        approval_manager: &approvals,
        scope: "finance-payment",
        revocation: &revocation,
        ledger: &ledger,
        connector: &connector,
        audit: &audit,
        clock: &clock,
        config: &config,
    };

    let replay = execute(ctx_replay).await.expect("replay should short-circuit, not re-execute");
    assert!(replay.replay_blocked);
    assert_eq!(first.receipt.unwrap().receipt_id, replay.receipt.unwrap().receipt_id);
    assert_eq!(first.attempt_id, replay.attempt_id);
}
