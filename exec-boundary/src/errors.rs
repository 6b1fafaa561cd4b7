//! Error taxonomy, §7. One `thiserror` enum per bucket, aggregated into
//! [`BoundaryError`] the way the teacher composes `CryptoError`,
//! `GovernanceError`, and `ReceiptError` into crate-level results.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("currency disallowed: {0}")]
    CurrencyDisallowed(String),
    #[error("envelope not sealed")]
    EnvelopeNotSealed,
    #[error("envelope expired")]
    EnvelopeExpired,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViewError {
    #[error("policy drift: expected {expected_prefix}, got {actual_prefix}")]
    PolicyDrift {
        expected_prefix: String,
        actual_prefix: String,
    },
    #[error("policy disabled for writes")]
    PolicyDisabled,
    #[error("view stale: {staleness_ms}ms > {max_ms}ms")]
    ViewStale { staleness_ms: i64, max_ms: i64 },
    #[error("view drift: expected {expected_prefix}, got {actual_prefix}")]
    ViewDrift {
        expected_prefix: String,
        actual_prefix: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("payee not allowed: {0}")]
    PayeeNotAllowed(String),
    #[error("provider not allowed: {0}")]
    ProviderNotAllowed(String),
    #[error("live provider rejected outside sandbox-only mode")]
    LiveInSandboxOnlyMode,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("approval missing for {0}")]
    ApprovalMissing(String),
    #[error("approval expired at {0}")]
    ApprovalExpired(String),
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("action hash mismatch: expected {expected}, got {actual}")]
    ActionHashMismatch { expected: String, actual: String },
    #[error("approval already used: {0}")]
    ApprovalReuse(String),
    #[error("insufficient approvals: got {got}, need {need}")]
    InsufficientApprovals { got: usize, need: usize },
    #[error("asymmetric bundle, violators: {violators:?}")]
    AsymmetricBundle { violators: Vec<String> },
    #[error("approver not distinct: {0}")]
    ApproverNotDistinct(String),
    #[error("scope mismatch: {0}")]
    ScopeMismatch(String),
    #[error("neutrality violation, forbidden pattern: {pattern}")]
    NeutralityViolation { pattern: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PresentationError {
    #[error("presentation missing for {0}")]
    PresentationMissing(String),
    #[error("presentation expired for {0}")]
    PresentationExpired(String),
    #[error("presentation hash mismatch: expected {expected}, got {actual}")]
    PresentationHashMismatch { expected: String, actual: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RevocationError {
    #[error("revoked: {0}")]
    Revoked(String),
    #[error("revoked during forced pause: {0}")]
    RevokedDuringPause(String),
    #[error("aborted")]
    Aborted,
    #[error("cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("attempt already exists: {0}")]
    AttemptAlreadyExists(String),
    #[error("attempt not found: {0}")]
    AttemptNotFound(String),
    #[error("attempt in flight for envelope {0}")]
    AttemptInFlight(String),
    #[error("idempotency key conflict: {0}")]
    IdempotencyKeyConflict(String),
    #[error("terminal replay of envelope {0}")]
    TerminalReplay(String),
    #[error("attempt {0} is already terminal")]
    AttemptTerminal(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("prepare invalid: {0}")]
    PrepareInvalid(String),
    #[error("execute failed: {0}")]
    ExecuteFailed(String),
    #[error("execution aborted")]
    ExecutionAborted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("live provider rejected: {0}")]
    LiveProviderRejected(String),
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Aggregate error surfaced by the public API. `GuardrailViolation` is
/// deliberately absent here — per spec.md §7 it is the one condition the
/// executor turns into a process abort (`panic!`) rather than a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoundaryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    PolicyView(#[from] PolicyViewError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Approval(#[from] ApprovalError),
    #[error(transparent)]
    Presentation(#[from] PresentationError),
    #[error(transparent)]
    Revocation(#[from] RevocationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type BoundaryResult<T> = Result<T, BoundaryError>;
