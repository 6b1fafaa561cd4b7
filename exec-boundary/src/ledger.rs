//! C11 — Attempt Ledger. Tracks one record per execution attempt, enforces
//! the attempt state DAG, and guards idempotency/replay (spec.md §4.11).

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use serde::{Deserialize, Serialize};

use crate::errors::LedgerError;
use crate::hasher::{self, Field};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptStatus {
    Started,
    Validating,
    Approved,
    Executing,
    Paused,
    /// Real write succeeded.
    Settled,
    /// Mock/sandbox write succeeded; no money moved.
    Simulated,
    /// A gate rejected the attempt before any write was attempted.
    Blocked,
    /// A revocation signal terminated the attempt, before or during pause.
    Revoked,
    Aborted,
    /// The write was attempted and the connector reported failure.
    Failed,
}

impl AttemptStatus {
    /// The attempt state DAG: each status may only advance to the statuses
    /// listed here. The six variants with an empty slice are terminal.
    /// Every non-terminal status can fall through to any terminal status,
    /// so a pipeline error at any stage can always finalise the attempt
    /// with the terminal status that actually describes what happened,
    /// rather than collapsing every failure to the same outcome.
    fn allowed_next(self) -> &'static [AttemptStatus] {
        use AttemptStatus::*;
        match self {
            Started => &[Validating, Blocked, Revoked, Aborted, Failed],
            Validating => &[Approved, Blocked, Revoked, Aborted, Failed],
            Approved => &[Executing, Blocked, Revoked, Aborted, Failed],
            Executing => &[Paused, Settled, Simulated, Blocked, Revoked, Aborted, Failed],
            Paused => &[Executing, Blocked, Revoked, Aborted, Failed],
            Settled | Simulated | Blocked | Revoked | Aborted | Failed => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AttemptStatus::Settled
                | AttemptStatus::Simulated
                | AttemptStatus::Blocked
                | AttemptStatus::Revoked
                | AttemptStatus::Aborted
                | AttemptStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_id: String,
    pub envelope_id: String,
    pub action_hash: String,
    pub circle_ref: String,
    pub trace_id: String,
    pub provider_ref: String,
    pub idempotency_key: String,
    pub status: AttemptStatus,
    pub terminal: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finalised_at: Option<DateTime<Utc>>,
    pub receipt_ref: Option<String>,
}

/// Derives the idempotency key as a pure function of its four inputs —
/// envelope identity, the action being bound, which attempt is claiming it,
/// and the seal it was sealed under — so a replay of the same attempt
/// against the same sealed envelope always collapses onto the same key.
pub fn derive_idempotency_key(envelope_id: &str, action_hash: &str, attempt_id: &str, seal_hash: &str) -> String {
    hasher::content_hash(&hasher::canonicalize(&[
        Field("action_hash", action_hash.to_string()),
        Field("attempt_id", attempt_id.to_string()),
        Field("envelope_id", envelope_id.to_string()),
        Field("seal_hash", seal_hash.to_string()),
    ]))
}

/// In-memory attempt store keyed by `attempt_id`, with a secondary index
/// from idempotency key to attempt id for replay detection.
#[derive(Default)]
pub struct AttemptLedger {
    attempts: DashMap<String, AttemptRecord>,
    by_idempotency_key: DashMap<String, String>,
}

impl AttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new attempt. Fails if `attempt_id` is already known, if the
    /// idempotency key is already bound to a different attempt (a genuine
    /// conflict, not a replay), or if an attempt for this key is already
    /// in flight (non-terminal) or already completed.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &self,
        attempt_id: &str,
        envelope_id: &str,
        action_hash: &str,
        idempotency_key: &str,
        circle_ref: &str,
        trace_id: &str,
        provider_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, LedgerError> {
        if self.attempts.contains_key(attempt_id) {
            return Err(LedgerError::AttemptAlreadyExists(attempt_id.to_string()));
        }

        if let Some(existing_id) = self.by_idempotency_key.get(idempotency_key) {
            if existing_id.as_str() != attempt_id {
                return Err(LedgerError::IdempotencyKeyConflict(format!(
                    "key {idempotency_key} already bound to attempt {} (got {attempt_id})",
                    existing_id.as_str()
                )));
            }
            let existing = self.attempts.get(existing_id.as_str()).expect("index consistency");
            if existing.status.is_terminal() {
                return Err(LedgerError::TerminalReplay(envelope_id.to_string()));
            }
            return Err(LedgerError::AttemptInFlight(envelope_id.to_string()));
        }

        let record = AttemptRecord {
            attempt_id: attempt_id.to_string(),
            envelope_id: envelope_id.to_string(),
            action_hash: action_hash.to_string(),
            circle_ref: circle_ref.to_string(),
            trace_id: trace_id.to_string(),
            provider_ref: provider_ref.to_string(),
            idempotency_key: idempotency_key.to_string(),
            status: AttemptStatus::Started,
            terminal: false,
            started_at: now,
            updated_at: now,
            finalised_at: None,
            receipt_ref: None,
        };
        self.attempts.insert(attempt_id.to_string(), record.clone());
        self.by_idempotency_key
            .insert(idempotency_key.to_string(), attempt_id.to_string());
        Ok(record)
    }

    /// Advances an attempt's status, enforcing the DAG. Rejects any
    /// transition out of a terminal status or not listed as allowed.
    pub fn update_status(
        &self,
        attempt_id: &str,
        next: AttemptStatus,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, LedgerError> {
        let mut entry = self
            .attempts
            .get_mut(attempt_id)
            .ok_or_else(|| LedgerError::AttemptNotFound(attempt_id.to_string()))?;

        if entry.status.is_terminal() {
            return Err(LedgerError::AttemptTerminal(attempt_id.to_string()));
        }
        if !entry.status.allowed_next().contains(&next) {
            return Err(LedgerError::AttemptTerminal(attempt_id.to_string()));
        }
        entry.status = next;
        entry.terminal = next.is_terminal();
        entry.updated_at = now;
        Ok(entry.clone())
    }

    /// Finalises an attempt exactly once, recording the terminal status and
    /// optional receipt reference.
    pub fn finalise(
        &self,
        attempt_id: &str,
        terminal: AttemptStatus,
        receipt_ref: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AttemptRecord, LedgerError> {
        if !terminal.is_terminal() {
            return Err(LedgerError::AttemptTerminal(attempt_id.to_string()));
        }
        let mut record = self.update_status(attempt_id, terminal, now)?;
        if let Some(mut entry) = self.attempts.get_mut(attempt_id) {
            entry.finalised_at = Some(now);
            entry.receipt_ref = receipt_ref.clone();
            record = entry.clone();
        }
        Ok(record)
    }

    /// Returns the existing terminal attempt for this idempotency key, if
    /// any — used to short-circuit a replayed request with the original
    /// receipt rather than re-executing.
    pub fn check_replay(&self, idempotency_key: &str) -> Option<AttemptRecord> {
        let attempt_id = self.by_idempotency_key.get(idempotency_key)?;
        let record = self.attempts.get(attempt_id.as_str())?;
        if record.status.is_terminal() {
            Some(record.clone())
        } else {
            None
        }
    }

    /// Evicts non-terminal attempts started before `cutoff`, treating them
    /// as abandoned. Returns the evicted attempt ids.
    pub fn evict_abandoned(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let stale: Vec<String> = self
            .attempts
            .iter()
            .filter(|entry| !entry.status.is_terminal() && entry.started_at < cutoff)
            .map(|entry| entry.attempt_id.clone())
            .collect();
        for attempt_id in &stale {
            if let Some(mut entry) = self.attempts.get_mut(attempt_id) {
                entry.status = AttemptStatus::Aborted;
                entry.terminal = true;
                entry.finalised_at = Some(cutoff);
            }
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(ledger: &AttemptLedger, attempt_id: &str, idem: &str, now: DateTime<Utc>) -> Result<AttemptRecord, LedgerError> {
        ledger.start(attempt_id, "env-1", "action-hash-abc", idem, "circle-1", "trace-1", "mock-write", now)
    }

    #[test]
    fn idempotency_key_is_stable_across_repeated_derivation() {
        let a = derive_idempotency_key("env-1", "action-hash-abc", "attempt-1", "seal-abc");
        let b = derive_idempotency_key("env-1", "action-hash-abc", "attempt-1", "seal-abc");
        assert_eq!(a, b);
    }

    #[test]
    fn idempotency_key_changes_with_any_input() {
        let base = derive_idempotency_key("env-1", "action-hash-abc", "attempt-1", "seal-abc");
        assert_ne!(base, derive_idempotency_key("env-2", "action-hash-abc", "attempt-1", "seal-abc"));
        assert_ne!(base, derive_idempotency_key("env-1", "action-hash-xyz", "attempt-1", "seal-abc"));
        assert_ne!(base, derive_idempotency_key("env-1", "action-hash-abc", "attempt-2", "seal-abc"));
        assert_ne!(base, derive_idempotency_key("env-1", "action-hash-abc", "attempt-1", "seal-xyz"));
    }

    #[test]
    fn start_then_replay_with_same_key_is_in_flight() {
        let ledger = AttemptLedger::new();
        let now = Utc::now();
        start(&ledger, "attempt-1", "idem-1", now).unwrap();
        let err = start(&ledger, "attempt-2", "idem-1", now).unwrap_err();
        assert!(matches!(err, LedgerError::AttemptInFlight(_)));
    }

    #[test]
    fn starting_the_same_attempt_id_twice_is_rejected() {
        let ledger = AttemptLedger::new();
        let now = Utc::now();
        start(&ledger, "attempt-1", "idem-1", now).unwrap();
        let err = start(&ledger, "attempt-1", "idem-1", now).unwrap_err();
        assert!(matches!(err, LedgerError::AttemptAlreadyExists(_)));
    }

    #[test]
    fn same_idempotency_key_under_a_different_attempt_id_is_a_conflict() {
        let ledger = AttemptLedger::new();
        let now = Utc::now();
        start(&ledger, "attempt-1", "idem-shared", now).unwrap();
        let err = ledger
            .start("attempt-2", "env-1", "action-hash-abc", "idem-shared", "circle-1", "trace-1", "mock-write", now)
            .unwrap_err();
        assert!(matches!(err, LedgerError::IdempotencyKeyConflict(_)));
    }

    #[test]
    fn valid_transition_sequence_succeeds() {
        let ledger = AttemptLedger::new();
        let now = Utc::now();
        start(&ledger, "attempt-1", "idem-1", now).unwrap();
        ledger.update_status("attempt-1", AttemptStatus::Validating, now).unwrap();
        ledger.update_status("attempt-1", AttemptStatus::Approved, now).unwrap();
        ledger.update_status("attempt-1", AttemptStatus::Executing, now).unwrap();
        let record = ledger.finalise("attempt-1", AttemptStatus::Settled, Some("receipt-1".into()), now).unwrap();
        assert_eq!(record.status, AttemptStatus::Settled);
        assert!(record.terminal);
        assert_eq!(record.receipt_ref.as_deref(), Some("receipt-1"));
    }

    #[test]
    fn distinct_terminal_outcomes_are_each_reachable() {
        let ledger = AttemptLedger::new();
        let now = Utc::now();
        for (attempt, terminal) in [
            ("attempt-blocked", AttemptStatus::Blocked),
            ("attempt-revoked", AttemptStatus::Revoked),
            ("attempt-aborted", AttemptStatus::Aborted),
            ("attempt-failed", AttemptStatus::Failed),
            ("attempt-simulated", AttemptStatus::Simulated),
        ] {
            ledger.start(attempt, "env-1", "action-hash-abc", attempt, "circle-1", "trace-1", "mock-write", now).unwrap();
            let record = ledger.finalise(attempt, terminal, None, now).unwrap();
            assert_eq!(record.status, terminal);
        }
    }

    #[test]
    fn transition_out_of_terminal_rejected() {
        let ledger = AttemptLedger::new();
        let now = Utc::now();
        start(&ledger, "attempt-1", "idem-1", now).unwrap();
        ledger.update_status("attempt-1", AttemptStatus::Validating, now).unwrap();
        ledger.update_status("attempt-1", AttemptStatus::Failed, now).unwrap();
        let err = ledger.update_status("attempt-1", AttemptStatus::Executing, now).unwrap_err();
        assert!(matches!(err, LedgerError::AttemptTerminal(_)));
    }

    #[test]
    fn invalid_jump_rejected() {
        let ledger = AttemptLedger::new();
        let now = Utc::now();
        start(&ledger, "attempt-1", "idem-1", now).unwrap();
        let err = ledger.update_status("attempt-1", AttemptStatus::Settled, now).unwrap_err();
        assert!(matches!(err, LedgerError::AttemptTerminal(_)));
    }

    #[test]
    fn update_status_on_unknown_attempt_is_not_found() {
        let ledger = AttemptLedger::new();
        let err = ledger.update_status("no-such-attempt", AttemptStatus::Validating, Utc::now()).unwrap_err();
        assert!(matches!(err, LedgerError::AttemptNotFound(_)));
    }

    #[test]
    fn replay_after_terminal_is_detected() {
        let ledger = AttemptLedger::new();
        let now = Utc::now();
        start(&ledger, "attempt-1", "idem-1", now).unwrap();
        ledger.update_status("attempt-1", AttemptStatus::Validating, now).unwrap();
        ledger.update_status("attempt-1", AttemptStatus::Approved, now).unwrap();
        ledger.update_status("attempt-1", AttemptStatus::Executing, now).unwrap();
        ledger.finalise("attempt-1", AttemptStatus::Settled, Some("receipt-1".into()), now).unwrap();

        assert!(ledger.check_replay("idem-1").is_some());
        let err = start(&ledger, "attempt-2", "idem-1", now).unwrap_err();
        assert!(matches!(err, LedgerError::TerminalReplay(_)));
    }

    #[test]
    fn abandoned_non_terminal_attempts_are_evicted() {
        let ledger = AttemptLedger::new();
        let now = Utc::now();
        start(&ledger, "attempt-1", "idem-1", now).unwrap();
        let cutoff = now + chrono::Duration::hours(1);
        let evicted = ledger.evict_abandoned(cutoff);
        assert_eq!(evicted, vec!["attempt-1".to_string()]);
    }
}
