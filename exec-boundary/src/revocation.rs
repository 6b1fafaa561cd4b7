//! C10 — Revocation Checker. Envelope-keyed revocation signals, checked at
//! every gate and polled during the forced pause (spec.md §4.10).

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use serde::{Deserialize, Serialize};

use crate::errors::RevocationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationSignal {
    pub revoker_circle_ref: String,
    pub revoker_id: String,
    pub reason: String,
    pub revoked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationState {
    Active,
    Revoked,
}

/// In-memory revocation store keyed by `envelope_id`. A signal, once
/// recorded, can never be cleared — revocation is a one-way transition.
#[derive(Default)]
pub struct RevocationChecker {
    signals: DashMap<String, RevocationSignal>,
}

impl RevocationChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a revocation. Idempotent: a second signal for the same
    /// envelope is ignored, the first signal always wins.
    pub fn revoke(
        &self,
        envelope_id: &str,
        revoker_circle_ref: &str,
        revoker_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        self.signals.entry(envelope_id.to_string()).or_insert(RevocationSignal {
            revoker_circle_ref: revoker_circle_ref.to_string(),
            revoker_id: revoker_id.to_string(),
            reason: reason.to_string(),
            revoked_at: now,
        });
    }

    pub fn state(&self, envelope_id: &str) -> RevocationState {
        if self.signals.contains_key(envelope_id) {
            RevocationState::Revoked
        } else {
            RevocationState::Active
        }
    }

    pub fn signal(&self, envelope_id: &str) -> Option<RevocationSignal> {
        self.signals.get(envelope_id).map(|r| r.clone())
    }

    /// Returns `Err` if the envelope has been revoked. Callers pass
    /// `during_pause` so the forced-pause poll loop can distinguish a
    /// pre-pause revocation from one observed mid-pause.
    pub fn check(&self, envelope_id: &str, during_pause: bool) -> Result<(), RevocationError> {
        match self.signal(envelope_id) {
            Some(signal) if during_pause => {
                Err(RevocationError::RevokedDuringPause(signal.reason))
            }
            Some(signal) => Err(RevocationError::Revoked(signal.reason)),
            None => Ok(()),
        }
    }
}
