//! C3 — Policy Snapshot. Immutable once hashed; sorts allow-lists before
//! computing its canonical hash (spec.md §3, §4.3).

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use crate::errors::PolicyViewError;
use crate::hasher::{self, Field};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySnapshot {
    pub id: String,
    pub owner_ref: String,
    pub captured_at: DateTime<Utc>,
    pub write_enabled: bool,
    pub allowed_providers: BTreeSet<String>,
    pub allowed_payees: BTreeSet<String>,
    pub require_explicit_approval: bool,
    pub max_staleness: Duration,
    pub dry_run: bool,
    pub hash: String,
}

pub struct PolicyParams {
    pub id: String,
    pub owner_ref: String,
    pub write_enabled: bool,
    pub allowed_providers: BTreeSet<String>,
    pub allowed_payees: BTreeSet<String>,
    pub require_explicit_approval: bool,
    pub max_staleness: Duration,
    pub dry_run: bool,
}

impl PolicySnapshot {
    /// Construct and hash a policy snapshot. Allow-lists are `BTreeSet`s so
    /// they are sorted by construction; the hash is computed over that
    /// sorted form.
    pub fn build(params: PolicyParams, now: DateTime<Utc>) -> Self {
        let fields = vec![
            Field("allowed_payees", hasher::render_sorted(params.allowed_payees.iter().cloned())),
            Field(
                "allowed_providers",
                hasher::render_sorted(params.allowed_providers.iter().cloned()),
            ),
            Field("captured_at", hasher::render_time(now)),
            Field("dry_run", hasher::render_bool(params.dry_run)),
            Field("id", params.id.clone()),
            Field("max_staleness_s", hasher::render_i64(params.max_staleness.as_secs() as i64)),
            Field("owner_ref", params.owner_ref.clone()),
            Field(
                "require_explicit_approval",
                hasher::render_bool(params.require_explicit_approval),
            ),
            Field("write_enabled", hasher::render_bool(params.write_enabled)),
        ];
        let hash = hasher::content_hash(&hasher::canonicalize(&fields));

        Self {
            id: params.id,
            owner_ref: params.owner_ref,
            captured_at: now,
            write_enabled: params.write_enabled,
            allowed_providers: params.allowed_providers,
            allowed_payees: params.allowed_payees,
            require_explicit_approval: params.require_explicit_approval,
            max_staleness: params.max_staleness,
            dry_run: params.dry_run,
            hash,
        }
    }

    pub fn is_provider_allowed(&self, provider_ref: &str) -> bool {
        self.allowed_providers.contains(provider_ref)
    }

    pub fn is_payee_allowed(&self, payee_ref: &str) -> bool {
        self.allowed_payees.contains(payee_ref)
    }

    pub fn max_staleness(&self) -> Duration {
        self.max_staleness
    }
}

/// Compares a stored hash against a freshly recomputed one; mismatch is
/// `PolicyDrift`, never conflated with staleness.
pub fn verify_policy_hash(stored: &PolicySnapshot, live: &PolicySnapshot) -> Result<(), PolicyViewError> {
    if stored.hash == live.hash {
        Ok(())
    } else {
        Err(PolicyViewError::PolicyDrift {
            expected_prefix: stored.hash.chars().take(12).collect(),
            actual_prefix: live.hash.chars().take(12).collect(),
        })
    }
}
