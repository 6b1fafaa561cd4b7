//! C4 — View Snapshot & Freshness.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use crate::errors::PolicyViewError;
use crate::hasher::{self, Field};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewSnapshot {
    pub id: String,
    pub captured_at: DateTime<Utc>,
    pub circle_ref: String,
    pub intersection_ref: Option<String>,
    pub payee_ref: String,
    pub provider_ref: String,
    pub currency: String,
    pub amount: i64,
    pub payee_allowed: bool,
    pub provider_allowed: bool,
    pub account_visibility: Vec<String>,
    pub shared_view_hash: String,
    pub balance_ok: bool,
    /// Audit-only free text; deliberately excluded from the hash.
    pub notes: Option<String>,
    pub hash: String,
}

pub struct ViewParams {
    pub id: String,
    pub circle_ref: String,
    pub intersection_ref: Option<String>,
    pub payee_ref: String,
    pub provider_ref: String,
    pub currency: String,
    pub amount: i64,
    pub payee_allowed: bool,
    pub provider_allowed: bool,
    pub account_visibility: Vec<String>,
    pub shared_view_hash: String,
    pub balance_ok: bool,
    pub notes: Option<String>,
}

impl ViewSnapshot {
    pub fn build(params: ViewParams, now: DateTime<Utc>) -> Self {
        let mut visibility = params.account_visibility.clone();
        visibility.sort();

        let fields = vec![
            Field("account_visibility", hasher::render_sorted(visibility.iter().cloned())),
            Field("amount", hasher::render_i64(params.amount)),
            Field("balance_ok", hasher::render_bool(params.balance_ok)),
            Field("captured_at", hasher::render_time(now)),
            Field("circle_ref", params.circle_ref.clone()),
            Field("currency", params.currency.clone()),
            Field("id", params.id.clone()),
            Field(
                "intersection_ref",
                params.intersection_ref.clone().unwrap_or_default(),
            ),
            Field("payee_allowed", hasher::render_bool(params.payee_allowed)),
            Field("payee_ref", params.payee_ref.clone()),
            Field("provider_allowed", hasher::render_bool(params.provider_allowed)),
            Field("provider_ref", params.provider_ref.clone()),
            Field("shared_view_hash", params.shared_view_hash.clone()),
        ];
        let hash = hasher::content_hash(&hasher::canonicalize(&fields));

        Self {
            id: params.id,
            captured_at: now,
            circle_ref: params.circle_ref,
            intersection_ref: params.intersection_ref,
            payee_ref: params.payee_ref,
            provider_ref: params.provider_ref,
            currency: params.currency,
            amount: params.amount,
            payee_allowed: params.payee_allowed,
            provider_allowed: params.provider_allowed,
            account_visibility: visibility,
            shared_view_hash: params.shared_view_hash,
            balance_ok: params.balance_ok,
            notes: params.notes,
            hash,
        }
    }
}

/// External read-side collaborator (spec.md §6). Must use the provided
/// clock and must be side-effect-free.
#[async_trait]
pub trait ViewProvider: Send + Sync {
    async fn get_view(
        &self,
        circle_ref: &str,
        intersection_ref: Option<&str>,
        payee_ref: &str,
        currency: &str,
        amount: i64,
        provider_ref: &str,
        clock: &dyn crate::clock::Clock,
        trace_id: &str,
    ) -> ViewSnapshot;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreshnessCheck {
    Fresh,
    Stale { staleness_ms: i64, max_ms: i64 },
}

/// `check-freshness(snapshot, now, max-staleness)`.
pub fn check_freshness(
    snapshot: &ViewSnapshot,
    now: DateTime<Utc>,
    max_staleness: Duration,
) -> FreshnessCheck {
    let staleness_ms = (now - snapshot.captured_at).num_milliseconds().max(0);
    let max_ms = max_staleness.as_millis() as i64;
    if staleness_ms <= max_ms {
        FreshnessCheck::Fresh
    } else {
        FreshnessCheck::Stale { staleness_ms, max_ms }
    }
}

/// `verify-hash(expected, actual)`. Always a distinct error from staleness.
pub fn verify_view_hash(expected: &str, actual: &str) -> Result<(), PolicyViewError> {
    if expected == actual {
        Ok(())
    } else {
        Err(PolicyViewError::ViewDrift {
            expected_prefix: expected.chars().take(12).collect(),
            actual_prefix: actual.chars().take(12).collect(),
        })
    }
}

/// Reference-only `ViewProvider` fixture: returns whatever the caller seeds
/// it with. Not a production policy/view service — see SPEC_FULL.md §6.
pub struct StaticViewProvider {
    pub fixed: ViewSnapshot,
}

#[async_trait]
impl ViewProvider for StaticViewProvider {
    async fn get_view(
        &self,
        _circle_ref: &str,
        _intersection_ref: Option<&str>,
        _payee_ref: &str,
        _currency: &str,
        _amount: i64,
        _provider_ref: &str,
        _clock: &dyn crate::clock::Clock,
        _trace_id: &str,
    ) -> ViewSnapshot {
        self.fixed.clone()
    }
}
