//! Enumerated configuration (spec.md §6), modelled the way the teacher
//! shapes `EconomicsConfig` / `ReceiptConfig`: a plain struct with a
//! `Default` impl that pins the spec's documented defaults.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub cap_amount: i64,
    pub allowed_currencies: BTreeSet<String>,
    pub forced_pause_duration: Duration,
    pub forced_pause_poll_interval: Duration,
    pub require_explicit_approval: bool,
    pub max_view_staleness: Duration,
    pub presentation_expiry: Duration,
    pub sandbox_only: bool,
    pub approval_expiry_default: Duration,
    pub mock_first_when_unconfigured: bool,
}

impl Default for Config {
    fn default() -> Self {
        let mut allowed_currencies = BTreeSet::new();
        allowed_currencies.insert("GBP".to_string());

        Self {
            cap_amount: 100,
            allowed_currencies,
            forced_pause_duration: Duration::from_secs(2),
            forced_pause_poll_interval: Duration::from_millis(100),
            require_explicit_approval: true,
            max_view_staleness: Duration::from_secs(5 * 60),
            presentation_expiry: Duration::from_secs(5 * 60),
            sandbox_only: true,
            approval_expiry_default: Duration::from_secs(5 * 60),
            mock_first_when_unconfigured: true,
        }
    }
}
