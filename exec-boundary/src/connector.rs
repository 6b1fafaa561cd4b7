//! C12 — Write Connector. The only component permitted to touch an
//! external provider. `prepare`/`execute`/`abort` per spec.md §4.12.

use async_trait::async_trait;
use dashmap::DashMap;

use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedWrite {
    pub envelope_id: String,
    pub idempotency_key: String,
    pub provider_ref: String,
    pub payee_ref: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    Pending,
    Executing,
    Succeeded,
    Failed,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub receipt_id: String,
    pub idempotency_key: String,
    pub provider_ref: String,
    pub status: ReceiptStatus,
    pub amount: i64,
    pub currency: String,
    pub payee: String,
    pub simulated: bool,
    pub money_moved: bool,
    pub error: Option<String>,
}

/// A connector is the single seam through which money actually moves.
/// `prepare` must be side-effect-free; `execute` is the only call allowed
/// to move money, and must be idempotent on `idempotency_key`. `abort` is
/// best-effort and must make a subsequent `execute` for the same envelope
/// fail with `ExecutionAborted`; `is_aborted` is the synchronous query the
/// executor's gate 3 consults before doing anything else.
#[async_trait]
pub trait WriteConnector: Send + Sync {
    async fn prepare(&self, write: &PreparedWrite) -> Result<(), ProviderError>;
    async fn execute(&self, write: &PreparedWrite) -> Result<WriteReceipt, ProviderError>;
    async fn abort(&self, envelope_id: &str) -> Result<bool, ProviderError>;
    fn is_aborted(&self, envelope_id: &str) -> bool;
}

/// Reference connector used by tests and the demo router. Never moves
/// money — every receipt is stamped `simulated: true, money_moved: false`.
/// The executor's guardrail panics if any connector ever returns otherwise
/// for a sandbox-scoped provider.
#[derive(Default)]
pub struct MockConnector {
    receipts: DashMap<String, WriteReceipt>,
    aborted: DashMap<String, ()>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WriteConnector for MockConnector {
    async fn prepare(&self, write: &PreparedWrite) -> Result<(), ProviderError> {
        if write.amount <= 0 {
            return Err(ProviderError::PrepareInvalid("amount must be positive".into()));
        }
        if self.aborted.contains_key(&write.envelope_id) {
            return Err(ProviderError::ExecutionAborted);
        }
        Ok(())
    }

    async fn execute(&self, write: &PreparedWrite) -> Result<WriteReceipt, ProviderError> {
        if self.aborted.contains_key(&write.envelope_id) {
            return Err(ProviderError::ExecutionAborted);
        }
        if let Some(existing) = self.receipts.get(&write.idempotency_key) {
            return Ok(existing.clone());
        }
        let receipt = WriteReceipt {
            receipt_id: format!("receipt-{}", write.idempotency_key),
            idempotency_key: write.idempotency_key.clone(),
            provider_ref: write.provider_ref.clone(),
            status: ReceiptStatus::Simulated,
            amount: write.amount,
            currency: write.currency.clone(),
            payee: write.payee_ref.clone(),
            simulated: true,
            money_moved: false,
            error: None,
        };
        self.receipts.insert(write.idempotency_key.clone(), receipt.clone());
        Ok(receipt)
    }

    async fn abort(&self, envelope_id: &str) -> Result<bool, ProviderError> {
        self.aborted.insert(envelope_id.to_string(), ());
        Ok(true)
    }

    fn is_aborted(&self, envelope_id: &str) -> bool {
        self.aborted.contains_key(envelope_id)
    }
}
