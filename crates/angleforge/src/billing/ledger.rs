//! Boundary to the external credit ledger.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::db::credit_repo::CreditEvent;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Credit ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Credit ledger rejected usage: {0}")]
    Rejected(String),
}

/// What the ledger is told about one charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageEvent {
    pub job_id: String,
    pub job_type: String,
    pub credits: u32,
    pub is_overage: bool,
}

impl From<&CreditEvent> for UsageEvent {
    fn from(event: &CreditEvent) -> Self {
        Self {
            job_id: event.job_id.clone(),
            job_type: event.job_type.clone(),
            credits: event.credits,
            is_overage: event.is_overage,
        }
    }
}

/// Accepts usage events. Implementations are expected to be idempotent per
/// `job_id`, since an event may be delivered again after a lost
/// acknowledgement.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    async fn record_usage(&self, event: &UsageEvent) -> Result<(), LedgerError>;
}

/// Ledger that only writes usage to the log. Used when no external ledger
/// is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLedger;

#[async_trait]
impl CreditLedger for LogLedger {
    async fn record_usage(&self, event: &UsageEvent) -> Result<(), LedgerError> {
        tracing::info!(
            job_id = %event.job_id,
            job_type = %event.job_type,
            credits = event.credits,
            overage = event.is_overage,
            "usage recorded"
        );
        Ok(())
    }
}
