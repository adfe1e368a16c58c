//! Metered credit accounting for completed jobs.
//!
//! A completed job is charged at most once. The local `credit_events`
//! table is the source of truth; the external [`CreditLedger`] is fed from
//! it as an outbox and may lag behind.

mod ledger;

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use log::{debug, info, warn};

use crate::config::BillingConfig;
use crate::db::credit_repo::{self, CreditEvent, InsertOutcome};
use crate::db::{Database, DatabaseError};
use crate::job::Job;

pub use ledger::{CreditLedger, LedgerError, LogLedger, UsageEvent};

/// Credits per job type, read from configuration.
#[derive(Debug, Clone)]
pub struct CreditPolicy {
    config: BillingConfig,
}

impl CreditPolicy {
    pub fn new(config: BillingConfig) -> Self {
        Self { config }
    }

    pub fn credits_for(&self, job_type: &str) -> u32 {
        self.config
            .credits_by_job_type
            .get(job_type)
            .copied()
            .unwrap_or(self.config.default_credits)
    }

    /// Whether charging `credits` on top of `used` exceeds the period's
    /// included allowance.
    pub fn is_overage(&self, used: u64, credits: u32) -> bool {
        self.config
            .included_credits_per_period
            .is_some_and(|included| used + u64::from(credits) > included)
    }
}

impl Default for CreditPolicy {
    fn default() -> Self {
        Self::new(BillingConfig::default())
    }
}

/// First day of the UTC month containing `now`.
pub fn billing_period_start(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive().with_day(1).unwrap_or_else(|| now.date_naive())
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChargeOutcome {
    Charged(CreditEvent),
    /// An event already existed for the job; nothing was written.
    AlreadyCharged,
}

/// Records credit events and forwards them to the ledger.
#[derive(Clone)]
pub struct Biller {
    db: Database,
    policy: CreditPolicy,
    ledger: Arc<dyn CreditLedger>,
}

impl Biller {
    pub fn new(db: Database, policy: CreditPolicy, ledger: Arc<dyn CreditLedger>) -> Self {
        Self { db, policy, ledger }
    }

    /// Charges a completed job unless it has been charged before.
    ///
    /// The existence check runs first; the unique constraint on `job_id`
    /// settles any race that slips past it, and the loser reports
    /// `AlreadyCharged`.
    pub async fn charge_once(
        &self,
        job: &Job,
        now: DateTime<Utc>,
    ) -> Result<ChargeOutcome, DatabaseError> {
        if credit_repo::find_by_job(&self.db, &job.id)?.is_some() {
            debug!("Job {} already has a credit event", job.id);
            return Ok(ChargeOutcome::AlreadyCharged);
        }

        let credits = self.policy.credits_for(&job.job_type);
        let period = billing_period_start(now).format("%Y-%m-%d").to_string();
        let used = credit_repo::credits_in_period(&self.db, &period)?;
        let event = CreditEvent {
            job_id: job.id.clone(),
            job_type: job.job_type.clone(),
            credits,
            billing_period_start: period,
            is_overage: self.policy.is_overage(used, credits),
            created_at: now,
            reported_at: None,
        };

        match credit_repo::insert_unique(&self.db, &event)? {
            InsertOutcome::AlreadyRecorded => {
                debug!("Lost credit insert race for job {}", job.id);
                Ok(ChargeOutcome::AlreadyCharged)
            }
            InsertOutcome::Inserted => {
                info!(
                    "Charged {} credit(s) for job {} (type {}, overage: {})",
                    event.credits, event.job_id, event.job_type, event.is_overage
                );
                self.forward(&event).await?;
                Ok(ChargeOutcome::Charged(event))
            }
        }
    }

    /// Sends one event to the ledger. A ledger failure is logged and the
    /// event stays unreported for the next flush.
    async fn forward(&self, event: &CreditEvent) -> Result<bool, DatabaseError> {
        match self.ledger.record_usage(&UsageEvent::from(event)).await {
            Ok(()) => {
                credit_repo::mark_reported(&self.db, &event.job_id, Utc::now())?;
                Ok(true)
            }
            Err(e) => {
                warn!(
                    "Credit ledger did not accept usage for job {}: {}",
                    event.job_id, e
                );
                Ok(false)
            }
        }
    }

    /// Retries delivery of events the ledger has not acknowledged. Returns
    /// how many were delivered.
    pub async fn flush_unreported(&self, limit: u32) -> Result<usize, DatabaseError> {
        let pending = credit_repo::list_unreported(&self.db, limit)?;
        let mut delivered = 0;
        for event in &pending {
            if self.forward(event).await? {
                delivered += 1;
            }
        }
        if !pending.is_empty() {
            info!(
                "Ledger flush delivered {}/{} pending credit event(s)",
                delivered,
                pending.len()
            );
        }
        Ok(delivered)
    }
}
