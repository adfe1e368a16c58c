//! One sweep: reconcile every processing job, surface stuck ones, and
//! settle billing.

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use log::{error, info, warn};
use serde::Serialize;
use tracing::Instrument;

use super::{ReconcileError, ReconcileOutcome, Reconciler};
use crate::billing::ChargeOutcome;
use crate::db::job_repo;

/// Upper bound on `stuck_after` so the cutoff never overflows.
const MAX_STUCK_AFTER_SECS: u64 = 10 * 365 * 24 * 3600;

/// Unreported credit events handed to the ledger per sweep.
const LEDGER_FLUSH_BATCH: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped: usize,
    /// Attempts that returned an error; those jobs stay processing.
    pub errors: usize,
    /// Processing jobs older than the stuck threshold.
    pub stuck: Vec<String>,
    /// Completed jobs charged by this sweep rather than by their own
    /// reconciliation.
    pub backfilled: usize,
    pub ledger_delivered: usize,
}

impl Reconciler {
    /// Reconciles all processing jobs, at most `concurrency` at a time.
    pub async fn sweep(
        &self,
        concurrency: usize,
        stuck_after_secs: u64,
    ) -> Result<SweepReport, ReconcileError> {
        let span = tracing::info_span!("sweep");
        self.sweep_inner(concurrency, stuck_after_secs)
            .instrument(span)
            .await
    }

    async fn sweep_inner(
        &self,
        concurrency: usize,
        stuck_after_secs: u64,
    ) -> Result<SweepReport, ReconcileError> {
        let mut report = SweepReport::default();

        let cutoff = Utc::now()
            - chrono::Duration::seconds(stuck_after_secs.min(MAX_STUCK_AFTER_SECS) as i64);
        for row in job_repo::list_stuck(&self.db, cutoff)? {
            warn!(
                "Job {} has been processing since {} (progress {}%)",
                row.id, row.created_at, row.progress
            );
            report.stuck.push(row.id);
        }

        let ids = job_repo::list_reconcilable(&self.db)?;
        report.examined = ids.len();

        let results: Vec<_> = stream::iter(ids)
            .map(|id| async move {
                let result = self.reconcile(&id).await;
                (id, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        for (id, result) in results {
            match result {
                Ok(ReconcileOutcome::InProgress { .. }) => report.in_progress += 1,
                Ok(ReconcileOutcome::Completed { .. }) => report.completed += 1,
                Ok(ReconcileOutcome::Failed { .. }) => report.failed += 1,
                Ok(ReconcileOutcome::Deferred { .. }) => report.deferred += 1,
                Ok(ReconcileOutcome::Skipped { .. }) => report.skipped += 1,
                Err(e) => {
                    error!("Reconciliation of job {} failed: {}", id, e);
                    report.errors += 1;
                }
            }
        }

        let now = Utc::now();
        for row in job_repo::list_unbilled_completed(&self.db)? {
            let job = row.into_job();
            if let ChargeOutcome::Charged(_) = self.biller.charge_once(&job, now).await? {
                report.backfilled += 1;
            }
        }

        report.ledger_delivered = self.biller.flush_unreported(LEDGER_FLUSH_BATCH).await?;

        info!(
            "Sweep: {} examined, {} completed, {} failed, {} deferred, {} errors, {} stuck",
            report.examined,
            report.completed,
            report.failed,
            report.deferred,
            report.errors,
            report.stuck.len()
        );
        Ok(report)
    }
}
