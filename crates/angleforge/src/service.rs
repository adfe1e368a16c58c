//! Caller-facing job operations.
//!
//! [`JobService`] is what a UI or CLI talks to. It owns submission and
//! draft edits, and delegates every status change after submission to
//! the [`Reconciler`].

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use thiserror::Error;

use crate::broadcast::JobProgressEvent;
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::template_repo::{self, MaterializedTemplate};
use crate::db::{Database, DatabaseError};
use crate::job::{Job, JobRequest, JobStatus, JobStatusView, JobUpdate};
use crate::reconciler::{ReconcileError, Reconciler};
use crate::upstream::{SubmitPayload, UpstreamError};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid job request: {0}")]
    Validation(String),

    #[error("Job {job_id} is {status}; only pending jobs can be edited")]
    NotEditable { job_id: String, status: JobStatus },

    #[error("Job {job_id} is {status} and cannot be cancelled")]
    NotCancellable { job_id: String, status: JobStatus },

    #[error("Job {0} was cancelled")]
    Cancelled(String),

    #[error("Job {0} has already been submitted")]
    AlreadySubmitted(String),

    /// The service refused or could not be reached; the draft stays pending
    /// under `draft_id` and may be resubmitted.
    #[error("Submission of job {draft_id} failed: {source}")]
    Submission {
        draft_id: String,
        #[source]
        source: UpstreamError,
    },

    #[error(transparent)]
    Reconcile(ReconcileError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl From<ReconcileError> for ServiceError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::JobNotFound(id) => ServiceError::NotFound(id),
            ReconcileError::Database(e) => ServiceError::Database(e),
            other => ServiceError::Reconcile(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Clone)]
pub struct JobService {
    reconciler: Arc<Reconciler>,
}

impl JobService {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    fn db(&self) -> &Database {
        self.reconciler.database()
    }

    fn check_layout(&self, layout_id: Option<&str>) -> Result<()> {
        if let Some(id) = layout_id {
            self.reconciler
                .layouts()
                .resolve(Some(id))
                .map_err(|e| ServiceError::Validation(e.to_string()))?;
        }
        Ok(())
    }

    /// Creates a job and submits it to the generation service.
    ///
    /// On success the returned job is keyed by its external id and has had
    /// one reconciliation attempt. On failure the job is kept as a pending
    /// draft and [`ServiceError::Submission`] names its draft key.
    pub async fn submit_job(&self, request: JobRequest) -> Result<Job> {
        request.validate().map_err(ServiceError::Validation)?;
        self.check_layout(request.layout_template_id.as_deref())?;

        let job = Job::draft(request, Utc::now());
        job_repo::insert(self.db(), &JobRow::from_job(&job)?)?;
        info!("Created draft job {} ({})", job.id, job.title);
        self.reconciler
            .progress()
            .send(JobProgressEvent::from_job(&job, "Job created"));

        self.submit_draft(job).await
    }

    /// Retries submission of a pending draft.
    pub async fn resubmit_job(&self, draft_id: &str) -> Result<Job> {
        let job = self.get_job(draft_id)?;
        if job.status != JobStatus::Pending {
            return Err(ServiceError::AlreadySubmitted(job.id));
        }
        self.submit_draft(job).await
    }

    async fn submit_draft(&self, job: Job) -> Result<Job> {
        if job.is_cancelled() {
            return Err(ServiceError::Cancelled(job.id));
        }

        let external_id = match self
            .reconciler
            .upstream()
            .submit(&SubmitPayload::from(&job))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!("Submission of job {} failed: {}", job.id, e);
                job_repo::record_submit_error(self.db(), &job.id, &e.to_string(), Utc::now())?;
                return Err(ServiceError::Submission {
                    draft_id: job.id,
                    source: e,
                });
            }
        };

        if !job_repo::mark_submitted(self.db(), &job.id, &external_id, Utc::now())? {
            // A concurrent submit, cancel or delete got there first. The
            // upstream job we just created has no local record.
            warn!(
                "Draft {} changed during submission; upstream job {} is orphaned",
                job.id, external_id
            );
            let cancelled = job_repo::find_by_id(self.db(), &job.id)?
                .map(JobRow::into_job)
                .is_some_and(|draft| draft.is_cancelled());
            return Err(if cancelled {
                ServiceError::Cancelled(job.id)
            } else {
                ServiceError::AlreadySubmitted(job.id)
            });
        }
        info!("Job {} submitted as {}", job.id, external_id);
        self.reconciler
            .progress()
            .send(JobProgressEvent::submitted(&job.id, &external_id));

        if let Err(e) = self.reconciler.reconcile(&external_id).await {
            warn!("Initial reconciliation of job {} failed: {}", external_id, e);
        }
        self.get_job(&external_id)
    }

    /// Returns the last durably known status, after one reconciliation
    /// attempt for jobs still processing. Errors from that attempt are
    /// logged, not returned.
    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatusView> {
        let job = self.get_job(job_id)?;
        if job.status == JobStatus::Processing && !job.is_cancelled() {
            if let Err(e) = self.reconciler.reconcile(job_id).await {
                warn!("Reconciliation of job {} failed: {}", job_id, e);
            }
        }
        let job = self.get_job(job_id)?;
        Ok(JobStatusView::from(&job))
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        job_repo::find_by_id(self.db(), job_id)?
            .map(JobRow::into_job)
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))
    }

    /// Jobs matching `filter`, newest first, plus the total match count.
    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<Job>, u64)> {
        let (rows, total) = job_repo::query(self.db(), filter)?;
        Ok((rows.into_iter().map(JobRow::into_job).collect(), total))
    }

    pub fn list_materialized_templates(&self, job_id: &str) -> Result<Vec<MaterializedTemplate>> {
        self.get_job(job_id)?;
        Ok(template_repo::list_for_job(self.db(), job_id)?)
    }

    /// Edits the descriptive fields of a job that has not been submitted.
    pub fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<Job> {
        let mut job = self.get_job(job_id)?;
        if job.status != JobStatus::Pending {
            return Err(ServiceError::NotEditable {
                job_id: job.id,
                status: job.status,
            });
        }

        update.apply(&mut job);
        request_of(&job).validate().map_err(ServiceError::Validation)?;
        self.check_layout(job.layout_template_id.as_deref())?;
        job.updated_at = Utc::now();

        if !job_repo::update_draft(self.db(), &JobRow::from_job(&job)?)? {
            // Submitted between the read and the write
            let current = self.get_job(job_id)?;
            return Err(ServiceError::NotEditable {
                job_id: current.id,
                status: current.status,
            });
        }
        self.get_job(job_id)
    }

    /// Stops further reconciliation of a pending or processing job. The
    /// generation service is not told.
    pub fn cancel_job(&self, job_id: &str) -> Result<Job> {
        let job = self.get_job(job_id)?;
        if !job_repo::cancel(self.db(), job_id, Utc::now())? {
            return Err(ServiceError::NotCancellable {
                job_id: job.id,
                status: job.status,
            });
        }
        info!("Job {} cancelled", job_id);

        let job = self.get_job(job_id)?;
        self.reconciler
            .progress()
            .send(JobProgressEvent::from_job(&job, "Job cancelled"));
        Ok(job)
    }

    /// Deletes a job with its stored result and templates. Credit events
    /// are kept.
    pub fn delete_job(&self, job_id: &str) -> Result<()> {
        if !job_repo::delete(self.db(), job_id)? {
            return Err(ServiceError::NotFound(job_id.to_string()));
        }
        info!("Job {} deleted", job_id);
        Ok(())
    }

    /// Rebuilds a job's templates from its stored result, optionally with a
    /// different layout.
    pub async fn rematerialize_job(
        &self,
        job_id: &str,
        layout_id: Option<&str>,
    ) -> Result<Vec<MaterializedTemplate>> {
        self.check_layout(layout_id)?;
        Ok(self.reconciler.rematerialize(job_id, layout_id).await?)
    }
}

fn request_of(job: &Job) -> JobRequest {
    JobRequest {
        title: job.title.clone(),
        brief: job.brief.clone(),
        source_url: job.source_url.clone(),
        target_approach: job.target_approach,
        avatars: job.avatars.clone(),
        job_type: Some(job.job_type.clone()),
        layout_template_id: job.layout_template_id.clone(),
    }
}
