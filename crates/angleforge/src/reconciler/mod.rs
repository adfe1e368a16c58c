//! Job reconciler: drives a submitted job to a terminal state.
//!
//! [`Reconciler::reconcile`] is the single transition function, shared by
//! the periodic sweep and on-demand status checks. It takes no lock:
//! every write it makes is idempotent or guarded in SQL, so concurrent
//! attempts on the same job converge.

mod scheduler;
mod sweep;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;

use crate::billing::Biller;
use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::db::job_repo;
use crate::db::result_repo::{self, ResultEnvelope};
use crate::db::template_repo::{self, MaterializedTemplate};
use crate::db::{Database, DatabaseError};
use crate::extract::{extract, ContentVariant, ExtractionError};
use crate::inject::{InjectionError, LayoutRegistry, TemplateInjector};
use crate::job::{Job, JobStatus, NO_VARIANTS_NOTE};
use crate::upstream::{GenerationService, UpstreamStatus};

pub use scheduler::{SweepScheduler, SweepSettings};
pub use sweep::SweepReport;

/// Progress recorded while the service has accepted but not started a job.
pub const PROGRESS_SUBMITTED: u8 = 25;
/// Progress recorded while the service is working on a job.
pub const PROGRESS_RUNNING: u8 = 50;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Rendering failed; the job stays processing and is retried.
    #[error("Materialization failed: {0}")]
    Injection(#[from] InjectionError),

    #[error("Stored result cannot be parsed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Job {job_id} has no stored result")]
    NoResult { job_id: String },

    #[error("Job {job_id} is {status} and cannot be re-materialized")]
    NotMaterializable { job_id: String, status: JobStatus },
}

/// Why an attempt did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Still a draft; submission is the caller's job.
    NotSubmitted,
    Cancelled,
    /// Already completed or failed.
    Terminal,
}

/// Result of one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Skipped { reason: SkipReason },
    /// The service could not be asked; nothing was written.
    Deferred { reason: String },
    InProgress { progress: u8 },
    Completed { templates: usize },
    Failed { reason: String },
}

pub struct Reconciler {
    db: Database,
    upstream: Arc<dyn GenerationService>,
    layouts: Arc<LayoutRegistry>,
    injector: TemplateInjector,
    biller: Biller,
    progress: JobProgressBroadcaster,
}

impl Reconciler {
    pub fn new(
        db: Database,
        upstream: Arc<dyn GenerationService>,
        layouts: Arc<LayoutRegistry>,
        injector: TemplateInjector,
        biller: Biller,
        progress: JobProgressBroadcaster,
    ) -> Self {
        Self {
            db,
            upstream,
            layouts,
            injector,
            biller,
            progress,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn upstream(&self) -> &Arc<dyn GenerationService> {
        &self.upstream
    }

    pub fn progress(&self) -> &JobProgressBroadcaster {
        &self.progress
    }

    pub fn layouts(&self) -> &LayoutRegistry {
        &self.layouts
    }

    fn load(&self, job_id: &str) -> Result<Job, ReconcileError> {
        job_repo::find_by_id(&self.db, job_id)?
            .map(|row| row.into_job())
            .ok_or_else(|| ReconcileError::JobNotFound(job_id.to_string()))
    }

    /// Makes one attempt to advance `job_id` towards a terminal state.
    pub async fn reconcile(&self, job_id: &str) -> Result<ReconcileOutcome, ReconcileError> {
        self.reconcile_with_layout(job_id, None).await
    }

    /// As [`Reconciler::reconcile`], rendering with `switch_layout` instead
    /// of the job's own layout. The switch is persisted only together with
    /// the templates it produced.
    async fn reconcile_with_layout(
        &self,
        job_id: &str,
        switch_layout: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let span = tracing::info_span!("reconcile", job_id = %job_id);
        self.reconcile_inner(job_id, switch_layout)
            .instrument(span)
            .await
    }

    async fn reconcile_inner(
        &self,
        job_id: &str,
        switch_layout: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let job = self.load(job_id)?;

        if job.is_cancelled() {
            return Ok(ReconcileOutcome::Skipped {
                reason: SkipReason::Cancelled,
            });
        }
        match job.status {
            JobStatus::Pending => {
                return Ok(ReconcileOutcome::Skipped {
                    reason: SkipReason::NotSubmitted,
                })
            }
            JobStatus::Completed | JobStatus::Failed => {
                return Ok(ReconcileOutcome::Skipped {
                    reason: SkipReason::Terminal,
                })
            }
            JobStatus::Processing => {}
        }

        // A stored envelope means the service already reported success and
        // only materialization is left to retry.
        if let Some(envelope) = result_repo::find(&self.db, &job.id)? {
            debug!("Job {} has a stored result, resuming materialization", job.id);
            return self
                .materialize(&job, envelope.raw_payload, switch_layout)
                .await;
        }

        let status = match self.upstream.poll_status(&job.id).await {
            Ok(status) => status,
            Err(e) => {
                // Whatever went wrong, the job itself is unaffected.
                warn!("Status check for job {} deferred: {}", job.id, e);
                return Ok(ReconcileOutcome::Deferred {
                    reason: e.to_string(),
                });
            }
        };
        debug!("Job {} upstream status {}", job.id, status);

        match status {
            UpstreamStatus::Submitted | UpstreamStatus::Pending => {
                self.advance(&job, PROGRESS_SUBMITTED)
            }
            UpstreamStatus::Running => self.advance(&job, PROGRESS_RUNNING),
            UpstreamStatus::Succeeded => self.fetch_and_materialize(&job, switch_layout).await,
            UpstreamStatus::Failed => self.fail(&job, "generation service reported FAILED"),
            UpstreamStatus::Unrecognized(raw) => self.fail(
                &job,
                &format!("generation service reported unrecognized status '{}'", raw),
            ),
        }
    }

    fn advance(&self, job: &Job, progress: u8) -> Result<ReconcileOutcome, ReconcileError> {
        let now = Utc::now();
        if job_repo::advance(&self.db, &job.id, JobStatus::Processing, progress, now)? {
            self.progress.send(JobProgressEvent::progressed(
                &job.id,
                JobStatus::Processing,
                progress,
            ));
            return Ok(ReconcileOutcome::InProgress { progress });
        }
        self.current_outcome(&job.id)
    }

    fn fail(&self, job: &Job, reason: &str) -> Result<ReconcileOutcome, ReconcileError> {
        if job_repo::fail(&self.db, &job.id, reason, Utc::now())? {
            warn!("Job {} failed: {}", job.id, reason);
            self.progress
                .send(JobProgressEvent::failed(&job.id, job.progress, reason));
            return Ok(ReconcileOutcome::Failed {
                reason: reason.to_string(),
            });
        }
        self.current_outcome(&job.id)
    }

    /// Outcome describing the job as stored, for attempts whose own write
    /// was superseded by a concurrent one.
    fn current_outcome(&self, job_id: &str) -> Result<ReconcileOutcome, ReconcileError> {
        let job = self.load(job_id)?;
        Ok(match job.status {
            JobStatus::Completed => ReconcileOutcome::Completed {
                templates: template_repo::count_for_job(&self.db, job_id)? as usize,
            },
            JobStatus::Failed => ReconcileOutcome::Failed {
                reason: job.error.unwrap_or_default(),
            },
            JobStatus::Processing | JobStatus::Pending => ReconcileOutcome::InProgress {
                progress: job.progress,
            },
        })
    }

    async fn fetch_and_materialize(
        &self,
        job: &Job,
        switch_layout: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let raw = match self.upstream.fetch_result(&job.id).await {
            Ok(raw) => raw,
            Err(e) if e.is_transient() => {
                warn!("Result fetch for job {} deferred: {}", job.id, e);
                return Ok(ReconcileOutcome::Deferred {
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                return self.fail(job, &format!("result unavailable after success: {}", e));
            }
        };

        result_repo::upsert(
            &self.db,
            &ResultEnvelope {
                job_id: job.id.clone(),
                raw_payload: raw.clone(),
                received_at: Utc::now(),
            },
        )?;

        self.materialize(job, raw, switch_layout).await
    }

    /// Extracts, renders and stores the templates, then completes and
    /// charges the job. Any rendering or storage error leaves the job
    /// processing.
    async fn materialize(
        &self,
        job: &Job,
        raw: String,
        switch_layout: Option<&str>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let variants = match extract(&raw) {
            Ok(variants) => variants,
            Err(e) => return self.fail(job, &format!("result payload malformed: {}", e)),
        };

        let now = Utc::now();
        let layout_id = switch_layout.or(job.layout_template_id.as_deref());
        let templates = self.render(job, &variants, layout_id, now)?;
        template_repo::replace_all(&self.db, &job.id, &templates, switch_layout)?;

        let note = templates.is_empty().then_some(NO_VARIANTS_NOTE);
        if job_repo::complete(&self.db, &job.id, note, now)? {
            info!(
                "Job {} completed with {} template(s)",
                job.id,
                templates.len()
            );
            self.progress
                .send(JobProgressEvent::completed(&job.id, templates.len()));
        }

        let current = self.load(&job.id)?;
        if current.status == JobStatus::Completed {
            self.biller.charge_once(&current, now).await?;
        }
        self.current_outcome(&job.id)
    }

    fn render(
        &self,
        job: &Job,
        variants: &[ContentVariant],
        layout_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<MaterializedTemplate>, ReconcileError> {
        if variants.is_empty() {
            return Ok(Vec::new());
        }
        let layout = self.layouts.resolve(layout_id)?;
        variants
            .iter()
            .enumerate()
            .map(|(index, variant)| {
                Ok(MaterializedTemplate {
                    job_id: job.id.clone(),
                    angle_index: index as u32,
                    angle_label: variant.angle_label.clone(),
                    html_content: self.injector.inject(variant, layout)?,
                    layout_template_id: layout.id.clone(),
                    created_at: now,
                })
            })
            .collect()
    }

    /// Re-derives a job's templates from its stored result without calling
    /// the service, optionally switching layout.
    ///
    /// Completed jobs are re-rendered in place. A processing job that is
    /// waiting on materialization gets a fresh reconciliation attempt. On
    /// any error the job keeps its previous layout and templates.
    pub async fn rematerialize(
        &self,
        job_id: &str,
        layout_id: Option<&str>,
    ) -> Result<Vec<MaterializedTemplate>, ReconcileError> {
        let job = self.load(job_id)?;
        let envelope = result_repo::find(&self.db, job_id)?.ok_or_else(|| {
            ReconcileError::NoResult {
                job_id: job_id.to_string(),
            }
        })?;

        if !matches!(job.status, JobStatus::Completed | JobStatus::Processing) {
            return Err(ReconcileError::NotMaterializable {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }

        let switch_layout = match layout_id {
            Some(id) => Some(self.layouts.resolve(Some(id))?.id.as_str()),
            None => None,
        };

        if job.status == JobStatus::Processing {
            self.reconcile_with_layout(job_id, switch_layout).await?;
            return Ok(template_repo::list_for_job(&self.db, job_id)?);
        }

        let variants = extract(&envelope.raw_payload)?;
        let render_layout = switch_layout.or(job.layout_template_id.as_deref());
        let templates = self.render(&job, &variants, render_layout, Utc::now())?;
        template_repo::replace_all(&self.db, job_id, &templates, switch_layout)?;
        info!(
            "Re-materialized {} template(s) for job {}",
            templates.len(),
            job_id
        );
        Ok(template_repo::list_for_job(&self.db, job_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::{CreditPolicy, LogLedger};
    use crate::db::credit_repo;
    use crate::db::job_repo::JobRow;
    use crate::inject::LayoutTemplate;
    use crate::job::JobRequest;
    use crate::upstream::{SubmitPayload, UpstreamError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const FEAR_RESULT: &str = r#"{"swipe_results":[{"angle":"Fear","content":{"headline":"X"}}]}"#;

    /// Upstream whose answers are set by the test. `None` status means
    /// unreachable; `None` result means the result was discarded.
    #[derive(Default)]
    struct ScriptedUpstream {
        status: Mutex<Option<UpstreamStatus>>,
        result: Mutex<Option<String>>,
        fetches: AtomicUsize,
    }

    impl ScriptedUpstream {
        fn with(status: Option<UpstreamStatus>, result: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                status: Mutex::new(status),
                result: Mutex::new(result.map(str::to_string)),
                fetches: AtomicUsize::new(0),
            })
        }

        fn set_status(&self, status: Option<UpstreamStatus>) {
            *self.status.lock().unwrap() = status;
        }
    }

    #[async_trait]
    impl GenerationService for ScriptedUpstream {
        async fn submit(&self, _payload: &SubmitPayload) -> crate::upstream::Result<String> {
            Ok("unused".to_string())
        }

        async fn poll_status(&self, _id: &str) -> crate::upstream::Result<UpstreamStatus> {
            self.status
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| UpstreamError::Unavailable("connection refused".to_string()))
        }

        async fn fetch_result(&self, _id: &str) -> crate::upstream::Result<String> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.result
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| UpstreamError::Rejected {
                    status: Some(410),
                    message: "result expired".to_string(),
                })
        }
    }

    fn reconciler(db: &Database, upstream: Arc<ScriptedUpstream>) -> Reconciler {
        let mut layouts = LayoutRegistry::default();
        layouts.insert(LayoutTemplate {
            id: "card".to_string(),
            html: r#"<div class="card"><h3 data-slot="headline"></h3></div>"#.to_string(),
        });
        Reconciler::new(
            db.clone(),
            upstream,
            Arc::new(layouts),
            TemplateInjector::default(),
            Biller::new(db.clone(), CreditPolicy::default(), Arc::new(LogLedger)),
            JobProgressBroadcaster::default(),
        )
    }

    fn processing_job(db: &Database, id: &str, layout: Option<&str>) -> Job {
        let mut job = Job::draft(
            JobRequest {
                title: "Launch".to_string(),
                brief: "Cold brew".to_string(),
                layout_template_id: layout.map(str::to_string),
                ..Default::default()
            },
            Utc::now(),
        );
        job.id = id.to_string();
        job.status = JobStatus::Processing;
        job_repo::insert(db, &JobRow::from_job(&job).unwrap()).unwrap();
        job
    }

    fn stored(db: &Database, id: &str) -> Job {
        job_repo::find_by_id(db, id).unwrap().unwrap().into_job()
    }

    #[tokio::test]
    async fn test_running_sets_progress_50() {
        let db = Database::open_in_memory().unwrap();
        let upstream = ScriptedUpstream::with(Some(UpstreamStatus::Running), None);
        let reconciler = reconciler(&db, upstream.clone());
        processing_job(&db, "ext-1", None);

        let outcome = reconciler.reconcile("ext-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::InProgress { progress: 50 });
        assert_eq!(stored(&db, "ext-1").progress, 50);

        // A later, lower observation does not regress the job.
        upstream.set_status(Some(UpstreamStatus::Submitted));
        let outcome = reconciler.reconcile("ext-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::InProgress { progress: 50 });
        assert_eq!(stored(&db, "ext-1").status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_unavailable_changes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(&db, ScriptedUpstream::with(None, None));
        processing_job(&db, "ext-1", None);
        let before = stored(&db, "ext-1");

        let outcome = reconciler.reconcile("ext-1").await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Deferred { .. }));
        assert_eq!(stored(&db, "ext-1"), before);
    }

    #[tokio::test]
    async fn test_succeeded_materializes_and_bills_once() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(
            &db,
            ScriptedUpstream::with(Some(UpstreamStatus::Succeeded), Some(FEAR_RESULT)),
        );
        processing_job(&db, "ext-1", None);

        let outcome = reconciler.reconcile("ext-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Completed { templates: 1 });

        let job = stored(&db, "ext-1");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);

        let templates = template_repo::list_for_job(&db, "ext-1").unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].angle_label, "Fear");
        assert!(templates[0].html_content.contains(">X</h1>"));
        assert!(credit_repo::find_by_job(&db, "ext-1").unwrap().is_some());
        assert!(result_repo::find(&db, "ext-1").unwrap().is_some());

        let again = reconciler.reconcile("ext-1").await.unwrap();
        assert_eq!(
            again,
            ReconcileOutcome::Skipped {
                reason: SkipReason::Terminal
            }
        );
    }

    #[tokio::test]
    async fn test_empty_result_completes_with_note() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(
            &db,
            ScriptedUpstream::with(Some(UpstreamStatus::Succeeded), Some(r#"{"variants":[]}"#)),
        );
        processing_job(&db, "ext-1", None);

        let outcome = reconciler.reconcile("ext-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Completed { templates: 0 });
        let job = stored(&db, "ext-1");
        assert_eq!(job.completion_note.as_deref(), Some(NO_VARIANTS_NOTE));
        assert_eq!(template_repo::count_for_job(&db, "ext-1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_fetch_fails_without_output() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(
            &db,
            ScriptedUpstream::with(Some(UpstreamStatus::Succeeded), None),
        );
        processing_job(&db, "ext-1", None);

        let outcome = reconciler.reconcile("ext-1").await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Failed { .. }));
        assert_eq!(stored(&db, "ext-1").status, JobStatus::Failed);
        assert_eq!(template_repo::count_for_job(&db, "ext-1").unwrap(), 0);
        assert!(credit_repo::find_by_job(&db, "ext-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_and_unrecognized_status_are_terminal() {
        let db = Database::open_in_memory().unwrap();
        let upstream = ScriptedUpstream::with(Some(UpstreamStatus::Failed), None);
        let reconciler = reconciler(&db, upstream.clone());
        processing_job(&db, "a", None);
        processing_job(&db, "b", None);

        reconciler.reconcile("a").await.unwrap();
        upstream.set_status(Some(UpstreamStatus::parse("EXPLODED")));
        reconciler.reconcile("b").await.unwrap();

        assert_eq!(stored(&db, "a").status, JobStatus::Failed);
        let b = stored(&db, "b");
        assert_eq!(b.status, JobStatus::Failed);
        assert!(b.error.unwrap().contains("EXPLODED"));
    }

    #[tokio::test]
    async fn test_malformed_result_fails_job() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(
            &db,
            ScriptedUpstream::with(Some(UpstreamStatus::Succeeded), Some("<html>oops")),
        );
        processing_job(&db, "ext-1", None);

        let outcome = reconciler.reconcile("ext-1").await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Failed { reason } if reason.contains("malformed")));
    }

    #[tokio::test]
    async fn test_injection_failure_keeps_processing_and_resumes_from_envelope() {
        let db = Database::open_in_memory().unwrap();
        let upstream = ScriptedUpstream::with(Some(UpstreamStatus::Succeeded), Some(FEAR_RESULT));
        let reconciler = reconciler(&db, upstream.clone());
        processing_job(&db, "ext-1", Some("missing-layout"));

        let err = reconciler.reconcile("ext-1").await.unwrap_err();
        assert!(matches!(err, ReconcileError::Injection(_)));
        assert_eq!(stored(&db, "ext-1").status, JobStatus::Processing);
        assert!(credit_repo::find_by_job(&db, "ext-1").unwrap().is_none());

        // Switching to a known layout finishes the job from the stored
        // result without fetching again.
        upstream.set_status(None);
        let templates = reconciler.rematerialize("ext-1", Some("card")).await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].layout_template_id, "card");
        assert_eq!(stored(&db, "ext-1").status, JobStatus::Completed);
        assert_eq!(upstream.fetches.load(Ordering::SeqCst), 1);
        assert!(credit_repo::find_by_job(&db, "ext-1").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rematerialize_completed_job_replaces_templates() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(
            &db,
            ScriptedUpstream::with(Some(UpstreamStatus::Succeeded), Some(FEAR_RESULT)),
        );
        processing_job(&db, "ext-1", None);
        reconciler.reconcile("ext-1").await.unwrap();

        let templates = reconciler.rematerialize("ext-1", Some("card")).await.unwrap();
        assert_eq!(templates.len(), 1);
        assert!(templates[0].html_content.contains(r#"<div class="card">"#));
        assert_eq!(template_repo::count_for_job(&db, "ext-1").unwrap(), 1);
        assert_eq!(
            stored(&db, "ext-1").layout_template_id.as_deref(),
            Some("card")
        );
    }

    #[tokio::test]
    async fn test_failed_rematerialize_keeps_previous_layout() {
        const BODY_ONLY: &str = r#"[{"label":"Plain","body":"X"}]"#;
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(
            &db,
            ScriptedUpstream::with(Some(UpstreamStatus::Succeeded), Some(BODY_ONLY)),
        );
        processing_job(&db, "done", None);
        reconciler.reconcile("done").await.unwrap();
        let before = template_repo::list_for_job(&db, "done").unwrap();

        // The card layout has no body slot.
        let err = reconciler.rematerialize("done", Some("card")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Injection(_)));
        assert_eq!(stored(&db, "done").layout_template_id, None);
        assert_eq!(template_repo::list_for_job(&db, "done").unwrap(), before);

        // Same for a job still waiting on materialization.
        processing_job(&db, "waiting", Some("missing-layout"));
        result_repo::upsert(
            &db,
            &ResultEnvelope {
                job_id: "waiting".to_string(),
                raw_payload: BODY_ONLY.to_string(),
                received_at: Utc::now(),
            },
        )
        .unwrap();
        assert!(reconciler.rematerialize("waiting", Some("card")).await.is_err());
        let waiting = stored(&db, "waiting");
        assert_eq!(waiting.status, JobStatus::Processing);
        assert_eq!(waiting.layout_template_id.as_deref(), Some("missing-layout"));
    }

    #[tokio::test]
    async fn test_deeply_nested_result_completes_empty() {
        let deep = format!("{}1{}", r#"{"k":"#.repeat(200), "}".repeat(200));
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(
            &db,
            ScriptedUpstream::with(Some(UpstreamStatus::Succeeded), Some(deep.as_str())),
        );
        processing_job(&db, "ext-1", None);

        let outcome = reconciler.reconcile("ext-1").await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Completed { templates: 0 });
        let job = stored(&db, "ext-1");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completion_note.as_deref(), Some(NO_VARIANTS_NOTE));
    }

    #[tokio::test]
    async fn test_rematerialize_without_result() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(&db, ScriptedUpstream::with(None, None));
        processing_job(&db, "ext-1", None);

        assert!(matches!(
            reconciler.rematerialize("ext-1", None).await,
            Err(ReconcileError::NoResult { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancelled_and_missing_jobs() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(
            &db,
            ScriptedUpstream::with(Some(UpstreamStatus::Running), None),
        );
        processing_job(&db, "ext-1", None);
        job_repo::cancel(&db, "ext-1", Utc::now()).unwrap();

        assert_eq!(
            reconciler.reconcile("ext-1").await.unwrap(),
            ReconcileOutcome::Skipped {
                reason: SkipReason::Cancelled
            }
        );
        assert!(matches!(
            reconciler.reconcile("nope").await,
            Err(ReconcileError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweep_reports_and_surfaces_stuck_jobs() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(
            &db,
            ScriptedUpstream::with(Some(UpstreamStatus::Running), None),
        );
        let mut old = processing_job(&db, "old", None);
        old.created_at = Utc::now() - chrono::Duration::hours(3);
        job_repo::delete(&db, "old").unwrap();
        job_repo::insert(&db, &JobRow::from_job(&old).unwrap()).unwrap();
        processing_job(&db, "new", None);

        let report = reconciler.sweep(2, 3600).await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.in_progress, 2);
        assert_eq!(report.stuck, vec!["old".to_string()]);
        // Stuck jobs are reported, never failed.
        assert_eq!(stored(&db, "old").status, JobStatus::Processing);
    }

    #[tokio::test]
    async fn test_sweep_backfills_unbilled_completed_jobs() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = reconciler(&db, ScriptedUpstream::with(None, None));
        processing_job(&db, "done", None);
        job_repo::complete(&db, "done", None, Utc::now()).unwrap();

        let report = reconciler.sweep(1, 3600).await.unwrap();
        assert_eq!(report.backfilled, 1);
        assert_eq!(report.ledger_delivered, 0);
        assert!(credit_repo::find_by_job(&db, "done").unwrap().is_some());

        let report = reconciler.sweep(1, 3600).await.unwrap();
        assert_eq!(report.backfilled, 0);
    }

    #[test]
    fn test_scheduler_shutdown() {
        let db = Database::open_in_memory().unwrap();
        let reconciler = Arc::new(reconciler(&db, ScriptedUpstream::with(None, None)));
        let scheduler = SweepScheduler::new(
            reconciler,
            SweepSettings {
                interval: std::time::Duration::from_millis(50),
                concurrency: 1,
                stuck_after_secs: 3600,
            },
        );

        let (trigger_tx, trigger_rx) = tokio::sync::broadcast::channel(16);
        let handle = scheduler.start(trigger_rx);

        std::thread::sleep(std::time::Duration::from_millis(100));
        scheduler.stop();

        // Wake the select loop so it sees the shutdown
        let _ = trigger_tx.send(());

        handle.join().expect("scheduler thread panicked");
    }
}
