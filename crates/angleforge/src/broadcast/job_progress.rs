//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::{Job, JobStatus};

/// A persisted change to a job's status or progress.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Current job identifier.
    pub job_id: String,
    /// Provisional key the job carried before submission (set on the
    /// submission event only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft_id: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    /// Human-readable message describing the change.
    pub message: String,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl JobProgressEvent {
    /// Event describing `job` as it now stands.
    pub fn from_job(job: &Job, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            draft_id: None,
            status: job.status,
            progress: job.progress,
            message: message.into(),
            error: job.error.clone(),
            timestamp: Utc::now(),
        }
    }

    /// A draft was accepted upstream and re-keyed to `external_id`.
    pub fn submitted(draft_id: &str, external_id: &str) -> Self {
        Self {
            job_id: external_id.to_string(),
            draft_id: Some(draft_id.to_string()),
            status: JobStatus::Processing,
            progress: 0,
            message: "Submitted to generation service".to_string(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn progressed(job_id: &str, status: JobStatus, progress: u8) -> Self {
        Self {
            job_id: job_id.to_string(),
            draft_id: None,
            status,
            progress,
            message: format!("Progress {}%", progress),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn completed(job_id: &str, templates: usize) -> Self {
        Self {
            job_id: job_id.to_string(),
            draft_id: None,
            status: JobStatus::Completed,
            progress: 100,
            message: format!("Completed with {} template(s)", templates),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(job_id: &str, progress: u8, error: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            draft_id: None,
            status: JobStatus::Failed,
            progress,
            message: "Job failed".to_string(),
            error: Some(error.to_string()),
            timestamp: Utc::now(),
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
