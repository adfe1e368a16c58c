//! Job domain model: one unit of submitted generation work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of the provisional key a job carries until the upstream service
/// accepts it and hands back its own job id.
pub const DRAFT_PREFIX: &str = "draft-";

/// Job type used for billing when a request does not name one.
pub const DEFAULT_JOB_TYPE: &str = "marketing_angles";

/// Note recorded on a completed job whose result held no content variants.
pub const NO_VARIANTS_NOTE: &str = "no content variants in result";

/// Creates a fresh provisional key for a job that has not been submitted yet.
pub fn new_draft_id() -> String {
    format!("{}{}", DRAFT_PREFIX, uuid::Uuid::new_v4())
}

/// Lifecycle status of a job.
///
/// Ordered by the lattice `pending < processing < {completed, failed}`;
/// the two terminal states share a rank and never transition further.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Position in the status lattice.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the generation service should approach the brief.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetApproach {
    #[default]
    Explore,
    Refine,
    Expand,
}

impl TargetApproach {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetApproach::Explore => "explore",
            TargetApproach::Refine => "refine",
            TargetApproach::Expand => "expand",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "explore" => Some(TargetApproach::Explore),
            "refine" => Some(TargetApproach::Refine),
            "expand" => Some(TargetApproach::Expand),
            _ => None,
        }
    }
}

/// A target persona the content is written for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Avatar {
    pub name: String,
    #[serde(default)]
    pub researched: bool,
}

/// A job as persisted in the durable store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Draft key while pending, the upstream job id afterwards.
    pub id: String,
    pub title: String,
    pub brief: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub target_approach: TargetApproach,
    #[serde(default)]
    pub avatars: Vec<Avatar>,
    pub job_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_template_id: Option<String>,
    pub status: JobStatus,
    pub progress: u8,
    /// Why a completed job has no materialized templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Builds a new pending job from a caller request.
    pub fn draft(request: JobRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: new_draft_id(),
            title: request.title,
            brief: request.brief,
            source_url: request.source_url,
            target_approach: request.target_approach,
            avatars: request.avatars,
            job_type: request
                .job_type
                .unwrap_or_else(|| DEFAULT_JOB_TYPE.to_string()),
            layout_template_id: request.layout_template_id,
            status: JobStatus::Pending,
            progress: 0,
            completion_note: None,
            error: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The upstream job id, once the service has accepted the job.
    pub fn external_id(&self) -> Option<&str> {
        if self.status == JobStatus::Pending || self.id.starts_with(DRAFT_PREFIX) {
            None
        } else {
            Some(&self.id)
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled_at.is_some()
    }
}

/// Caller-supplied description of the work to generate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobRequest {
    pub title: String,
    pub brief: String,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub target_approach: TargetApproach,
    #[serde(default)]
    pub avatars: Vec<Avatar>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub layout_template_id: Option<String>,
}

impl JobRequest {
    /// Checks the request for obviously unusable input.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("title must not be empty".to_string());
        }
        if self.brief.trim().is_empty() {
            return Err("brief must not be empty".to_string());
        }
        if let Some(url) = &self.source_url {
            if reqwest::Url::parse(url).is_err() {
                return Err(format!("source_url '{}' is not a valid URL", url));
            }
        }
        if self.avatars.iter().any(|a| a.name.trim().is_empty()) {
            return Err("avatar names must not be empty".to_string());
        }
        Ok(())
    }
}

/// Edits to the descriptive fields of a job that has not been submitted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobUpdate {
    pub title: Option<String>,
    pub brief: Option<String>,
    pub source_url: Option<Option<String>>,
    pub target_approach: Option<TargetApproach>,
    pub avatars: Option<Vec<Avatar>>,
    pub layout_template_id: Option<Option<String>>,
}

impl JobUpdate {
    pub fn apply(self, job: &mut Job) {
        if let Some(title) = self.title {
            job.title = title;
        }
        if let Some(brief) = self.brief {
            job.brief = brief;
        }
        if let Some(source_url) = self.source_url {
            job.source_url = source_url;
        }
        if let Some(approach) = self.target_approach {
            job.target_approach = approach;
        }
        if let Some(avatars) = self.avatars {
            job.avatars = avatars;
        }
        if let Some(layout) = self.layout_template_id {
            job.layout_template_id = layout;
        }
    }
}

/// The status pair returned to callers polling a job.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct JobStatusView {
    pub status: JobStatus,
    pub progress: u8,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            status: job.status,
            progress: job.progress,
        }
    }
}
