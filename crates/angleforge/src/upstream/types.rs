//! Wire types for the external generation API.

use serde::{Deserialize, Serialize};

use crate::job::{Avatar, Job};

/// Status reported by the generation service for one of its jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamStatus {
    Submitted,
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Anything the service returned that is not a known status.
    Unrecognized(String),
}

impl UpstreamStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "SUBMITTED" => UpstreamStatus::Submitted,
            "PENDING" => UpstreamStatus::Pending,
            "RUNNING" => UpstreamStatus::Running,
            "SUCCEEDED" => UpstreamStatus::Succeeded,
            "FAILED" => UpstreamStatus::Failed,
            _ => UpstreamStatus::Unrecognized(raw.to_string()),
        }
    }
}

impl std::fmt::Display for UpstreamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamStatus::Submitted => f.write_str("SUBMITTED"),
            UpstreamStatus::Pending => f.write_str("PENDING"),
            UpstreamStatus::Running => f.write_str("RUNNING"),
            UpstreamStatus::Succeeded => f.write_str("SUCCEEDED"),
            UpstreamStatus::Failed => f.write_str("FAILED"),
            UpstreamStatus::Unrecognized(raw) => write!(f, "unrecognized({})", raw),
        }
    }
}

/// Body sent to the submit endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmitPayload {
    pub title: String,
    pub brief: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub target_approach: String,
    pub avatars: Vec<Avatar>,
    pub job_type: String,
}

impl From<&Job> for SubmitPayload {
    fn from(job: &Job) -> Self {
        Self {
            title: job.title.clone(),
            brief: job.brief.clone(),
            source_url: job.source_url.clone(),
            target_approach: job.target_approach.as_str().to_string(),
            avatars: job.avatars.clone(),
            job_type: job.job_type.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitResponse {
    #[serde(alias = "id", alias = "jobId")]
    pub job_id: String,
}

/// The status endpoint answers either `{"status": "..."}` or a bare string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum StatusResponse {
    Object { status: String },
    Bare(String),
}

impl StatusResponse {
    pub fn into_status(self) -> UpstreamStatus {
        match self {
            StatusResponse::Object { status } | StatusResponse::Bare(status) => {
                UpstreamStatus::parse(&status)
            }
        }
    }
}
