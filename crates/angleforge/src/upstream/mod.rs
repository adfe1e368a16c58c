//! Client for the external, asynchronous generation service.
//!
//! Three calls make up the contract: submit a job, poll its status and
//! fetch its result once it has succeeded. Every call performs a fresh
//! client-credentials exchange before talking to the API.

pub mod auth;
pub mod client;
pub mod error;
pub mod types;

use async_trait::async_trait;

pub use auth::ClientCredentials;
pub use client::{HttpGenerationClient, UpstreamTimeouts};
pub use error::{Result, UpstreamError};
pub use types::{SubmitPayload, UpstreamStatus};

/// The generation service as seen by the reconciler.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Submits a job and returns the service's id for it.
    async fn submit(&self, payload: &SubmitPayload) -> Result<String>;

    /// Current status of a previously submitted job.
    async fn poll_status(&self, external_job_id: &str) -> Result<UpstreamStatus>;

    /// Raw result payload of a job that reported success.
    async fn fetch_result(&self, external_job_id: &str) -> Result<String>;
}
