//! External generation service error types.

use thiserror::Error;

/// Errors from calls to the external generation service.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Network failure, timeout or server-side outage. Status unknown;
    /// retry later.
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// The service explicitly refused the request.
    #[error("Upstream rejected request{}: {message}", status_suffix(.status))]
    Rejected {
        status: Option<u16>,
        message: String,
    },

    /// The client-credentials exchange failed.
    #[error("Credential exchange failed: {0}")]
    AuthUnavailable(String),
}

impl UpstreamError {
    pub(crate) fn rejected(status: Option<u16>, message: impl Into<String>) -> Self {
        UpstreamError::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Returns true if the failure says nothing about the job itself and the
    /// call should simply be retried on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            UpstreamError::Unavailable(_) | UpstreamError::AuthUnavailable(_)
        )
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

/// Result type for upstream operations.
pub type Result<T> = std::result::Result<T, UpstreamError>;
