use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AngleforgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] crate::upstream::UpstreamError),

    #[error("Layout error: {0}")]
    Injection(#[from] crate::inject::InjectionError),

    #[error("Job service error: {0}")]
    Service(#[from] crate::service::ServiceError),

    #[error("Reconciler error: {0}")]
    Reconcile(#[from] crate::reconciler::ReconcileError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to read layout '{path}': {source}")]
    ReadLayout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to scan layout directory '{path}': {source}")]
    ScanLayouts {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

impl ConfigError {
    pub fn validation(message: impl Into<String>) -> Self {
        ConfigError::Validation {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AngleforgeError>;
