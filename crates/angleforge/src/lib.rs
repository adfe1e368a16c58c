pub mod billing;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod inject;
pub mod job;
pub mod reconciler;
pub mod secrets;
pub mod service;
pub mod telemetry;
pub mod upstream;

pub use billing::{Biller, ChargeOutcome, CreditLedger, CreditPolicy, LogLedger, UsageEvent};
pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, Config};
pub use db::Database;
pub use error::{AngleforgeError, ConfigError, Result};
pub use extract::{extract, ContentVariant, ExtractionError};
pub use inject::{inject, InjectionError, LayoutRegistry, LayoutTemplate, TemplateInjector};
pub use job::{Avatar, Job, JobRequest, JobStatus, JobStatusView, JobUpdate, TargetApproach};
pub use reconciler::{
    ReconcileError, ReconcileOutcome, Reconciler, SweepReport, SweepScheduler, SweepSettings,
};
pub use secrets::{resolve_secret, SecretError};
pub use service::{JobService, ServiceError};
pub use upstream::{GenerationService, HttpGenerationClient, UpstreamError, UpstreamStatus};
