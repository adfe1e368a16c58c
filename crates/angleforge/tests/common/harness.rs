//! Test harness for isolated reconciliation runs.
//!
//! `TestHarness` opens a fresh SQLite file in a temp directory and wires the
//! reconciler and job service to a `FakeUpstream` and `RecordingLedger`.

#![allow(dead_code)]

use std::sync::Arc;

use tempfile::TempDir;

use angleforge::config::BillingConfig;
use angleforge::db::credit_repo::{self, CreditEvent};
use angleforge::db::template_repo::{self, MaterializedTemplate};
use angleforge::db::Database;
use angleforge::{
    Biller, CreditPolicy, Job, JobProgressBroadcaster, JobRequest, JobService, LayoutRegistry,
    LayoutTemplate, Reconciler, TemplateInjector,
};

use super::fakes::{FakeUpstream, RecordingLedger};

/// Result payload in the `swipe_results` shape with one angle.
pub const FEAR_RESULT: &str =
    r#"{"swipe_results":[{"angle":"Fear","content":{"headline":"X"}}]}"#;

/// Result payload with three angles in the `variants` shape.
pub const THREE_ANGLES: &str = r#"{
    "variants": [
        {"label": "Fear", "headline": "Don't miss out", "body": "<p>Stock is <b>limited</b>.</p>"},
        {"label": "Greed", "headline": "Save 40%", "cta": "Claim the deal"},
        {"label": "Status", "headline": "Join the few"}
    ]
}"#;

/// Layout with a single headline slot, registered as `card`.
pub const CARD_LAYOUT: &str = r#"<div class="card"><h3 data-slot="headline">Headline</h3></div>"#;

pub struct TestHarness {
    _temp_dir: TempDir,
    pub db: Database,
    pub upstream: Arc<FakeUpstream>,
    pub ledger: Arc<RecordingLedger>,
    pub reconciler: Arc<Reconciler>,
    pub service: JobService,
}

impl TestHarness {
    /// Harness with default billing (one credit per job, no allowance).
    pub fn new() -> Self {
        Self::with_billing(BillingConfig::default())
    }

    pub fn with_billing(billing: BillingConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("angleforge.db"))
            .expect("Failed to open test database");

        let upstream = Arc::new(FakeUpstream::default());
        let ledger = Arc::new(RecordingLedger::default());

        let mut layouts = LayoutRegistry::default();
        layouts.insert(LayoutTemplate {
            id: "card".to_string(),
            html: CARD_LAYOUT.to_string(),
        });

        let reconciler = Arc::new(Reconciler::new(
            db.clone(),
            upstream.clone(),
            Arc::new(layouts),
            TemplateInjector::default(),
            Biller::new(db.clone(), CreditPolicy::new(billing), ledger.clone()),
            JobProgressBroadcaster::default(),
        ));
        let service = JobService::new(reconciler.clone());

        Self {
            _temp_dir: temp_dir,
            db,
            upstream,
            ledger,
            reconciler,
            service,
        }
    }

    pub fn request(title: &str) -> JobRequest {
        JobRequest {
            title: title.to_string(),
            brief: "Cold brew coffee subscription".to_string(),
            ..Default::default()
        }
    }

    /// Submits a job; the fake upstream reports it SUBMITTED.
    pub async fn submitted_job(&self, title: &str) -> Job {
        self.service
            .submit_job(Self::request(title))
            .await
            .expect("submission should succeed")
    }

    pub fn job(&self, id: &str) -> Job {
        self.service.get_job(id).expect("job should exist")
    }

    pub fn templates(&self, id: &str) -> Vec<MaterializedTemplate> {
        template_repo::list_for_job(&self.db, id).expect("template query failed")
    }

    pub fn credit_event(&self, id: &str) -> Option<CreditEvent> {
        credit_repo::find_by_job(&self.db, id).expect("credit query failed")
    }
}
