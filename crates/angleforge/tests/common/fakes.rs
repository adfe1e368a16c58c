//! In-memory stand-ins for the external collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use angleforge::billing::LedgerError;
use angleforge::upstream::{Result, SubmitPayload};
use angleforge::{CreditLedger, GenerationService, UpstreamError, UpstreamStatus, UsageEvent};

/// A failure the fake upstream can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    Unavailable,
    Auth,
    Rejected(u16),
}

impl FakeFailure {
    fn to_error(self) -> UpstreamError {
        match self {
            FakeFailure::Unavailable => UpstreamError::Unavailable("connection reset".to_string()),
            FakeFailure::Auth => UpstreamError::AuthUnavailable("token endpoint down".to_string()),
            FakeFailure::Rejected(status) => UpstreamError::Rejected {
                status: Some(status),
                message: format!("refused with {}", status),
            },
        }
    }
}

/// Scriptable generation service.
///
/// Submissions are accepted as `job-<n>`. A job with no scripted status
/// reports SUBMITTED; a job with no scripted result answers 404.
#[derive(Default)]
pub struct FakeUpstream {
    statuses: Mutex<HashMap<String, std::result::Result<UpstreamStatus, FakeFailure>>>,
    results: Mutex<HashMap<String, std::result::Result<String, FakeFailure>>>,
    submit_failure: Mutex<Option<FakeFailure>>,
    delay: Mutex<Duration>,
    next_id: AtomicUsize,
    pub submissions: Mutex<Vec<SubmitPayload>>,
    pub poll_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn set_status(&self, job_id: &str, status: UpstreamStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), Ok(status));
    }

    pub fn fail_status(&self, job_id: &str, failure: FakeFailure) {
        self.statuses
            .lock()
            .unwrap()
            .insert(job_id.to_string(), Err(failure));
    }

    pub fn set_result(&self, job_id: &str, raw: &str) {
        self.results
            .lock()
            .unwrap()
            .insert(job_id.to_string(), Ok(raw.to_string()));
    }

    pub fn fail_result(&self, job_id: &str, failure: FakeFailure) {
        self.results
            .lock()
            .unwrap()
            .insert(job_id.to_string(), Err(failure));
    }

    /// Refuses every submission with `failure` until cleared with `None`.
    pub fn fail_submissions(&self, failure: Option<FakeFailure>) {
        *self.submit_failure.lock().unwrap() = failure;
    }

    /// Latency added to every status and result call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn polls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GenerationService for FakeUpstream {
    async fn submit(&self, payload: &SubmitPayload) -> Result<String> {
        if let Some(failure) = *self.submit_failure.lock().unwrap() {
            return Err(failure.to_error());
        }
        self.submissions.lock().unwrap().push(payload.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("job-{}", n))
    }

    async fn poll_status(&self, job_id: &str) -> Result<UpstreamStatus> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let scripted = self.statuses.lock().unwrap().get(job_id).cloned();
        match scripted {
            Some(Ok(status)) => Ok(status),
            Some(Err(failure)) => Err(failure.to_error()),
            None => Ok(UpstreamStatus::Submitted),
        }
    }

    async fn fetch_result(&self, job_id: &str) -> Result<String> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let scripted = self.results.lock().unwrap().get(job_id).cloned();
        match scripted {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(failure)) => Err(failure.to_error()),
            None => Err(FakeFailure::Rejected(404).to_error()),
        }
    }
}

/// Ledger that remembers every accepted event and can be switched off.
#[derive(Default)]
pub struct RecordingLedger {
    pub events: Mutex<Vec<UsageEvent>>,
    pub down: AtomicBool,
}

impl RecordingLedger {
    pub fn recorded(&self) -> Vec<UsageEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[async_trait]
impl CreditLedger for RecordingLedger {
    async fn record_usage(&self, event: &UsageEvent) -> std::result::Result<(), LedgerError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("ledger offline".to_string()));
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
