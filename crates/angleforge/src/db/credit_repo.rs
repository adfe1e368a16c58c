//! Credit event repository.
//!
//! `job_id` carries a UNIQUE constraint; the second writer for a job loses
//! the insert and gets `InsertOutcome::AlreadyRecorded` instead of an error.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// One billable occurrence tied to a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditEvent {
    pub job_id: String,
    pub job_type: String,
    pub credits: u32,
    /// First day of the billing period, `YYYY-MM-DD`.
    pub billing_period_start: String,
    pub is_overage: bool,
    pub created_at: DateTime<Utc>,
    /// Set once the external ledger acknowledged the event.
    pub reported_at: Option<DateTime<Utc>>,
}

impl CreditEvent {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            job_type: row.get("job_type")?,
            credits: row.get("credits")?,
            billing_period_start: row.get("billing_period_start")?,
            is_overage: row.get("is_overage")?,
            created_at: parse_timestamp(&row.get::<_, String>("created_at")?),
            reported_at: row
                .get::<_, Option<String>>("reported_at")?
                .as_deref()
                .map(parse_timestamp),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyRecorded,
}

/// Inserts the event unless one already exists for the job.
pub fn insert_unique(db: &Database, event: &CreditEvent) -> Result<InsertOutcome, DatabaseError> {
    let result = db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO credit_events
                (job_id, job_type, credits, billing_period_start, is_overage, created_at,
                 reported_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.job_id,
                event.job_type,
                event.credits,
                event.billing_period_start,
                event.is_overage,
                format_timestamp(event.created_at),
                event.reported_at.map(format_timestamp),
            ],
        )?;
        Ok(())
    });

    match result {
        Ok(()) => Ok(InsertOutcome::Inserted),
        Err(e) if e.is_unique_violation() => Ok(InsertOutcome::AlreadyRecorded),
        Err(e) => Err(e),
    }
}

pub fn find_by_job(db: &Database, job_id: &str) -> Result<Option<CreditEvent>, DatabaseError> {
    db.with_conn(|conn| {
        let event = conn
            .query_row(
                "SELECT * FROM credit_events WHERE job_id = ?1",
                params![job_id],
                CreditEvent::from_row,
            )
            .optional()?;
        Ok(event)
    })
}

/// Total credits recorded for the billing period starting at `period_start`.
pub fn credits_in_period(db: &Database, period_start: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let total: u64 = conn.query_row(
            "SELECT COALESCE(SUM(credits), 0) FROM credit_events WHERE billing_period_start = ?1",
            params![period_start],
            |r| r.get(0),
        )?;
        Ok(total)
    })
}

/// Events the ledger has not acknowledged yet, oldest first.
pub fn list_unreported(db: &Database, limit: u32) -> Result<Vec<CreditEvent>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM credit_events WHERE reported_at IS NULL
             ORDER BY created_at ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], CreditEvent::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn mark_reported(db: &Database, job_id: &str, now: DateTime<Utc>) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE credit_events SET reported_at = ?2 WHERE job_id = ?1 AND reported_at IS NULL",
            params![job_id, format_timestamp(now)],
        )?;
        Ok(())
    })
}
