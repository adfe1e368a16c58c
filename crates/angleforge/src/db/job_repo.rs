//! Job repository — CRUD and guarded status writes for the `jobs` table.
//!
//! Every status write is conditional on the current row so that two
//! reconcilers racing on the same job converge instead of regressing it:
//! a write only lands if it moves the job up the status lattice, or (while
//! processing) strictly raises progress.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::job::{Avatar, Job, JobStatus, TargetApproach};

/// SQL expression ranking the current `status` column in the lattice.
const CURRENT_RANK: &str =
    "CASE status WHEN 'pending' THEN 0 WHEN 'processing' THEN 1 ELSE 2 END";

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub title: String,
    pub brief: String,
    pub source_url: Option<String>,
    pub target_approach: String,
    pub avatars: String,
    pub job_type: String,
    pub layout_template_id: Option<String>,
    pub status: String,
    pub progress: u8,
    pub completion_note: Option<String>,
    pub error: Option<String>,
    pub cancelled_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            title: row.get("title")?,
            brief: row.get("brief")?,
            source_url: row.get("source_url")?,
            target_approach: row.get("target_approach")?,
            avatars: row.get("avatars")?,
            job_type: row.get("job_type")?,
            layout_template_id: row.get("layout_template_id")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            completion_note: row.get("completion_note")?,
            error: row.get("error")?,
            cancelled_at: row.get("cancelled_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn from_job(job: &Job) -> Result<Self, DatabaseError> {
        let avatars = serde_json::to_string(&job.avatars).map_err(|e| DatabaseError::Json {
            column: "avatars",
            source: e,
        })?;
        Ok(Self {
            id: job.id.clone(),
            title: job.title.clone(),
            brief: job.brief.clone(),
            source_url: job.source_url.clone(),
            target_approach: job.target_approach.as_str().to_string(),
            avatars,
            job_type: job.job_type.clone(),
            layout_template_id: job.layout_template_id.clone(),
            status: job.status.as_str().to_string(),
            progress: job.progress,
            completion_note: job.completion_note.clone(),
            error: job.error.clone(),
            cancelled_at: job.cancelled_at.map(format_timestamp),
            created_at: format_timestamp(job.created_at),
            updated_at: format_timestamp(job.updated_at),
        })
    }

    pub fn into_job(self) -> Job {
        let status = JobStatus::parse(&self.status).unwrap_or_else(|| {
            log::warn!(
                "Unknown job status '{}' for job {}, defaulting to Processing",
                self.status,
                self.id
            );
            JobStatus::Processing
        });
        let target_approach = TargetApproach::parse(&self.target_approach).unwrap_or_else(|| {
            log::warn!(
                "Unknown target approach '{}' for job {}, defaulting to explore",
                self.target_approach,
                self.id
            );
            TargetApproach::Explore
        });
        let avatars: Vec<Avatar> = serde_json::from_str(&self.avatars).unwrap_or_else(|e| {
            log::warn!("Invalid avatars JSON for job {}: {}", self.id, e);
            Vec::new()
        });

        Job {
            id: self.id,
            title: self.title,
            brief: self.brief,
            source_url: self.source_url,
            target_approach,
            avatars,
            job_type: self.job_type,
            layout_template_id: self.layout_template_id,
            status,
            progress: self.progress.min(100),
            completion_note: self.completion_note,
            error: self.error,
            cancelled_at: self.cancelled_at.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, title, brief, source_url, target_approach, avatars, job_type,
             layout_template_id, status, progress, completion_note, error, cancelled_at,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.title,
                job.brief,
                job.source_url,
                job.target_approach,
                job.avatars,
                job.job_type,
                job.layout_template_id,
                job.status,
                job.progress,
                job.completion_note,
                job.error,
                job.cancelled_at,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Overwrites the descriptive fields of a job that is still pending.
///
/// Returns false if the job does not exist or has already been submitted.
pub fn update_draft(db: &Database, job: &JobRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET title=?2, brief=?3, source_url=?4, target_approach=?5, avatars=?6,
             layout_template_id=?7, updated_at=?8
             WHERE id=?1 AND status='pending'",
            params![
                job.id,
                job.title,
                job.brief,
                job.source_url,
                job.target_approach,
                job.avatars,
                job.layout_template_id,
                job.updated_at,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }
        if let Some(ref job_type) = filter.job_type {
            conditions.push(format!("job_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(job_type.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Re-keys a pending draft to its upstream id and moves it to processing.
///
/// Returns false if the draft was already submitted, cancelled or deleted
/// in the meantime.
pub fn mark_submitted(
    db: &Database,
    draft_id: &str,
    external_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET id=?2, status='processing', progress=0, error=NULL, updated_at=?3
             WHERE id=?1 AND status='pending' AND cancelled_at IS NULL",
            params![draft_id, external_id, format_timestamp(now)],
        )?;
        Ok(changed > 0)
    })
}

/// Records a non-terminal status/progress observation.
///
/// Lands only if `status` ranks above the stored status, or both are
/// `processing` and `progress` is strictly higher. Returns whether the
/// row changed.
pub fn advance(
    db: &Database,
    id: &str,
    status: JobStatus,
    progress: u8,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "UPDATE jobs SET status=?2, progress=?3, updated_at=?4
             WHERE id=?1 AND (
                ?5 > {rank}
                OR (status = 'processing' AND ?2 = 'processing' AND ?3 > progress)
             )",
            rank = CURRENT_RANK
        );
        let changed = conn.execute(
            &sql,
            params![
                id,
                status.as_str(),
                progress.min(100),
                format_timestamp(now),
                status.rank()
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Marks a processing job completed, optionally recording why it has no
/// materialized output.
pub fn complete(
    db: &Database,
    id: &str,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status='completed', progress=100, completion_note=?2, error=NULL,
             updated_at=?3
             WHERE id=?1 AND status='processing'",
            params![id, note, format_timestamp(now)],
        )?;
        Ok(changed > 0)
    })
}

/// Marks a processing job failed with the given reason.
pub fn fail(db: &Database, id: &str, error: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status='failed', error=?2, updated_at=?3
             WHERE id=?1 AND status='processing'",
            params![id, error, format_timestamp(now)],
        )?;
        Ok(changed > 0)
    })
}

/// Records a submission error on a draft without changing its status.
pub fn record_submit_error(
    db: &Database,
    id: &str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET error=?2, updated_at=?3 WHERE id=?1 AND status='pending'",
            params![id, error, format_timestamp(now)],
        )?;
        Ok(())
    })
}

/// Flags a non-terminal job as cancelled. Returns false if the job is
/// terminal, already cancelled, or missing.
pub fn cancel(db: &Database, id: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let ts = format_timestamp(now);
        let changed = conn.execute(
            "UPDATE jobs SET cancelled_at=?2, updated_at=?2
             WHERE id=?1 AND status IN ('pending', 'processing') AND cancelled_at IS NULL",
            params![id, ts],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes a job. Envelope and templates go with it via cascade.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// IDs of every job the sweep should reconcile, oldest first.
pub fn list_reconcilable(db: &Database) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM jobs WHERE status = 'processing' AND cancelled_at IS NULL
             ORDER BY created_at ASC",
        )?;
        let ids = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Processing jobs created before `cutoff`.
pub fn list_stuck(db: &Database, cutoff: DateTime<Utc>) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = 'processing' AND cancelled_at IS NULL
             AND created_at < ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map(params![format_timestamp(cutoff)], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Completed jobs that have no credit event yet.
pub fn list_unbilled_completed(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT jobs.* FROM jobs
             LEFT JOIN credit_events ON credit_events.job_id = jobs.id
             WHERE jobs.status = 'completed' AND credit_events.job_id IS NULL
             ORDER BY jobs.updated_at ASC",
        )?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
