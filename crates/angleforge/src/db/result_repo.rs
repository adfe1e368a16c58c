//! Result envelope repository — one raw upstream result per job.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// Durable snapshot of what the upstream service returned for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    pub job_id: String,
    /// Exactly as received.
    pub raw_payload: String,
    pub received_at: DateTime<Utc>,
}

/// Stores the envelope for a job, replacing any earlier one.
pub fn upsert(db: &Database, envelope: &ResultEnvelope) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO result_envelopes (job_id, raw_payload, received_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_id) DO UPDATE SET
                raw_payload = excluded.raw_payload,
                received_at = excluded.received_at",
            params![
                envelope.job_id,
                envelope.raw_payload,
                format_timestamp(envelope.received_at)
            ],
        )?;
        Ok(())
    })
}

pub fn find(db: &Database, job_id: &str) -> Result<Option<ResultEnvelope>, DatabaseError> {
    db.with_conn(|conn| {
        let envelope = conn
            .query_row(
                "SELECT job_id, raw_payload, received_at FROM result_envelopes WHERE job_id = ?1",
                params![job_id],
                |r| {
                    Ok(ResultEnvelope {
                        job_id: r.get(0)?,
                        raw_payload: r.get(1)?,
                        received_at: parse_timestamp(&r.get::<_, String>(2)?),
                    })
                },
            )
            .optional()?;
        Ok(envelope)
    })
}
