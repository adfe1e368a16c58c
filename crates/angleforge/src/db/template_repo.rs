//! Materialized template repository.
//!
//! Rows are keyed by `(job_id, angle_index)`; writing a job's templates
//! again replaces them in place.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// One rendered layout for one content variant of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializedTemplate {
    pub job_id: String,
    pub angle_index: u32,
    pub angle_label: String,
    pub html_content: String,
    pub layout_template_id: String,
    pub created_at: DateTime<Utc>,
}

impl MaterializedTemplate {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            angle_index: row.get("angle_index")?,
            angle_label: row.get("angle_label")?,
            html_content: row.get("html_content")?,
            layout_template_id: row.get("layout_template_id")?,
            created_at: parse_timestamp(&row.get::<_, String>("created_at")?),
        })
    }
}

/// Upserts the given templates for `job_id` and prunes any rows whose
/// `angle_index` is beyond the new set, in one transaction.
///
/// With `switch_layout` set, the job is pointed at that layout in the same
/// transaction.
pub fn replace_all(
    db: &Database,
    job_id: &str,
    templates: &[MaterializedTemplate],
    switch_layout: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        if let Some(layout_id) = switch_layout {
            tx.execute(
                "UPDATE jobs SET layout_template_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![job_id, layout_id, format_timestamp(Utc::now())],
            )?;
        }
        for template in templates {
            debug_assert_eq!(template.job_id, job_id);
            let ts = format_timestamp(template.created_at);
            tx.execute(
                "INSERT INTO materialized_templates
                    (job_id, angle_index, angle_label, html_content, layout_template_id,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                 ON CONFLICT(job_id, angle_index) DO UPDATE SET
                    angle_label = excluded.angle_label,
                    html_content = excluded.html_content,
                    layout_template_id = excluded.layout_template_id,
                    updated_at = excluded.updated_at",
                params![
                    job_id,
                    template.angle_index,
                    template.angle_label,
                    template.html_content,
                    template.layout_template_id,
                    ts,
                ],
            )?;
        }
        tx.execute(
            "DELETE FROM materialized_templates WHERE job_id = ?1 AND angle_index >= ?2",
            params![job_id, templates.len() as u32],
        )?;
        tx.commit()?;
        Ok(())
    })
}

/// All templates of a job, ordered by angle.
pub fn list_for_job(
    db: &Database,
    job_id: &str,
) -> Result<Vec<MaterializedTemplate>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM materialized_templates WHERE job_id = ?1 ORDER BY angle_index ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], MaterializedTemplate::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_for_job(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM materialized_templates WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
