//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

const CREATE_JOBS: &str = "
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    brief TEXT NOT NULL,
    source_url TEXT,
    target_approach TEXT NOT NULL DEFAULT 'explore',
    avatars TEXT NOT NULL DEFAULT '[]',
    job_type TEXT NOT NULL,
    layout_template_id TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    completion_note TEXT,
    error TEXT,
    cancelled_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_status_created_at ON jobs(status, created_at);
";

const CREATE_RESULT_ENVELOPES: &str = "
CREATE TABLE IF NOT EXISTS result_envelopes (
    job_id TEXT PRIMARY KEY
        REFERENCES jobs(id) ON DELETE CASCADE ON UPDATE CASCADE,
    raw_payload TEXT NOT NULL,
    received_at TEXT NOT NULL
);
";

const CREATE_MATERIALIZED_TEMPLATES: &str = "
CREATE TABLE IF NOT EXISTS materialized_templates (
    job_id TEXT NOT NULL
        REFERENCES jobs(id) ON DELETE CASCADE ON UPDATE CASCADE,
    angle_index INTEGER NOT NULL,
    angle_label TEXT NOT NULL,
    html_content TEXT NOT NULL,
    layout_template_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, angle_index)
);
";

// Credit events outlive their job on purpose: no foreign key.
const CREATE_CREDIT_EVENTS: &str = "
CREATE TABLE IF NOT EXISTS credit_events (
    job_id TEXT NOT NULL UNIQUE,
    job_type TEXT NOT NULL,
    credits INTEGER NOT NULL,
    billing_period_start TEXT NOT NULL,
    is_overage INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    reported_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_credit_events_period ON credit_events(billing_period_start);
CREATE INDEX IF NOT EXISTS idx_credit_events_unreported ON credit_events(reported_at);
";

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: CREATE_JOBS,
    },
    Migration {
        version: 2,
        description: "create_result_envelopes_table",
        sql: CREATE_RESULT_ENVELOPES,
    },
    Migration {
        version: 3,
        description: "create_materialized_templates_table",
        sql: CREATE_MATERIALIZED_TEMPLATES,
    },
    Migration {
        version: 4,
        description: "create_credit_events_table",
        sql: CREATE_CREDIT_EVENTS,
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}
