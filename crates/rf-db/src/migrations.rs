//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use rf_core::{Error, Result};

/// V1: initial schema -- the append-only run log, the derived query index
/// (runs, scenes), the activity result cache, and the admission slot table.
const V1_INITIAL: &str = r#"
-- Append-only durable run log. One row per event; seq is contiguous and
-- starts at 1 within each run.
CREATE TABLE run_log (
    run_id      TEXT NOT NULL,
    seq         INTEGER NOT NULL,
    event       TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (run_id, seq)
);

-- Query index: one row per run, kept in lockstep with run_log.
CREATE TABLE runs (
    run_id         TEXT PRIMARY KEY,
    owner_id       TEXT NOT NULL,
    slot           INTEGER NOT NULL,
    status         TEXT NOT NULL DEFAULT 'pending',
    params         TEXT NOT NULL,
    voiceover_ref  TEXT,
    final_ref      TEXT,
    failure_detail TEXT,
    created_at     TEXT NOT NULL,
    terminal_at    TEXT
);

-- Query index: one row per scene within a run.
CREATE TABLE scenes (
    run_id         TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
    scene_index    INTEGER NOT NULL,
    image_prompt   TEXT NOT NULL,
    video_prompt   TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'pending',
    image_attempts INTEGER NOT NULL DEFAULT 0,
    video_attempts INTEGER NOT NULL DEFAULT 0,
    image_ref      TEXT,
    video_ref      TEXT,
    failure        TEXT,
    PRIMARY KEY (run_id, scene_index)
);

-- Completed (and terminally failed) activity attempts, keyed by
-- idempotency key.
CREATE TABLE activity_results (
    idempotency_key TEXT PRIMARY KEY,
    run_id          TEXT NOT NULL,
    scene_index     INTEGER,
    activity        TEXT NOT NULL,
    outcome         TEXT NOT NULL,
    result          TEXT,
    recorded_at     TEXT NOT NULL
);

-- Per-owner concurrency slots. A row exists only while the slot is held.
CREATE TABLE slots (
    owner_id    TEXT NOT NULL,
    slot_index  INTEGER NOT NULL,
    run_id      TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    PRIMARY KEY (owner_id, slot_index)
);

-- Indexes
CREATE INDEX idx_runs_owner_status      ON runs(owner_id, status);
CREATE INDEX idx_scenes_run             ON scenes(run_id);
CREATE INDEX idx_activity_results_run   ON activity_results(run_id, activity, scene_index);
CREATE INDEX idx_slots_run              ON slots(run_id);
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_INITIAL)];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit()
            .map_err(|e| Error::database(e.to_string()))?;
    }

    Ok(())
}
