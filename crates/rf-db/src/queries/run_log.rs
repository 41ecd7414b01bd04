//! Append and read operations for the durable run log.
//!
//! The log is append-only: rows are never updated or deleted, and `seq`
//! is assigned inside the INSERT so concurrent appenders on the same run
//! cannot produce gaps or duplicates.

use chrono::Utc;
use rusqlite::Connection;
use rf_core::{Error, Result, RunId};

use crate::models::LogEntry;

const COLS: &str = "run_id, seq, event, recorded_at";

/// Append a serialized event to a run's log, returning the assigned
/// sequence number (1-based, contiguous per run).
pub fn append_event(conn: &Connection, run_id: &RunId, event: &str) -> Result<i64> {
    let now = Utc::now().to_rfc3339();
    let seq: i64 = conn
        .query_row(
            "INSERT INTO run_log (run_id, seq, event, recorded_at)
             VALUES (
                 ?1,
                 (SELECT COALESCE(MAX(seq), 0) + 1 FROM run_log WHERE run_id = ?1),
                 ?2,
                 ?3
             )
             RETURNING seq",
            rusqlite::params![run_id.as_str(), event, &now],
            |row| row.get(0),
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(seq)
}

/// Read a run's full log in sequence order.
pub fn list_events(conn: &Connection, run_id: &RunId) -> Result<Vec<LogEntry>> {
    let q = format!("SELECT {COLS} FROM run_log WHERE run_id = ?1 ORDER BY seq ASC");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([run_id.as_str()], LogEntry::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Highest sequence number appended for a run, or 0 if the log is empty.
pub fn last_seq(conn: &Connection, run_id: &RunId) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) FROM run_log WHERE run_id = ?1",
        [run_id.as_str()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}
