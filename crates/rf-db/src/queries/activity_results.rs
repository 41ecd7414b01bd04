//! Activity result cache keyed by idempotency key.
//!
//! Successful (and terminally failed) attempts are recorded here inside
//! the same transaction as their log append, so an attempt is never
//! cached without its durable record.

use chrono::Utc;
use rusqlite::Connection;
use rf_core::{AttemptOutcome, Error, Result, RunId};

use crate::models::ActivityResultRow;

const COLS: &str = "idempotency_key, run_id, scene_index, activity, outcome, result, recorded_at";

/// Record an attempt's outcome. Replaces any previous record under the
/// same idempotency key, so re-recording after a crash is harmless.
pub fn record(
    conn: &Connection,
    idempotency_key: &str,
    run_id: &RunId,
    scene_index: Option<u32>,
    activity: &str,
    outcome: AttemptOutcome,
    result: Option<&serde_json::Value>,
) -> Result<()> {
    let result_json = result
        .map(|v| serde_json::to_string(v))
        .transpose()
        .map_err(|e| Error::database(format!("serialize activity result: {e}")))?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT OR REPLACE INTO activity_results
             (idempotency_key, run_id, scene_index, activity, outcome, result, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            idempotency_key,
            run_id.as_str(),
            scene_index,
            activity,
            outcome.to_string(),
            result_json,
            &now
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Look up a recorded attempt by its idempotency key.
pub fn find_by_key(conn: &Connection, idempotency_key: &str) -> Result<Option<ActivityResultRow>> {
    let q = format!("SELECT {COLS} FROM activity_results WHERE idempotency_key = ?1");
    let result = conn.query_row(&q, [idempotency_key], ActivityResultRow::from_row);
    match result {
        Ok(r) => Ok(Some(r)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Find a successful record for an activity, regardless of which attempt
/// produced it. This is the recovery fast path: after a crash the attempt
/// counter restarts, so the lookup must match on the activity identity
/// rather than the per-attempt key.
pub fn find_success(
    conn: &Connection,
    run_id: &RunId,
    scene_index: Option<u32>,
    activity: &str,
) -> Result<Option<ActivityResultRow>> {
    let q = format!(
        "SELECT {COLS} FROM activity_results
         WHERE run_id = ?1 AND scene_index IS ?2 AND activity = ?3 AND outcome = 'success'
         ORDER BY recorded_at DESC LIMIT 1"
    );
    let result = conn.query_row(
        &q,
        rusqlite::params![run_id.as_str(), scene_index, activity],
        ActivityResultRow::from_row,
    );
    match result {
        Ok(r) => Ok(Some(r)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}
