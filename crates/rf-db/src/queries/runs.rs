//! Query-index operations for runs.
//!
//! These rows are a projection of the run log; they are written by the
//! engine's index application, inside the same transaction as the log
//! append, and never ahead of it.

use chrono::Utc;
use rusqlite::Connection;
use rf_core::{Error, FailureDetail, OwnerId, Result, ResultRef, RunId, RunParams, RunStatus};

use crate::models::RunRow;

const COLS: &str = "run_id, owner_id, slot, status, params, voiceover_ref,
    final_ref, failure_detail, created_at, terminal_at";

/// Insert the index row for a newly created run.
pub fn insert_run(
    conn: &Connection,
    run_id: &RunId,
    owner_id: &OwnerId,
    slot: u32,
    params: &RunParams,
) -> Result<()> {
    let params_json = serde_json::to_string(params)
        .map_err(|e| Error::database(format!("serialize run params: {e}")))?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO runs (run_id, owner_id, slot, status, params, created_at)
         VALUES (?1, ?2, ?3, 'pending', ?4, ?5)",
        rusqlite::params![run_id.as_str(), owner_id.as_str(), slot, params_json, &now],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Get a run by ID.
pub fn get_run(conn: &Connection, run_id: &RunId) -> Result<Option<RunRow>> {
    let q = format!("SELECT {COLS} FROM runs WHERE run_id = ?1");
    let result = conn.query_row(&q, [run_id.as_str()], RunRow::from_row);
    match result {
        Ok(r) => Ok(Some(r)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// True when a run with this ID exists.
pub fn run_exists(conn: &Connection, run_id: &RunId) -> Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM runs WHERE run_id = ?1",
        [run_id.as_str()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Update a run's status.
pub fn update_run_status(conn: &Connection, run_id: &RunId, status: RunStatus) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE runs SET status = ?1 WHERE run_id = ?2",
            rusqlite::params![status.to_string(), run_id.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Record the voiceover artifact for a run.
pub fn set_voiceover_ref(conn: &Connection, run_id: &RunId, voiceover: &ResultRef) -> Result<bool> {
    let n = conn
        .execute(
            "UPDATE runs SET voiceover_ref = ?1 WHERE run_id = ?2",
            rusqlite::params![voiceover.as_str(), run_id.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Mark a run completed with its final artifact.
pub fn mark_completed(conn: &Connection, run_id: &RunId, final_ref: &ResultRef) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE runs SET status = 'completed', final_ref = ?1, terminal_at = ?2
             WHERE run_id = ?3",
            rusqlite::params![final_ref.as_str(), &now, run_id.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Mark a run failed with the collected failure details.
pub fn mark_failed(conn: &Connection, run_id: &RunId, failures: &[FailureDetail]) -> Result<bool> {
    let detail = serde_json::to_string(failures)
        .map_err(|e| Error::database(format!("serialize failure detail: {e}")))?;
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "UPDATE runs SET status = 'failed', failure_detail = ?1, terminal_at = ?2
             WHERE run_id = ?3",
            rusqlite::params![detail, &now, run_id.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// List runs with optional owner and status filters, newest first.
pub fn list_runs(
    conn: &Connection,
    owner_id: Option<&OwnerId>,
    status: Option<RunStatus>,
    limit: i64,
) -> Result<Vec<RunRow>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(owner) = owner_id {
        params_vec.push(Box::new(owner.as_str().to_string()));
        clauses.push(format!("owner_id = ?{}", params_vec.len()));
    }
    if let Some(s) = status {
        params_vec.push(Box::new(s.to_string()));
        clauses.push(format!("status = ?{}", params_vec.len()));
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    params_vec.push(Box::new(limit));
    let q = format!(
        "SELECT {COLS} FROM runs {where_clause}
         ORDER BY created_at DESC LIMIT ?{}",
        params_vec.len()
    );

    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let params_refs: Vec<&dyn rusqlite::types::ToSql> =
        params_vec.iter().map(|b| b.as_ref()).collect();
    let rows = stmt
        .query_map(params_refs.as_slice(), RunRow::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// List every run that has not reached a terminal status, oldest first.
/// Used at startup to resume interrupted runs.
pub fn list_non_terminal(conn: &Connection) -> Result<Vec<RunRow>> {
    let q = format!(
        "SELECT {COLS} FROM runs
         WHERE status NOT IN ('completed', 'failed')
         ORDER BY created_at ASC"
    );
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], RunRow::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}
