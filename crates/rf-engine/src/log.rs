//! Durable run log: append before act.
//!
//! [`RunLog::append`] writes the event row and applies its projection to
//! the query index inside one SQLite transaction. The index therefore
//! never runs ahead of the log and never lags it, and a crash between the
//! two is impossible by construction.

use rusqlite::Connection;

use rf_core::{Error, FailureDetail, Result, RunId};
use rf_db::queries::{activity_results, run_log, runs, scenes};
use rf_db::{get_conn, DbPool};

use crate::event::RunEvent;

/// Handle for appending to and reading the durable run log.
pub struct RunLog {
    pool: DbPool,
}

impl RunLog {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append one event to a run's log and mirror it into the query index,
    /// atomically. Returns the assigned sequence number.
    pub fn append(&self, run_id: &RunId, event: &RunEvent) -> Result<i64> {
        let json = serde_json::to_string(event)
            .map_err(|e| Error::database(format!("serialize event: {e}")))?;

        let conn = get_conn(&self.pool)?;
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        let seq = run_log::append_event(&tx, run_id, &json)?;
        apply_to_index(&tx, run_id, event)?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;

        tracing::debug!(run_id = %run_id, seq, event = event.name(), "Appended run event");
        Ok(seq)
    }

    /// Read a run's full event history in append order.
    pub fn read(&self, run_id: &RunId) -> Result<Vec<RunEvent>> {
        let conn = get_conn(&self.pool)?;
        let entries = run_log::list_events(&conn, run_id)?;
        entries
            .into_iter()
            .map(|e| {
                serde_json::from_str(&e.event).map_err(|err| {
                    Error::database(format!(
                        "corrupt event at {run_id} seq {}: {err}",
                        e.seq
                    ))
                })
            })
            .collect()
    }
}

/// Apply one event's projection to the query index.
///
/// Must run on the same transaction as the log append.
fn apply_to_index(conn: &Connection, run_id: &RunId, event: &RunEvent) -> Result<()> {
    match event {
        RunEvent::RunCreated {
            owner_id,
            slot,
            scenes: scene_specs,
            params,
        } => {
            runs::insert_run(conn, run_id, owner_id, *slot, params)?;
            scenes::insert_scenes(conn, run_id, scene_specs)?;
        }
        RunEvent::RunStatusChanged { status } => {
            runs::update_run_status(conn, run_id, *status)?;
        }
        RunEvent::VoiceoverReady { voiceover_ref } => {
            runs::set_voiceover_ref(conn, run_id, voiceover_ref)?;
        }
        RunEvent::SceneStatusChanged {
            scene_index,
            status,
            result_ref,
            reason,
        } => {
            scenes::update_scene_status(
                conn,
                run_id,
                *scene_index,
                *status,
                result_ref.as_ref(),
                reason.as_deref(),
            )?;
        }
        RunEvent::AttemptStarted {
            scene_index,
            activity,
            ..
        } => {
            if let Some(idx) = scene_index {
                scenes::record_attempt(conn, run_id, *idx, activity)?;
            }
        }
        RunEvent::AttemptFinished {
            scene_index,
            activity,
            idempotency_key,
            outcome,
            result,
            ..
        } => {
            activity_results::record(
                conn,
                idempotency_key,
                run_id,
                *scene_index,
                activity,
                *outcome,
                result.as_ref(),
            )?;
        }
        RunEvent::RunCompleted { final_ref } => {
            runs::mark_completed(conn, run_id, final_ref)?;
        }
        RunEvent::RunFailed { failures } => {
            runs::mark_failed(conn, run_id, failures)?;
        }
        RunEvent::RunCancelled => {
            // Cancellation projects as a failed run with a fixed reason.
            runs::mark_failed(
                conn,
                run_id,
                &[FailureDetail::run_level("cancel", "cancelled")],
            )?;
        }
    }
    Ok(())
}
