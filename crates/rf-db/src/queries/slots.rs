//! Per-owner concurrency slot table.
//!
//! A slot is held by inserting a row under `(owner_id, slot_index)`; the
//! primary key makes the claim a compare-and-swap, so two concurrent
//! submissions can never hold the same slot.

use chrono::Utc;
use rusqlite::Connection;
use rf_core::{Error, OwnerId, Result, RunId};

use crate::models::SlotRow;

const COLS: &str = "owner_id, slot_index, run_id, acquired_at";

/// Attempt to claim one slot for an owner. Returns `true` when the claim
/// won; `false` when the slot is already held.
pub fn try_claim(
    conn: &Connection,
    owner_id: &OwnerId,
    slot_index: u32,
    run_id: &RunId,
) -> Result<bool> {
    let now = Utc::now().to_rfc3339();
    let n = conn
        .execute(
            "INSERT OR IGNORE INTO slots (owner_id, slot_index, run_id, acquired_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![owner_id.as_str(), slot_index, run_id.as_str(), &now],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// Release the slot held by a run. Returns `true` when a slot was
/// actually released; `false` makes a double release visible to callers.
pub fn release(conn: &Connection, owner_id: &OwnerId, run_id: &RunId) -> Result<bool> {
    let n = conn
        .execute(
            "DELETE FROM slots WHERE owner_id = ?1 AND run_id = ?2",
            rusqlite::params![owner_id.as_str(), run_id.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

/// The slot currently held by a run, if any.
pub fn slot_for_run(conn: &Connection, run_id: &RunId) -> Result<Option<SlotRow>> {
    let q = format!("SELECT {COLS} FROM slots WHERE run_id = ?1");
    let result = conn.query_row(&q, [run_id.as_str()], SlotRow::from_row);
    match result {
        Ok(s) => Ok(Some(s)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Number of slots an owner currently holds.
pub fn count_for_owner(conn: &Connection, owner_id: &OwnerId) -> Result<u32> {
    conn.query_row(
        "SELECT COUNT(*) FROM slots WHERE owner_id = ?1",
        [owner_id.as_str()],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrations::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn claim_is_exclusive() {
        let conn = conn();
        let owner = OwnerId::new("u1");
        assert!(try_claim(&conn, &owner, 0, &RunId::new("r1")).unwrap());
        assert!(!try_claim(&conn, &owner, 0, &RunId::new("r2")).unwrap());
    }

    #[test]
    fn different_slots_and_owners_are_independent() {
        let conn = conn();
        assert!(try_claim(&conn, &OwnerId::new("u1"), 0, &RunId::new("r1")).unwrap());
        assert!(try_claim(&conn, &OwnerId::new("u1"), 1, &RunId::new("r2")).unwrap());
        assert!(try_claim(&conn, &OwnerId::new("u2"), 0, &RunId::new("r3")).unwrap());
    }

    #[test]
    fn release_frees_the_slot() {
        let conn = conn();
        let owner = OwnerId::new("u1");
        try_claim(&conn, &owner, 0, &RunId::new("r1")).unwrap();

        assert!(release(&conn, &owner, &RunId::new("r1")).unwrap());
        assert!(try_claim(&conn, &owner, 0, &RunId::new("r2")).unwrap());
    }

    #[test]
    fn double_release_is_visible() {
        let conn = conn();
        let owner = OwnerId::new("u1");
        try_claim(&conn, &owner, 0, &RunId::new("r1")).unwrap();

        assert!(release(&conn, &owner, &RunId::new("r1")).unwrap());
        assert!(!release(&conn, &owner, &RunId::new("r1")).unwrap());
    }

    #[test]
    fn slot_for_run_and_count() {
        let conn = conn();
        let owner = OwnerId::new("u1");
        try_claim(&conn, &owner, 2, &RunId::new("r1")).unwrap();

        let slot = slot_for_run(&conn, &RunId::new("r1")).unwrap().unwrap();
        assert_eq!(slot.slot_index, 2);
        assert_eq!(count_for_owner(&conn, &owner).unwrap(), 1);
        assert!(slot_for_run(&conn, &RunId::new("r9")).unwrap().is_none());
    }
}
