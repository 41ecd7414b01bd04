//! Rust structs mapping to database tables.
//!
//! Each model implements `from_row` for constructing itself from a
//! `rusqlite::Row`.

use std::str::FromStr;

use rf_core::{
    AttemptOutcome, FailureDetail, OwnerId, ResultRef, RunId, RunParams, RunStatus, SceneStatus,
};

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Parse an enum stored as text via its `FromStr` impl.
fn parse_enum<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e: T::Err| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            e.to_string().into(),
        )
    })
}

/// Parse a JSON-encoded column.
fn parse_json<T: serde::de::DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Parse an optional JSON-encoded column.
fn parse_opt_json<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    match s {
        Some(v) => serde_json::from_str(&v).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        }),
        None => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

/// A single appended row from the run log. `event` is the serialized
/// event body; callers deserialize it with the engine's event type.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub run_id: RunId,
    pub seq: i64,
    pub event: String,
    pub recorded_at: String,
}

impl LogEntry {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: RunId::new(row.get::<_, String>(0)?),
            seq: row.get(1)?,
            event: row.get(2)?,
            recorded_at: row.get(3)?,
        })
    }
}

// ---------------------------------------------------------------------------
// RunRow
// ---------------------------------------------------------------------------

/// Query-index row for a run.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: RunId,
    pub owner_id: OwnerId,
    pub slot: u32,
    pub status: RunStatus,
    pub params: RunParams,
    pub voiceover_ref: Option<ResultRef>,
    pub final_ref: Option<ResultRef>,
    pub failure_detail: Option<Vec<FailureDetail>>,
    pub created_at: String,
    pub terminal_at: Option<String>,
}

impl RunRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: RunId::new(row.get::<_, String>(0)?),
            owner_id: OwnerId::new(row.get::<_, String>(1)?),
            slot: row.get(2)?,
            status: parse_enum(row, 3)?,
            params: parse_json(row, 4)?,
            voiceover_ref: row.get::<_, Option<String>>(5)?.map(ResultRef::new),
            final_ref: row.get::<_, Option<String>>(6)?.map(ResultRef::new),
            failure_detail: parse_opt_json(row, 7)?,
            created_at: row.get(8)?,
            terminal_at: row.get(9)?,
        })
    }
}

// ---------------------------------------------------------------------------
// SceneRow
// ---------------------------------------------------------------------------

/// Query-index row for a scene within a run.
#[derive(Debug, Clone)]
pub struct SceneRow {
    pub run_id: RunId,
    pub scene_index: u32,
    pub image_prompt: String,
    pub video_prompt: String,
    pub status: SceneStatus,
    pub image_attempts: u32,
    pub video_attempts: u32,
    pub image_ref: Option<ResultRef>,
    pub video_ref: Option<ResultRef>,
    pub failure: Option<String>,
}

impl SceneRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: RunId::new(row.get::<_, String>(0)?),
            scene_index: row.get(1)?,
            image_prompt: row.get(2)?,
            video_prompt: row.get(3)?,
            status: parse_enum(row, 4)?,
            image_attempts: row.get(5)?,
            video_attempts: row.get(6)?,
            image_ref: row.get::<_, Option<String>>(7)?.map(ResultRef::new),
            video_ref: row.get::<_, Option<String>>(8)?.map(ResultRef::new),
            failure: row.get(9)?,
        })
    }
}

// ---------------------------------------------------------------------------
// ActivityResultRow
// ---------------------------------------------------------------------------

/// Recorded outcome of an activity attempt, keyed by idempotency key.
#[derive(Debug, Clone)]
pub struct ActivityResultRow {
    pub idempotency_key: String,
    pub run_id: RunId,
    pub scene_index: Option<u32>,
    pub activity: String,
    pub outcome: AttemptOutcome,
    pub result: Option<serde_json::Value>,
    pub recorded_at: String,
}

impl ActivityResultRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            idempotency_key: row.get(0)?,
            run_id: RunId::new(row.get::<_, String>(1)?),
            scene_index: row.get(2)?,
            activity: row.get(3)?,
            outcome: parse_enum(row, 4)?,
            result: parse_opt_json(row, 5)?,
            recorded_at: row.get(6)?,
        })
    }
}

// ---------------------------------------------------------------------------
// SlotRow
// ---------------------------------------------------------------------------

/// A held admission slot.
#[derive(Debug, Clone)]
pub struct SlotRow {
    pub owner_id: OwnerId,
    pub slot_index: u32,
    pub run_id: RunId,
    pub acquired_at: String,
}

impl SlotRow {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        Ok(Self {
            owner_id: OwnerId::new(row.get::<_, String>(0)?),
            slot_index: row.get(1)?,
            run_id: RunId::new(row.get::<_, String>(2)?),
            acquired_at: row.get(3)?,
        })
    }
}
