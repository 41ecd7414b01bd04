//! Query-index operations for scenes.

use rusqlite::Connection;
use rf_core::{Error, Result, ResultRef, RunId, SceneSpec, SceneStatus};

use crate::models::SceneRow;

const COLS: &str = "run_id, scene_index, image_prompt, video_prompt, status,
    image_attempts, video_attempts, image_ref, video_ref, failure";

/// Insert index rows for every scene of a new run.
pub fn insert_scenes(conn: &Connection, run_id: &RunId, scenes: &[SceneSpec]) -> Result<()> {
    let mut stmt = conn
        .prepare(
            "INSERT INTO scenes (run_id, scene_index, image_prompt, video_prompt)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    for (i, scene) in scenes.iter().enumerate() {
        stmt.execute(rusqlite::params![
            run_id.as_str(),
            i as u32,
            scene.image_prompt,
            scene.video_prompt
        ])
        .map_err(|e| Error::database(e.to_string()))?;
    }
    Ok(())
}

/// Get a single scene.
pub fn get_scene(conn: &Connection, run_id: &RunId, scene_index: u32) -> Result<Option<SceneRow>> {
    let q = format!("SELECT {COLS} FROM scenes WHERE run_id = ?1 AND scene_index = ?2");
    let result = conn.query_row(
        &q,
        rusqlite::params![run_id.as_str(), scene_index],
        SceneRow::from_row,
    );
    match result {
        Ok(s) => Ok(Some(s)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// List a run's scenes in scene_index order.
pub fn list_scenes(conn: &Connection, run_id: &RunId) -> Result<Vec<SceneRow>> {
    let q = format!("SELECT {COLS} FROM scenes WHERE run_id = ?1 ORDER BY scene_index ASC");
    let mut stmt = conn.prepare(&q).map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([run_id.as_str()], SceneRow::from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(rows)
}

/// Update a scene's status, recording the stage artifact or failure reason
/// that accompanied the transition.
pub fn update_scene_status(
    conn: &Connection,
    run_id: &RunId,
    scene_index: u32,
    status: SceneStatus,
    result_ref: Option<&ResultRef>,
    failure: Option<&str>,
) -> Result<bool> {
    // The artifact column depends on which stage just finished.
    let ref_column = match status {
        SceneStatus::ImageDone => Some("image_ref"),
        SceneStatus::VideoDone => Some("video_ref"),
        _ => None,
    };

    let n = match (ref_column, result_ref) {
        (Some(col), Some(r)) => conn
            .execute(
                &format!(
                    "UPDATE scenes SET status = ?1, {col} = ?2, failure = ?3
                     WHERE run_id = ?4 AND scene_index = ?5"
                ),
                rusqlite::params![
                    status.to_string(),
                    r.as_str(),
                    failure,
                    run_id.as_str(),
                    scene_index
                ],
            )
            .map_err(|e| Error::database(e.to_string()))?,
        _ => conn
            .execute(
                "UPDATE scenes SET status = ?1, failure = ?2
                 WHERE run_id = ?3 AND scene_index = ?4",
                rusqlite::params![status.to_string(), failure, run_id.as_str(), scene_index],
            )
            .map_err(|e| Error::database(e.to_string()))?,
    };
    Ok(n > 0)
}

/// Bump the attempt counter for a scene's image or video stage.
pub fn record_attempt(
    conn: &Connection,
    run_id: &RunId,
    scene_index: u32,
    activity: &str,
) -> Result<bool> {
    let column = match activity {
        "generate_image" => "image_attempts",
        "generate_video" => "video_attempts",
        _ => return Ok(false),
    };
    let n = conn
        .execute(
            &format!(
                "UPDATE scenes SET {column} = {column} + 1
                 WHERE run_id = ?1 AND scene_index = ?2"
            ),
            rusqlite::params![run_id.as_str(), scene_index],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations;
    use crate::queries::runs;
    use rf_core::{OwnerId, RunParams};

    fn conn_with_run(scenes: &[SceneSpec]) -> (Connection, RunId) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        migrations::run_migrations(&conn).unwrap();
        let run = RunId::new("r1");
        runs::insert_run(&conn, &run, &OwnerId::new("u1"), 0, &RunParams::default()).unwrap();
        insert_scenes(&conn, &run, scenes).unwrap();
        (conn, run)
    }

    fn specs(n: usize) -> Vec<SceneSpec> {
        (0..n)
            .map(|i| SceneSpec {
                image_prompt: format!("image {i}"),
                video_prompt: format!("video {i}"),
            })
            .collect()
    }

    #[test]
    fn insert_and_list_ordered() {
        let (conn, run) = conn_with_run(&specs(3));
        let scenes = list_scenes(&conn, &run).unwrap();
        assert_eq!(scenes.len(), 3);
        for (i, s) in scenes.iter().enumerate() {
            assert_eq!(s.scene_index, i as u32);
            assert_eq!(s.status, SceneStatus::Pending);
            assert_eq!(s.image_prompt, format!("image {i}"));
        }
    }

    #[test]
    fn image_done_records_ref() {
        let (conn, run) = conn_with_run(&specs(1));
        update_scene_status(
            &conn,
            &run,
            0,
            SceneStatus::ImageDone,
            Some(&ResultRef::new("img.png")),
            None,
        )
        .unwrap();

        let scene = get_scene(&conn, &run, 0).unwrap().unwrap();
        assert_eq!(scene.status, SceneStatus::ImageDone);
        assert_eq!(scene.image_ref.unwrap().as_str(), "img.png");
        assert!(scene.video_ref.is_none());
    }

    #[test]
    fn failure_records_reason() {
        let (conn, run) = conn_with_run(&specs(1));
        update_scene_status(
            &conn,
            &run,
            0,
            SceneStatus::Failed,
            None,
            Some("retries exhausted"),
        )
        .unwrap();

        let scene = get_scene(&conn, &run, 0).unwrap().unwrap();
        assert_eq!(scene.status, SceneStatus::Failed);
        assert_eq!(scene.failure.as_deref(), Some("retries exhausted"));
    }

    #[test]
    fn attempt_counters_per_stage() {
        let (conn, run) = conn_with_run(&specs(1));
        record_attempt(&conn, &run, 0, "generate_image").unwrap();
        record_attempt(&conn, &run, 0, "generate_image").unwrap();
        record_attempt(&conn, &run, 0, "generate_video").unwrap();

        let scene = get_scene(&conn, &run, 0).unwrap().unwrap();
        assert_eq!(scene.image_attempts, 2);
        assert_eq!(scene.video_attempts, 1);
    }

    #[test]
    fn missing_scene_returns_none() {
        let (conn, run) = conn_with_run(&specs(1));
        assert!(get_scene(&conn, &run, 7).unwrap().is_none());
    }
}
