//! Run management route handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use rf_core::{OwnerId, RunId, RunParams, RunStatus, SceneSpec};
use rf_db::models::{RunRow, SceneRow};
use rf_engine::RunSubmission;

use crate::context::AppContext;
use crate::error::AppError;

/// Query parameters for listing runs.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListRunsParams {
    pub owner_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// One scene in a run submission.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SceneInput {
    pub image_prompt: String,
    pub video_prompt: String,
}

/// Request body for submitting a new run.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SubmitRunRequest {
    pub run_id: String,
    pub owner_id: String,
    pub scenes: Vec<SceneInput>,
    pub script: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Response for an accepted run submission.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunAcceptedResponse {
    pub run_id: String,
    pub slot: u32,
    pub status: String,
}

/// A failure attached to a run or one of its scenes.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FailureResponse {
    pub scene_index: Option<u32>,
    pub activity: String,
    pub reason: String,
}

/// Per-scene progress in a run response.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SceneResponse {
    pub scene_index: u32,
    pub status: String,
    pub image_prompt: String,
    pub video_prompt: String,
    pub image_attempts: u32,
    pub video_attempts: u32,
    pub image_ref: Option<String>,
    pub video_ref: Option<String>,
    pub failure: Option<String>,
}

/// Full run detail.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunResponse {
    pub run_id: String,
    pub owner_id: String,
    pub slot: u32,
    pub status: String,
    pub voiceover_ref: Option<String>,
    pub final_ref: Option<String>,
    pub failures: Option<Vec<FailureResponse>>,
    pub created_at: String,
    pub terminal_at: Option<String>,
    pub scenes: Vec<SceneResponse>,
}

/// Run summary for list responses (no per-scene detail).
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RunSummaryResponse {
    pub run_id: String,
    pub owner_id: String,
    pub slot: u32,
    pub status: String,
    pub final_ref: Option<String>,
    pub created_at: String,
    pub terminal_at: Option<String>,
}

impl RunSummaryResponse {
    fn from_model(run: &RunRow) -> Self {
        Self {
            run_id: run.run_id.to_string(),
            owner_id: run.owner_id.to_string(),
            slot: run.slot,
            status: run.status.to_string(),
            final_ref: run.final_ref.as_ref().map(|r| r.to_string()),
            created_at: run.created_at.clone(),
            terminal_at: run.terminal_at.clone(),
        }
    }
}

impl SceneResponse {
    fn from_model(scene: &SceneRow) -> Self {
        Self {
            scene_index: scene.scene_index,
            status: scene.status.to_string(),
            image_prompt: scene.image_prompt.clone(),
            video_prompt: scene.video_prompt.clone(),
            image_attempts: scene.image_attempts,
            video_attempts: scene.video_attempts,
            image_ref: scene.image_ref.as_ref().map(|r| r.to_string()),
            video_ref: scene.video_ref.as_ref().map(|r| r.to_string()),
            failure: scene.failure.clone(),
        }
    }
}

impl RunResponse {
    fn from_model(run: &RunRow, scenes: &[SceneRow]) -> Self {
        Self {
            run_id: run.run_id.to_string(),
            owner_id: run.owner_id.to_string(),
            slot: run.slot,
            status: run.status.to_string(),
            voiceover_ref: run.voiceover_ref.as_ref().map(|r| r.to_string()),
            final_ref: run.final_ref.as_ref().map(|r| r.to_string()),
            failures: run.failure_detail.as_ref().map(|details| {
                details
                    .iter()
                    .map(|d| FailureResponse {
                        scene_index: d.scene_index,
                        activity: d.activity.clone(),
                        reason: d.reason.clone(),
                    })
                    .collect()
            }),
            created_at: run.created_at.clone(),
            terminal_at: run.terminal_at.clone(),
            scenes: scenes.iter().map(SceneResponse::from_model).collect(),
        }
    }
}

/// POST /api/runs
#[utoipa::path(
    post,
    path = "/api/runs",
    request_body = SubmitRunRequest,
    responses(
        (status = 202, description = "Run accepted", body = RunAcceptedResponse),
        (status = 400, description = "Invalid submission"),
        (status = 409, description = "Duplicate run ID or owner at concurrency limit")
    )
)]
pub async fn submit_run(
    State(ctx): State<AppContext>,
    Json(payload): Json<SubmitRunRequest>,
) -> Result<impl IntoResponse, AppError> {
    let defaults = RunParams::default();
    let submission = RunSubmission {
        run_id: RunId::new(&payload.run_id),
        owner_id: OwnerId::new(&payload.owner_id),
        scenes: payload
            .scenes
            .into_iter()
            .map(|s| SceneSpec {
                image_prompt: s.image_prompt,
                video_prompt: s.video_prompt,
            })
            .collect(),
        params: RunParams {
            script: payload.script,
            language: payload.language.unwrap_or(defaults.language),
            width: payload.width.unwrap_or(defaults.width),
            height: payload.height.unwrap_or(defaults.height),
        },
    };

    let slot = ctx.orchestrator.start_run(submission)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(RunAcceptedResponse {
            run_id: payload.run_id,
            slot,
            status: RunStatus::Pending.to_string(),
        }),
    ))
}

/// GET /api/runs
#[utoipa::path(
    get,
    path = "/api/runs",
    params(ListRunsParams),
    responses(
        (status = 200, description = "List runs", body = Vec<RunSummaryResponse>)
    )
)]
pub async fn list_runs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListRunsParams>,
) -> Result<Json<Vec<RunSummaryResponse>>, AppError> {
    let status = match params.status.as_deref() {
        Some(s) => Some(
            s.parse::<RunStatus>()
                .map_err(|_| rf_core::Error::validation(format!("unknown status: {s}")))?,
        ),
        None => None,
    };
    let owner = params.owner_id.map(OwnerId::new);

    let conn = rf_db::get_conn(&ctx.db)?;
    let runs = rf_db::queries::runs::list_runs(&conn, owner.as_ref(), status, params.limit)?;
    let responses = runs.iter().map(RunSummaryResponse::from_model).collect();
    Ok(Json(responses))
}

/// GET /api/runs/:run_id
#[utoipa::path(
    get,
    path = "/api/runs/{run_id}",
    params(("run_id" = String, Path, description = "Run ID")),
    responses(
        (status = 200, description = "Run details", body = RunResponse),
        (status = 404, description = "Run not found")
    )
)]
pub async fn get_run(
    State(ctx): State<AppContext>,
    Path(run_id): Path<String>,
) -> Result<Json<RunResponse>, AppError> {
    let run_id = RunId::new(run_id);

    let conn = rf_db::get_conn(&ctx.db)?;
    let run = rf_db::queries::runs::get_run(&conn, &run_id)?
        .ok_or_else(|| rf_core::Error::not_found("run", &run_id))?;
    let scenes = rf_db::queries::scenes::list_scenes(&conn, &run_id)?;

    Ok(Json(RunResponse::from_model(&run, &scenes)))
}

/// POST /api/runs/:run_id/cancel
#[utoipa::path(
    post,
    path = "/api/runs/{run_id}/cancel",
    params(("run_id" = String, Path, description = "Run ID")),
    responses(
        (status = 200, description = "Cancellation delivered or run already terminal"),
        (status = 404, description = "Run not found")
    )
)]
pub async fn cancel_run(
    State(ctx): State<AppContext>,
    Path(run_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let run_id = RunId::new(run_id);
    let delivered = ctx.orchestrator.cancel_run(&run_id)?;

    let status = if delivered { "cancelling" } else { "already_terminal" };
    Ok(Json(serde_json::json!({ "status": status })))
}
