//! Axum router construction.
//!
//! Builds the full application router with all route groups and middleware
//! layers.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::context::AppContext;
use crate::routes;

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::runs::submit_run,
        routes::runs::list_runs,
        routes::runs::get_run,
        routes::runs::cancel_run,
        routes::health::health_check,
    ),
    components(schemas(
        routes::runs::SubmitRunRequest,
        routes::runs::SceneInput,
        routes::runs::RunAcceptedResponse,
        routes::runs::RunResponse,
        routes::runs::RunSummaryResponse,
        routes::runs::SceneResponse,
        routes::runs::FailureResponse,
        routes::health::HealthResponse,
    ))
)]
struct ApiDoc;

/// Build the complete Axum router.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        // Runs
        .route(
            "/runs",
            get(routes::runs::list_runs).post(routes::runs::submit_run),
        )
        .route("/runs/{run_id}", get(routes::runs::get_run))
        .route("/runs/{run_id}/cancel", post(routes::runs::cancel_run))
        // Events
        .route("/events", get(routes::events::events_handler))
        .route("/events/recent", get(routes::events::recent_events));

    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api", api)
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
