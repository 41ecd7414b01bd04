//! rf-server: HTTP API server and orchestration host.
//!
//! This crate ties together all other rf-* crates into a running server
//! application. It provides:
//!
//! - Axum-based HTTP API with OpenAPI docs and SSE
//! - The run orchestrator driving generation runs to completion
//! - Crash recovery by replaying non-terminal run logs at startup
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_engine::clients::{FfmpegTransform, HttpInferenceClient, HttpSpeechClient};
use rf_engine::{Orchestrator, WebhookNotifier};

use crate::context::AppContext;

/// Start the reelforge server.
///
/// This is the main entry point. It initializes the database, constructs the
/// [`AppContext`] and the orchestrator, resumes any runs interrupted by a
/// previous shutdown, and serves the HTTP API until a shutdown signal is
/// received.
pub async fn start(config: Config) -> rf_core::Result<()> {
    // Validate configuration.
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    // Initialize database.
    let data_dir = &config.storage.data_dir;
    if !data_dir.exists() {
        std::fs::create_dir_all(data_dir)?;
        tracing::info!("Created data directory {}", data_dir.display());
    }
    let db_path = data_dir.join("reelforge.db");
    let existed = db_path.exists();
    let db_str = db_path.to_string_lossy();
    let db = rf_db::init_pool(&db_str)?;
    if existed {
        tracing::info!("Database opened (existing) at {db_str}");
    } else {
        tracing::info!("Database created (new) at {db_str}");
    }

    // Build event bus.
    let event_bus = Arc::new(EventBus::default());

    // Build collaborator clients.
    let inference = Arc::new(HttpInferenceClient::new(&config.inference.base_url));
    let speech = Arc::new(HttpSpeechClient::new(
        &config.voice.base_url,
        &config.voice.voice,
    ));
    let transform = Arc::new(FfmpegTransform::new(
        config.media.ffmpeg_bin.clone(),
        data_dir.join("media"),
    ));
    let webhook = Arc::new(WebhookNotifier::new(
        config.webhook.url.clone(),
        config.webhook.timeout_secs,
    ));

    // Cancellation token for graceful shutdown. Every run driver holds a
    // child of this token.
    let cancel = CancellationToken::new();

    let orchestrator = Orchestrator::new(
        db.clone(),
        event_bus.clone(),
        &config,
        inference,
        speech,
        transform,
        webhook,
        cancel.clone(),
    );

    // Resume runs interrupted by a previous shutdown or crash.
    let resumed = orchestrator.resume_incomplete_runs()?;
    if resumed > 0 {
        tracing::info!("Resumed {resumed} incomplete run(s)");
    }

    let ctx = AppContext {
        db,
        config: Arc::new(config.clone()),
        event_bus,
        orchestrator,
    };

    // Build and start the HTTP server.
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| rf_core::Error::Internal(format!("Invalid server address: {e}")))?;

    let app = router::build_router(ctx);

    tracing::info!("Starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| rf_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|e| rf_core::Error::Internal(format!("Server error: {e}")))?;

    // Signal all run drivers to stop; in-flight work parks at its last
    // durable log entry and is resumed on the next start.
    cancel.cancel();

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
