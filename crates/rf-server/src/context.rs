//! Application context shared across route handlers.

use std::sync::Arc;

use rf_core::config::Config;
use rf_core::events::EventBus;
use rf_db::DbPool;
use rf_engine::Orchestrator;

/// Application context shared by all request handlers (via Axum state).
///
/// This is cheaply cloneable because it only holds `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    /// Database connection pool.
    pub db: DbPool,
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    /// Broadcast event bus for SSE.
    pub event_bus: Arc<EventBus>,
    /// The run orchestrator.
    pub orchestrator: Arc<Orchestrator>,
}
