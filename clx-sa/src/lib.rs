//! clx-sa library interface
//!
//! Exposes the pipeline components and HTTP surface for integration
//! testing.

pub mod annotate;
pub mod api;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod monitor;
pub mod taxonomy;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;

use clx_common::events::EventBus;

use crate::jobs::JobOrchestrator;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Job lifecycle coordinator (shared with the chunk driver)
    pub orchestrator: JobOrchestrator,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, orchestrator: JobOrchestrator) -> Self {
        Self {
            db,
            event_bus,
            orchestrator,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::job_routes())
        .merge(api::tagset_routes())
        .merge(api::anomaly_routes())
        .merge(api::curation_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        // CORS for the external curation UI
        .layer(CorsLayer::permissive())
        .with_state(state)
}
