//! Anomaly feed API handlers
//!
//! Read side of the Anomaly Monitor plus the two human actions:
//! acknowledge (intent to act) and resolve (with notes).

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use clx_common::events::ClxEvent;

use crate::error::{ApiError, ApiResult};
use crate::models::AnomalyDetection;
use crate::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AcknowledgeRequest {
    pub acknowledged_by: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ResolveRequest {
    pub notes: Option<String>,
}

/// GET /anomalies - unresolved alerts, newest first
pub async fn list_unresolved(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<AnomalyDetection>>> {
    Ok(Json(crate::db::anomalies::list_unresolved(&state.db).await?))
}

/// GET /anomalies/history?limit=N - all alerts, newest first
pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<AnomalyDetection>>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, 1000);
    Ok(Json(crate::db::anomalies::list_all(&state.db, limit).await?))
}

/// POST /anomalies/{id}/acknowledge
pub async fn acknowledge(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AcknowledgeRequest>,
) -> ApiResult<Json<AnomalyDetection>> {
    if request.acknowledged_by.trim().is_empty() {
        return Err(ApiError::BadRequest("acknowledged_by must not be empty".to_string()));
    }

    crate::db::anomalies::acknowledge(&state.db, id, &request.acknowledged_by).await?;
    let anomaly = crate::db::anomalies::load_anomaly(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Anomaly {} vanished after acknowledge", id)))?;
    Ok(Json(anomaly))
}

/// POST /anomalies/{id}/resolve
pub async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<AnomalyDetection>> {
    crate::db::anomalies::resolve(&state.db, id, request.notes.as_deref()).await?;
    let anomaly = crate::db::anomalies::load_anomaly(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Anomaly {} vanished after resolve", id)))?;

    state.event_bus.emit_lossy(ClxEvent::AnomalyResolved {
        anomaly_id: anomaly.id,
        check_name: anomaly.check_name.clone(),
        auto_resolved: false,
        timestamp: chrono::Utc::now(),
    });

    Ok(Json(anomaly))
}

/// Build anomaly feed routes
pub fn anomaly_routes() -> Router<AppState> {
    Router::new()
        .route("/anomalies", get(list_unresolved))
        .route("/anomalies/history", get(list_history))
        .route("/anomalies/:id/acknowledge", post(acknowledge))
        .route("/anomalies/:id/resolve", post(resolve))
}
