//! Annotation job API handlers
//!
//! POST /annotate/start, GET /annotate/status/{id}, and the
//! pause/resume/cancel controls. Chunk advancement itself happens in the
//! background driver; these handlers only manipulate persisted job rows.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use clx_common::events::JobStatus;

use crate::error::{ApiError, ApiResult};
use crate::models::JobProgress;
use crate::AppState;

/// POST /annotate/start request
#[derive(Debug, Deserialize)]
pub struct StartJobRequest {
    pub target_id: String,
}

/// POST /annotate/start response
#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub job_id: Uuid,
    pub target_id: String,
    pub status: JobStatus,
    pub total_songs: usize,
    pub total_words: usize,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// GET /annotate/status/{id} response
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub target_id: String,
    pub status: JobStatus,
    pub total_songs: usize,
    pub total_words: usize,
    pub processed_words: usize,
    pub cached_words: usize,
    pub new_words: usize,
    pub chunks_processed: usize,
    pub progress: JobProgress,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Transition (pause/resume/cancel) response
#[derive(Debug, Serialize)]
pub struct JobTransitionResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub processed_words: usize,
    pub total_words: usize,
}

/// POST /annotate/start
///
/// Creates and persists the job; the background driver picks it up on its
/// next tick. 409 when the target already has an active job, 400 when the
/// target has nothing to annotate.
pub async fn start_job(
    State(state): State<AppState>,
    Json(request): Json<StartJobRequest>,
) -> ApiResult<Json<StartJobResponse>> {
    if request.target_id.trim().is_empty() {
        return Err(ApiError::BadRequest("target_id must not be empty".to_string()));
    }

    let job = state.orchestrator.start_job(&request.target_id).await?;

    Ok(Json(StartJobResponse {
        job_id: job.id,
        target_id: job.target_id,
        status: job.status,
        total_songs: job.total_songs,
        total_words: job.total_words,
        started_at: job.started_at,
    }))
}

/// GET /annotate/status/{id}
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = crate::db::jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job {} not found", job_id)))?;

    let progress = job.derive_progress(chrono::Utc::now());

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        target_id: job.target_id,
        status: job.status,
        total_songs: job.total_songs,
        total_words: job.total_words,
        processed_words: job.processed_words,
        cached_words: job.cached_words,
        new_words: job.new_words,
        chunks_processed: job.chunks_processed,
        progress,
        started_at: job.started_at,
        finished_at: job.finished_at,
        error_message: job.error_message,
    }))
}

/// POST /annotate/{id}/pause
pub async fn pause_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobTransitionResponse>> {
    let job = state.orchestrator.pause_job(job_id).await?;
    Ok(Json(transition_response(job)))
}

/// POST /annotate/{id}/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobTransitionResponse>> {
    let job = state.orchestrator.resume_job(job_id).await?;
    Ok(Json(transition_response(job)))
}

/// POST /annotate/{id}/cancel
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobTransitionResponse>> {
    let job = state.orchestrator.cancel_job(job_id).await?;
    Ok(Json(transition_response(job)))
}

fn transition_response(job: crate::models::AnnotationJob) -> JobTransitionResponse {
    JobTransitionResponse {
        job_id: job.id,
        status: job.status,
        processed_words: job.processed_words,
        total_words: job.total_words,
    }
}

/// Build annotation job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/annotate/start", post(start_job))
        .route("/annotate/status/:job_id", get(job_status))
        .route("/annotate/:job_id/pause", post(pause_job))
        .route("/annotate/:job_id/resume", post(resume_job))
        .route("/annotate/:job_id/cancel", post(cancel_job))
}
