//! Classification curation API handler
//!
//! Lets a human pin the classification of a (word, context_hash) pair.
//! Curation-sourced entries always overwrite and are never overwritten by
//! automated passes.

use axum::{extract::State, routing::put, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::ClassificationSource;
use crate::taxonomy::TaxonomySnapshot;
use crate::AppState;

/// Curation writes are definitive
const CURATION_CONFIDENCE: f64 = 1.0;

/// PUT /cache/curate request
#[derive(Debug, Deserialize)]
pub struct CurateRequest {
    pub word: String,
    pub context_hash: String,
    pub tag_code: String,
}

#[derive(Debug, Serialize)]
pub struct CurateResponse {
    pub word: String,
    pub context_hash: String,
    pub tag_code: String,
    pub source: ClassificationSource,
}

/// PUT /cache/curate
///
/// The code must be active with an active domain at write time; curation is
/// not an escape hatch around taxonomy validation.
pub async fn curate(
    State(state): State<AppState>,
    Json(request): Json<CurateRequest>,
) -> ApiResult<Json<CurateResponse>> {
    let word = request.word.trim().to_lowercase();
    if word.is_empty() || request.context_hash.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "word and context_hash must not be empty".to_string(),
        ));
    }

    let snapshot = TaxonomySnapshot::load(&state.db).await?;
    if !snapshot.is_valid_tagset(&request.tag_code) || !snapshot.has_active_domain(&request.tag_code)
    {
        return Err(ApiError::BadRequest(format!(
            "Tag code {} is not active",
            request.tag_code
        )));
    }

    let ttl_days = crate::db::settings::cache_ttl_days(&state.db).await?;
    crate::db::cache::put(
        &state.db,
        &word,
        &request.context_hash,
        &request.tag_code,
        CURATION_CONFIDENCE,
        ClassificationSource::Curation,
        ttl_days,
    )
    .await?;

    tracing::info!(
        word = %word,
        context_hash = %request.context_hash,
        tag_code = %request.tag_code,
        "Classification curated"
    );

    Ok(Json(CurateResponse {
        word,
        context_hash: request.context_hash,
        tag_code: request.tag_code,
        source: ClassificationSource::Curation,
    }))
}

/// Build curation routes
pub fn curation_routes() -> Router<AppState> {
    Router::new().route("/cache/curate", put(curate))
}
