//! Taxonomy curation API handlers
//!
//! Proposals are created pending and only become classifiable after an
//! explicit approve; running jobs pick the change up on their next chunk.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::models::tagset::top_level_prefix;
use crate::models::{Tagset, TagsetStatus};
use crate::AppState;

/// POST /tagsets request (proposal)
#[derive(Debug, Deserialize)]
pub struct ProposeTagsetRequest {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parent_code: Option<String>,
    pub depth_level: u8,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct TagsetResponse {
    pub code: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_code: Option<String>,
    pub depth_level: u8,
    pub status: TagsetStatus,
    pub examples: Vec<String>,
}

impl From<Tagset> for TagsetResponse {
    fn from(t: Tagset) -> Self {
        Self {
            code: t.code,
            name: t.name,
            description: t.description,
            parent_code: t.parent_code,
            depth_level: t.depth_level,
            status: t.status,
            examples: t.examples,
        }
    }
}

/// GET /tagsets - all active tagsets, sorted by code
pub async fn list_active(State(state): State<AppState>) -> ApiResult<Json<Vec<TagsetResponse>>> {
    let tagsets = crate::db::tagsets::load_active_tagsets(&state.db).await?;
    Ok(Json(tagsets.into_iter().map(TagsetResponse::from).collect()))
}

/// GET /tagsets/{code} - one tagset, any status
pub async fn get_tagset(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<TagsetResponse>> {
    let tagset = crate::db::tagsets::load_tagset(&state.db, &code)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No tagset with code {}", code)))?;
    Ok(Json(tagset.into()))
}

/// POST /tagsets - propose a new tagset (created pending)
///
/// A non-root proposal must name an existing parent whose code is the
/// proposal's dotted prefix; depth must be parent depth + 1.
pub async fn propose_tagset(
    State(state): State<AppState>,
    Json(request): Json<ProposeTagsetRequest>,
) -> ApiResult<Json<TagsetResponse>> {
    if crate::db::tagsets::load_tagset(&state.db, &request.code)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "Tagset {} already exists",
            request.code
        )));
    }

    if let Some(parent_code) = &request.parent_code {
        let parent = crate::db::tagsets::load_tagset(&state.db, parent_code)
            .await?
            .ok_or_else(|| {
                ApiError::BadRequest(format!("Parent tagset {} does not exist", parent_code))
            })?;
        if !request.code.starts_with(&format!("{}.", parent_code)) {
            return Err(ApiError::BadRequest(format!(
                "Code {} is not under parent {}",
                request.code, parent_code
            )));
        }
        if request.depth_level != parent.depth_level + 1 {
            return Err(ApiError::BadRequest(format!(
                "depth_level must be {} under parent {}",
                parent.depth_level + 1,
                parent_code
            )));
        }
    } else if request.depth_level != 1 || request.code != top_level_prefix(&request.code) {
        return Err(ApiError::BadRequest(
            "Root tagsets must be depth 1 with a 2-character code".to_string(),
        ));
    }

    let tagset = Tagset {
        code: request.code,
        name: request.name,
        description: request.description,
        parent_code: request.parent_code,
        depth_level: request.depth_level,
        status: TagsetStatus::Pending,
        examples: request.examples,
        created_at: chrono::Utc::now(),
    };
    crate::db::tagsets::propose_tagset(&state.db, &tagset).await?;

    tracing::info!(code = %tagset.code, "Tagset proposed");
    Ok(Json(tagset.into()))
}

/// POST /tagsets/{code}/approve - pending → active
pub async fn approve_tagset(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<TagsetResponse>> {
    crate::db::tagsets::approve_tagset(&state.db, &code).await?;
    let tagset = crate::db::tagsets::load_tagset(&state.db, &code)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Tagset {} vanished after approve", code)))?;
    Ok(Json(tagset.into()))
}

/// POST /tagsets/{code}/reject - pending → rejected
pub async fn reject_tagset(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<Json<TagsetResponse>> {
    crate::db::tagsets::reject_tagset(&state.db, &code).await?;
    let tagset = crate::db::tagsets::load_tagset(&state.db, &code)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Tagset {} vanished after reject", code)))?;
    Ok(Json(tagset.into()))
}

/// Build tagset routes
pub fn tagset_routes() -> Router<AppState> {
    Router::new()
        .route("/tagsets", get(list_active).post(propose_tagset))
        .route("/tagsets/:code", get(get_tagset))
        .route("/tagsets/:code/approve", post(approve_tagset))
        .route("/tagsets/:code/reject", post(reject_tagset))
}
