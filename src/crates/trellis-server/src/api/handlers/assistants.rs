//! Assistant endpoint handlers

use crate::api::{
    error::ApiResult,
    models::{
        CreateAssistantRequest, PatchAssistantRequest, SearchAssistantsRequest, SetLatestRequest,
    },
    routes::AppState,
};
use crate::models::{Assistant, AssistantVersion};
use crate::store::{AssistantPatch, AssistantSearch, PutAssistant};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

/// Create a new assistant
///
/// POST /assistants
pub async fn create_assistant(
    State(state): State<AppState>,
    Json(req): Json<CreateAssistantRequest>,
) -> ApiResult<Json<Assistant>> {
    let assistant = state
        .stores
        .assistants
        .put(PutAssistant {
            assistant_id: req.assistant_id.unwrap_or_else(Uuid::new_v4),
            graph_id: req.graph_id,
            config: req.config,
            metadata: req.metadata,
            name: req.name,
            if_exists: req.if_exists,
        })
        .await?;
    Ok(Json(assistant))
}

/// Search assistants
///
/// POST /assistants/search
pub async fn search_assistants(
    State(state): State<AppState>,
    Json(req): Json<SearchAssistantsRequest>,
) -> ApiResult<Json<Vec<Assistant>>> {
    let assistants = state
        .stores
        .assistants
        .search(AssistantSearch {
            graph_id: req.graph_id,
            metadata: req.metadata,
            limit: req.limit,
            offset: req.offset,
        })
        .await;
    Ok(Json(assistants))
}

/// Get a single assistant
///
/// GET /assistants/:id
pub async fn get_assistant(
    State(state): State<AppState>,
    Path(assistant_id): Path<Uuid>,
) -> ApiResult<Json<Assistant>> {
    Ok(Json(state.stores.assistants.get(assistant_id).await?))
}

/// Patch an assistant, creating a new version
///
/// PATCH /assistants/:id
pub async fn patch_assistant(
    State(state): State<AppState>,
    Path(assistant_id): Path<Uuid>,
    Json(req): Json<PatchAssistantRequest>,
) -> ApiResult<Json<Assistant>> {
    let assistant = state
        .stores
        .assistants
        .patch(
            assistant_id,
            AssistantPatch {
                graph_id: req.graph_id,
                config: req.config,
                metadata: req.metadata,
                name: req.name,
            },
        )
        .await?;
    Ok(Json(assistant))
}

/// Delete an assistant and everything referencing it
///
/// DELETE /assistants/:id
pub async fn delete_assistant(
    State(state): State<AppState>,
    Path(assistant_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.stores.assistants.delete(assistant_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// List an assistant's versions, newest first
///
/// GET /assistants/:id/versions
pub async fn get_assistant_versions(
    State(state): State<AppState>,
    Path(assistant_id): Path<Uuid>,
) -> ApiResult<Json<Vec<AssistantVersion>>> {
    Ok(Json(
        state.stores.assistants.get_versions(assistant_id).await?,
    ))
}

/// Copy a named version into the live assistant
///
/// POST /assistants/:id/latest
pub async fn set_latest_version(
    State(state): State<AppState>,
    Path(assistant_id): Path<Uuid>,
    Json(req): Json<SetLatestRequest>,
) -> ApiResult<Json<Assistant>> {
    let assistant = state
        .stores
        .assistants
        .set_latest(assistant_id, req.version)
        .await?;
    Ok(Json(assistant))
}
