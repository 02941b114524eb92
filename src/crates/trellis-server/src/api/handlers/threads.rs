//! Thread endpoint handlers

use crate::api::{
    error::ApiResult,
    models::{CreateThreadRequest, PatchThreadRequest, SearchThreadsRequest},
    routes::AppState,
};
use crate::models::Thread;
use crate::store::ThreadSearch;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

/// Create a new thread
///
/// POST /threads
pub async fn create_thread(
    State(state): State<AppState>,
    Json(req): Json<CreateThreadRequest>,
) -> ApiResult<Json<Thread>> {
    let thread = state
        .stores
        .threads
        .put(
            req.thread_id.unwrap_or_else(Uuid::new_v4),
            req.metadata,
            req.if_exists,
        )
        .await?;
    Ok(Json(thread))
}

/// Search threads
///
/// POST /threads/search
pub async fn search_threads(
    State(state): State<AppState>,
    Json(req): Json<SearchThreadsRequest>,
) -> ApiResult<Json<Vec<Thread>>> {
    let threads = state
        .stores
        .threads
        .search(ThreadSearch {
            status: req.status,
            values: req.values,
            metadata: req.metadata,
            limit: req.limit,
            offset: req.offset,
        })
        .await;
    Ok(Json(threads))
}

/// Get a single thread
///
/// GET /threads/:id
pub async fn get_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
) -> ApiResult<Json<Thread>> {
    Ok(Json(state.stores.threads.get(thread_id).await?))
}

/// Shallow-merge metadata into a thread
///
/// PATCH /threads/:id
pub async fn patch_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Json(req): Json<PatchThreadRequest>,
) -> ApiResult<Json<Thread>> {
    Ok(Json(
        state.stores.threads.patch(thread_id, req.metadata).await?,
    ))
}

/// Delete a thread and everything belonging to it
///
/// DELETE /threads/:id
pub async fn delete_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.stores.threads.delete(thread_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Copy a thread together with its checkpoint history
///
/// POST /threads/:id/copy
pub async fn copy_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
) -> ApiResult<Json<Thread>> {
    Ok(Json(state.stores.threads.copy(thread_id).await?))
}
