//! Thread state endpoint handlers
//!
//! All of these delegate to the graph bound to the thread and keep the
//! thread's materialised `values` projection in step with the latest
//! checkpoint.

use crate::api::{
    error::ApiResult,
    models::{
        BatchStateRequest, CheckpointStateRequest, HistoryQuery, HistoryRequest, SubgraphsQuery,
        UpdateStateRequest, UpdateStateResponse,
    },
    routes::AppState,
};
use crate::graph::StateSnapshot;
use crate::models::Thread;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

/// Read the thread's current state
///
/// GET /threads/:id/state
pub async fn get_state(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Query(query): Query<SubgraphsQuery>,
) -> ApiResult<Json<StateSnapshot>> {
    let snapshot = state
        .stores
        .threads
        .get_state(thread_id, None, query.subgraphs)
        .await?;
    Ok(Json(snapshot))
}

/// Apply a single state update
///
/// POST /threads/:id/state
pub async fn update_state(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Json(req): Json<UpdateStateRequest>,
) -> ApiResult<Json<UpdateStateResponse>> {
    let checkpoint_id = req.effective_checkpoint_id().map(str::to_string);
    let checkpoint = state
        .stores
        .threads
        .update_state(thread_id, req.values, req.as_node, checkpoint_id.as_deref())
        .await?;
    Ok(Json(UpdateStateResponse { checkpoint }))
}

/// Read the state at a specific checkpoint
///
/// GET /threads/:id/state/:checkpoint_id
pub async fn get_state_at_checkpoint(
    State(state): State<AppState>,
    Path((thread_id, checkpoint_id)): Path<(Uuid, String)>,
    Query(query): Query<SubgraphsQuery>,
) -> ApiResult<Json<StateSnapshot>> {
    let snapshot = state
        .stores
        .threads
        .get_state(thread_id, Some(checkpoint_id.as_str()), query.subgraphs)
        .await?;
    Ok(Json(snapshot))
}

/// Read the state at a checkpoint given in the body
///
/// POST /threads/:id/state/checkpoint
pub async fn get_state_at_checkpoint_post(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Json(req): Json<CheckpointStateRequest>,
) -> ApiResult<Json<StateSnapshot>> {
    let checkpoint_id = req
        .checkpoint
        .as_ref()
        .and_then(|pointer| pointer.checkpoint_id.as_deref());
    let snapshot = state
        .stores
        .threads
        .get_state(thread_id, checkpoint_id, req.subgraphs)
        .await?;
    Ok(Json(snapshot))
}

/// Read the thread's state history, newest first
///
/// GET /threads/:id/history
pub async fn get_history(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<StateSnapshot>>> {
    let history = state
        .stores
        .threads
        .state_history(thread_id, query.limit, query.before.as_deref(), None)
        .await?;
    Ok(Json(history))
}

/// Read the thread's state history with body filters
///
/// POST /threads/:id/history
pub async fn post_history(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Json(req): Json<HistoryRequest>,
) -> ApiResult<Json<Vec<StateSnapshot>>> {
    let before = req.before.as_ref().and_then(|b| b.checkpoint_id());
    let history = state
        .stores
        .threads
        .state_history(thread_id, req.limit, before, req.metadata)
        .await?;
    Ok(Json(history))
}

/// Apply a batch of supersteps, creating the thread if needed
///
/// POST /threads/state/batch
pub async fn batch_update_state(
    State(state): State<AppState>,
    Json(req): Json<BatchStateRequest>,
) -> ApiResult<Json<Thread>> {
    let thread_id = req.thread_id.unwrap_or_else(Uuid::new_v4);
    state
        .stores
        .threads
        .put(thread_id, req.metadata, req.if_exists)
        .await?;
    let thread = state
        .stores
        .threads
        .bulk_update_state(thread_id, req.supersteps)
        .await?;
    Ok(Json(thread))
}
