//! Run endpoint handlers
//!
//! Run creation applies the multitask strategy here, using the inflight
//! list the run store reports: `reject` refuses when the thread is busy,
//! `enqueue` just inserts, `interrupt`/`rollback` insert and then cancel
//! the previous inflight runs with the matching action.

use crate::api::{
    error::{ApiError, ApiResult},
    models::{CancelRunRequest, CreateRunRequest, RunListQuery},
    routes::AppState,
};
use crate::bus::CancelAction;
use crate::errors::ServerError;
use crate::models::{MultitaskStrategy, Run};
use crate::store::{JoinOptions, RunCreate, RunSearch};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::convert::Infallible;
use uuid::Uuid;

/// Create a run on a thread
///
/// POST /threads/:id/runs
pub async fn create_run(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Json(req): Json<CreateRunRequest>,
) -> ApiResult<Json<Run>> {
    req.validate().map_err(ApiError::validation)?;

    let run_id = Uuid::new_v4();
    let strategy = req.multitask_strategy.unwrap_or_default();
    let stream_mode = req.stream_modes();

    let runs = state
        .stores
        .runs
        .put(RunCreate {
            run_id,
            thread_id,
            assistant_id: req.assistant_id,
            input: req.input,
            command: req.command,
            stream_mode,
            interrupt_before: req.interrupt_before,
            interrupt_after: req.interrupt_after,
            config: req.config,
            metadata: req.metadata,
            multitask_strategy: strategy,
            if_not_exists: req.if_not_exists,
            after_seconds: req.after_seconds,
            user_id: req.user_id,
            prevent_insert_in_inflight: strategy == MultitaskStrategy::Reject,
        })
        .await?;

    let inserted = runs.first().is_some_and(|run| run.run_id == run_id);
    if !inserted {
        return Err(ApiError(ServerError::Conflict(format!(
            "thread {thread_id} already has an inflight run"
        ))));
    }

    let inflight: Vec<Uuid> = runs[1..].iter().map(|run| run.run_id).collect();
    if !inflight.is_empty() {
        let action = match strategy {
            MultitaskStrategy::Interrupt => Some(CancelAction::Interrupt),
            MultitaskStrategy::Rollback => Some(CancelAction::Rollback),
            MultitaskStrategy::Enqueue | MultitaskStrategy::Reject => None,
        };
        if let Some(action) = action {
            if let Err(err) = state
                .stores
                .runs
                .cancel(Some(thread_id), &inflight, action)
                .await
            {
                tracing::warn!(thread_id = %thread_id, error = %err, "Inflight cancellation failed");
            }
        }
    }

    Ok(Json(runs.into_iter().next().expect("inserted above")))
}

/// List the runs of a thread
///
/// GET /threads/:id/runs
pub async fn list_runs(
    State(state): State<AppState>,
    Path(thread_id): Path<Uuid>,
    Query(query): Query<RunListQuery>,
) -> ApiResult<Json<Vec<Run>>> {
    let runs = state
        .stores
        .runs
        .search(
            thread_id,
            RunSearch {
                status: query.status,
                metadata: None,
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await?;
    Ok(Json(runs))
}

/// Get a single run
///
/// GET /threads/:id/runs/:run_id
pub async fn get_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Run>> {
    Ok(Json(state.stores.runs.get(run_id, Some(thread_id)).await?))
}

/// Delete a run
///
/// DELETE /threads/:id/runs/:run_id
pub async fn delete_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<StatusCode> {
    state.stores.runs.delete(run_id, Some(thread_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Cancel a run
///
/// POST /threads/:id/runs/:run_id/cancel
pub async fn cancel_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<CancelRunRequest>,
) -> ApiResult<StatusCode> {
    state
        .stores
        .runs
        .cancel(Some(thread_id), &[run_id], req.action)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Stream a run's output over SSE
///
/// GET /threads/:id/runs/:run_id/stream
pub async fn stream_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    // 404 before committing to a stream response.
    state.stores.runs.get(run_id, Some(thread_id)).await?;

    let stream = state
        .stores
        .runs
        .join_stream(
            run_id,
            Some(thread_id),
            JoinOptions {
                ignore_not_found: true,
                cancel_on_disconnect: true,
                cancel: None,
            },
        )
        .map(|(event, data)| Ok(SseEvent::default().event(event).data(data.to_string())));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Block until a run finishes and return its final value
///
/// POST /threads/:id/runs/:run_id/join
pub async fn join_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.stores.runs.join(run_id, thread_id).await?))
}
