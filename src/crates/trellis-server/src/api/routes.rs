//! API route definitions

use crate::api::handlers;
use crate::store::Stores;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
}

/// Build the complete API router
pub fn create_router(stores: Stores) -> Router {
    let app_state = AppState { stores };

    Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Assistants
        .route("/assistants", post(handlers::create_assistant))
        .route("/assistants/search", post(handlers::search_assistants))
        .route(
            "/assistants/:assistant_id",
            get(handlers::get_assistant)
                .patch(handlers::patch_assistant)
                .delete(handlers::delete_assistant),
        )
        .route(
            "/assistants/:assistant_id/versions",
            get(handlers::get_assistant_versions),
        )
        .route(
            "/assistants/:assistant_id/latest",
            post(handlers::set_latest_version),
        )
        // Threads
        .route("/threads", post(handlers::create_thread))
        .route("/threads/search", post(handlers::search_threads))
        .route("/threads/state/batch", post(handlers::batch_update_state))
        .route(
            "/threads/:thread_id",
            get(handlers::get_thread)
                .patch(handlers::patch_thread)
                .delete(handlers::delete_thread),
        )
        .route("/threads/:thread_id/copy", post(handlers::copy_thread))
        // Thread state
        .route(
            "/threads/:thread_id/state",
            get(handlers::get_state).post(handlers::update_state),
        )
        .route(
            "/threads/:thread_id/state/checkpoint",
            post(handlers::get_state_at_checkpoint_post),
        )
        .route(
            "/threads/:thread_id/state/:checkpoint_id",
            get(handlers::get_state_at_checkpoint),
        )
        .route(
            "/threads/:thread_id/history",
            get(handlers::get_history).post(handlers::post_history),
        )
        // Runs
        .route(
            "/threads/:thread_id/runs",
            post(handlers::create_run).get(handlers::list_runs),
        )
        .route(
            "/threads/:thread_id/runs/:run_id",
            get(handlers::get_run).delete(handlers::delete_run),
        )
        .route(
            "/threads/:thread_id/runs/:run_id/stream",
            get(handlers::stream_run),
        )
        .route(
            "/threads/:thread_id/runs/:run_id/cancel",
            post(handlers::cancel_run),
        )
        .route(
            "/threads/:thread_id/runs/:run_id/join",
            post(handlers::join_run),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
