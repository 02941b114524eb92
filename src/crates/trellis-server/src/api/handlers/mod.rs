//! Endpoint handlers grouped by aggregate

mod assistants;
mod runs;
mod state;
mod threads;

pub use assistants::*;
pub use runs::*;
pub use state::*;
pub use threads::*;

use crate::api::routes::AppState;
use axum::{extract::State, Json};
use serde_json::{json, Value};

/// Liveness probe
///
/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "graphs": state.stores.context().registry.graph_ids(),
    }))
}
