//! HTTP boundary
//!
//! Request parsing, routing, response shaping and SSE framing over the
//! stores. The multitask strategy for run creation is applied here, using
//! the inflight list the run store reports.

pub mod error;
pub mod handlers;
pub mod models;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{create_router, AppState};
