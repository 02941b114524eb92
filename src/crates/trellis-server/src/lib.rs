//! # trellis-server - control plane for hosted graph computations
//!
//! Trellis hosts long-running, stateful graph computations on behalf of
//! remote clients. Clients create **assistants** (named, versioned bindings
//! of a graph to default configuration), open **threads** (durable state
//! containers), and launch **runs** (executions of an assistant against a
//! thread). Each run streams incremental output to subscribers while it
//! executes, may be cancelled, rolled back or resumed from a checkpoint,
//! and updates a thread whose state is persisted as a checkpoint sequence.
//!
//! Subsystems:
//!
//! - [`persist`] - atomic mutation of the aggregate document, background
//!   flusher, shutdown flush
//! - [`bus`] - per-run message queues and cancellation handles
//! - [`store`] - assistant / thread / run stores, the pending-run picker,
//!   join/wait streams and the cancellation protocol
//! - [`checkpointer`] - thin facade over the injected checkpoint store
//! - [`graph`] - the opaque six-operation graph interface, registry, and
//!   the builtin `echo` graph
//! - [`executor`] - the worker driving graph invocations
//! - [`api`] - axum routes, handlers and SSE framing
//!
//! The server is single-process by design: all aggregate mutations are
//! linearised through [`persist::Persistence`], and one executor worker
//! serves runs in FIFO order of their scheduled time.

pub mod api;
pub mod bus;
pub mod checkpointer;
pub mod config;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod models;
pub mod persist;
pub mod store;
pub mod utils;

pub use errors::{Result, ServerError};

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
